//! Device handle: validated open and idempotent close of a capture node.

use std::fs::{File, OpenOptions};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use crate::error::{CaptureError, Result};

/// An open file descriptor to a capture character device.
///
/// The descriptor is opened non-blocking so a dequeue with nothing pending
/// returns immediately instead of parking the calling thread.
#[derive(Debug)]
pub struct DeviceHandle {
    file: Option<File>,
    path: PathBuf,
}

impl DeviceHandle {
    /// Open the device node at `path`.
    ///
    /// Fails with [`CaptureError::PathInvalid`] if the path is not a
    /// character special file and with [`CaptureError::OpenFailed`] on any
    /// other open failure.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let metadata = std::fs::metadata(&path).map_err(|source| CaptureError::OpenFailed {
            path: path.clone(),
            source,
        })?;
        if !metadata.file_type().is_char_device() {
            return Err(CaptureError::PathInvalid(path));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&path)
            .map_err(|source| CaptureError::OpenFailed {
                path: path.clone(),
                source,
            })?;

        Ok(Self {
            file: Some(file),
            path,
        })
    }

    /// The path this handle was opened from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the descriptor is still open.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Close the descriptor. Safe to call on an already-closed handle.
    pub fn close(&mut self) {
        self.file = None;
    }

    pub(crate) fn fd(&self) -> Option<BorrowedFd<'_>> {
        self.file.as_ref().map(AsFd::as_fd)
    }

    pub(crate) fn raw_fd(&self) -> Option<RawFd> {
        self.file.as_ref().map(AsRawFd::as_raw_fd)
    }
}
