//! Vidcap binary: capture a few frames from a device and report them.

use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use vidcap::{decode, CaptureEngine, PixelFormat};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    if let Err(err) = run() {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| CaptureEngine::DEFAULT_DEVICE.to_owned());

    let mut engine = CaptureEngine::open(&path)?;
    engine.set_pixel_format(PixelFormat::Yuyv)?;
    engine.set_size(640, 480)?;
    engine.initialize()?;

    println!("Device: {}", engine.device_name().unwrap_or("?"));
    println!("Driver: {}", engine.driver_name().unwrap_or("?"));
    println!("Bus:    {}", engine.bus_info().unwrap_or("?"));
    if let Some(format) = engine.format() {
        println!("Format: {format}");
    }

    engine.start_streaming()?;

    let mut captured = 0u32;
    while captured < 10 {
        if !engine.wait_frame(Duration::from_millis(500))? {
            println!("no frame within 500ms, retrying");
            continue;
        }
        let Some(frame) = engine.acquire_frame()? else {
            continue;
        };

        println!(
            "Frame {}: {} bytes, timestamp: {:?}",
            frame.sequence(),
            frame.bytes_used(),
            frame.timestamp()
        );

        if captured == 0 {
            let format = engine.format().context("format vanished mid-stream")?;
            match decode(format, engine.frame_data(&frame)) {
                Ok(image) => println!(
                    "Decoded first frame to {}x{} RGB ({} bytes)",
                    image.width,
                    image.height,
                    image.pixels.len()
                ),
                Err(err) => println!("Decode skipped: {err}"),
            }
        }

        engine.release_frame(frame)?;
        captured += 1;
    }

    engine.stop_streaming()?;
    engine.close();
    Ok(())
}
