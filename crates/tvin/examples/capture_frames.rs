//! Capture decimated frames from the TVD input for a few seconds.
//!
//! Usage: `cargo run --example capture_frames [/dev/videoN]`

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tvin::prelude::*;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_DEVICE.to_string());

    let frames = Arc::new(AtomicU64::new(0));
    let seen = frames.clone();
    let session = CaptureRequest::new(&path)
        .video_system(VideoSystem::Ntsc)
        .buffers(DEFAULT_BUFFER_COUNT)
        .frame_divisor(DEFAULT_FRAME_DIVISOR)
        .spawn(move |frame: FrameView<'_>| {
            let n = seen.fetch_add(1, Ordering::Relaxed) + 1;
            if n % 10 == 0 {
                println!(
                    "frame {n}: {}x{} {} ({} bytes)",
                    frame.width(),
                    frame.height(),
                    frame.format().pixelformat,
                    frame.data().len()
                );
            }
        })?;

    println!("capturing from {path} ({})", session.format().resolution);
    std::thread::sleep(Duration::from_secs(5));

    let metrics = session.metrics();
    if let Some(err) = session.stop() {
        eprintln!("capture ended early: {err}");
    }
    let counts = metrics.snapshot();
    println!(
        "dequeued {} frames, delivered {}, skipped {}",
        counts.dequeued, counts.delivered, counts.skipped
    );
    Ok(())
}
