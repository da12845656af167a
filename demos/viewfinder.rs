use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use framepipe::{CameraApp, Message, NullPreview, Options, Timestamp, VirtualDevice};
use tracing::info;

fn main() -> framepipe::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("framepipe=info".parse().unwrap()),
        )
        .init();

    // Show 60 frames by default
    let count = 60;

    let options = Options {
        lores_width: 320,
        lores_height: 240,
        framerate: 30.0,
        ..Options::default()
    };

    let device = Arc::new(VirtualDevice::default());
    let preview = Arc::new(NullPreview::new());
    let mut app = CameraApp::with_preview(device.clone(), options, preview.clone())?;
    app.configure_viewfinder()?;
    app.start()?;

    // stand-in for the sensor: complete a request every frame period
    let streaming = Arc::new(AtomicBool::new(true));
    let sensor = {
        let device = device.clone();
        let streaming = streaming.clone();
        thread::spawn(move || {
            let start = Instant::now();
            while streaming.load(Ordering::Relaxed) {
                device.complete_next(Timestamp::from(start.elapsed()));
                thread::sleep(Duration::from_millis(33));
            }
        })
    };

    let (stream, info) = app.viewfinder_stream().unwrap();
    println!("Viewfinder: {}x{} stride {}", info.width, info.height, info.stride);

    for _ in 0..count {
        match app.wait()? {
            Message::RequestComplete(capture) => {
                println!(
                    "Frame {:>3} @ {:>6.2} fps",
                    capture.sequence(),
                    capture.framerate()
                );
                app.show_preview(&capture, stream);
            }
            Message::Quit => break,
        }
    }

    streaming.store(false, Ordering::Relaxed);
    sensor.join().unwrap();
    app.stop()?;

    info!(shown = preview.shown(), "last overlay: {}", preview.info_text());
    Ok(())
}
