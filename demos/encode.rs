use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;
use framepipe::{
    CameraApp, CameraEncoder, EncodeInput, Encoder, InputDoneCallback, Message, Options,
    OutputReadyCallback, Timestamp, VideoFlags, VirtualDevice,
};
use tracing::info;

type Callbacks = Arc<Mutex<(Option<InputDoneCallback>, Option<OutputReadyCallback>)>>;

/// Sums every frame on a worker thread and emits the sum as "encoded" data
struct ChecksumEncoder {
    tx: Option<Sender<(Vec<u8>, i64)>>,
    worker: Option<JoinHandle<()>>,
    callbacks: Callbacks,
}

impl ChecksumEncoder {
    fn new() -> Self {
        let (tx, rx) = crossbeam_channel::bounded::<(Vec<u8>, i64)>(8);
        let callbacks: Callbacks = Arc::new(Mutex::new((None, None)));
        let worker_callbacks = callbacks.clone();
        let worker = thread::spawn(move || {
            for (frame, timestamp_us) in rx {
                let sum: u64 = frame.iter().map(|&b| b as u64).sum();
                let callbacks = worker_callbacks.lock().unwrap();
                if let Some(input_done) = &callbacks.0 {
                    input_done();
                }
                if let Some(output_ready) = &callbacks.1 {
                    output_ready(&sum.to_le_bytes(), timestamp_us, true);
                }
            }
        });

        ChecksumEncoder {
            tx: Some(tx),
            worker: Some(worker),
            callbacks,
        }
    }
}

impl Encoder for ChecksumEncoder {
    fn encode_buffer(&mut self, input: EncodeInput<'_>) -> framepipe::Result<()> {
        // only the luma plane is of interest here
        let luma = (input.stride * input.height) as usize;
        let frame = input.span.as_slice()[..luma].to_vec();
        if let Some(tx) = &self.tx {
            tx.send((frame, input.timestamp_us))
                .map_err(|_| framepipe::Error::Device("encoder worker is gone".to_string()))?;
        }
        Ok(())
    }

    fn set_input_done_callback(&mut self, callback: InputDoneCallback) {
        self.callbacks.lock().unwrap().0 = Some(callback);
    }

    fn set_output_ready_callback(&mut self, callback: OutputReadyCallback) {
        self.callbacks.lock().unwrap().1 = Some(callback);
    }
}

impl Drop for ChecksumEncoder {
    fn drop(&mut self) {
        self.tx = None;
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn main() -> framepipe::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("framepipe=info".parse().unwrap()),
        )
        .init();

    // Encode 30 frames by default
    let count = 30;

    let options = Options {
        width: 640,
        height: 480,
        ..Options::default()
    };
    let device = Arc::new(VirtualDevice::default());
    let mut app = CameraEncoder::new(CameraApp::new(device.clone(), options));

    let encoded = Arc::new(AtomicUsize::new(0));
    let sink = encoded.clone();
    app.set_encode_output_ready_callback(move |data, timestamp_us, _keyframe| {
        sink.fetch_add(data.len(), Ordering::Relaxed);
        println!("Output: {} bytes @ {} us", data.len(), timestamp_us);
    });

    app.configure_video(VideoFlags::NONE)?;
    app.start_encoder(Box::new(ChecksumEncoder::new()));
    app.start()?;
    let (stream, _) = app.video_stream().unwrap();

    for n in 0..count {
        // all buffers may still sit in the encoder
        while !device.complete_next(Timestamp::new(n * 33_333_333 + 1)) {
            thread::sleep(std::time::Duration::from_millis(1));
        }
        match app.wait()? {
            Message::RequestComplete(capture) => app.encode_buffer(&capture, stream)?,
            Message::Quit => break,
        }
    }

    app.stop_encoder();
    app.stop()?;

    info!(bytes = encoded.load(Ordering::Relaxed), "encoding done");
    Ok(())
}
