use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex};

use framepipe::{
    CameraApp, CameraEncoder, CompletedCapturePtr, EncodeInput, Encoder, Error,
    InputDoneCallback, Message, Options, OutputReadyCallback, Result, Timestamp, VideoFlags,
    VirtualDevice,
};

#[derive(Debug, Clone, PartialEq)]
struct Submitted {
    fd: RawFd,
    size: usize,
    width: u32,
    height: u32,
    stride: u32,
    timestamp_us: i64,
}

#[derive(Default, Clone)]
struct Recorder {
    done: Arc<Mutex<Option<InputDoneCallback>>>,
    inputs: Arc<Mutex<Vec<Submitted>>>,
}

impl Recorder {
    fn input_done(&self) {
        let done = self.done.lock().unwrap();
        (done.as_ref().unwrap())();
    }
}

/// Emits the first bytes of each frame as output and leaves input release to the test
struct RecordingEncoder {
    recorder: Recorder,
    output: Option<OutputReadyCallback>,
}

impl Encoder for RecordingEncoder {
    fn encode_buffer(&mut self, input: EncodeInput<'_>) -> Result<()> {
        self.recorder.inputs.lock().unwrap().push(Submitted {
            fd: input.fd,
            size: input.size,
            width: input.width,
            height: input.height,
            stride: input.stride,
            timestamp_us: input.timestamp_us,
        });
        if let Some(output) = &self.output {
            output(&input.span.as_slice()[..4], input.timestamp_us, true);
        }
        Ok(())
    }

    fn set_input_done_callback(&mut self, callback: InputDoneCallback) {
        *self.recorder.done.lock().unwrap() = Some(callback);
    }

    fn set_output_ready_callback(&mut self, callback: OutputReadyCallback) {
        self.output = Some(callback);
    }
}

fn video_encoder() -> (Arc<VirtualDevice>, CameraEncoder, Recorder) {
    let device = Arc::new(VirtualDevice::default());
    let options = Options {
        width: 640,
        height: 480,
        ..Options::default()
    };
    let mut encoder = CameraEncoder::new(CameraApp::new(device.clone(), options));
    encoder.configure_video(VideoFlags::NONE).unwrap();

    let recorder = Recorder::default();
    encoder.start_encoder(Box::new(RecordingEncoder {
        recorder: recorder.clone(),
        output: None,
    }));
    encoder.start().unwrap();
    (device, encoder, recorder)
}

fn next_capture(encoder: &CameraEncoder, device: &VirtualDevice, n: u64) -> CompletedCapturePtr {
    assert!(device.complete_next(Timestamp::new(2_000_000_000 + n * 33_000_000)));
    match encoder.wait().unwrap() {
        Message::RequestComplete(capture) => capture,
        Message::Quit => panic!("unexpected quit"),
    }
}

#[test]
fn consumed_buffers_are_released_in_order() {
    let (device, encoder, recorder) = video_encoder();
    let stream = encoder.video_stream().unwrap().0;
    assert_eq!(device.queued(), 6);

    let mut weak = Vec::new();
    for n in 0..3 {
        let capture = next_capture(&encoder, &device, n);
        encoder.encode_buffer(&capture, stream).unwrap();
        weak.push(Arc::downgrade(&capture));
    }
    assert_eq!(encoder.queued(), 3);
    assert_eq!(device.queued(), 3);

    for released in 0..3 {
        recorder.input_done();
        for (i, capture) in weak.iter().enumerate() {
            assert_eq!(capture.upgrade().is_none(), i <= released);
        }
    }
    assert_eq!(device.queued(), 6);

    recorder.input_done();
    assert!(matches!(encoder.wait(), Err(Error::ProtocolViolation(_))));
}

#[test]
fn encoder_receives_frame_geometry_and_timestamp() {
    let (device, encoder, recorder) = video_encoder();
    let stream = encoder.video_stream().unwrap().0;

    let capture = next_capture(&encoder, &device, 1);
    encoder.encode_buffer(&capture, stream).unwrap();

    let inputs = recorder.inputs.lock().unwrap().clone();
    assert_eq!(
        inputs,
        [Submitted {
            fd: capture.buffer(stream).unwrap().fd().unwrap(),
            size: 640 * 480 * 3 / 2,
            width: 640,
            height: 480,
            stride: 640,
            timestamp_us: 2_033_000,
        }]
    );
}

#[test]
fn output_goes_to_the_application_callback() {
    let device = Arc::new(VirtualDevice::default());
    let mut encoder = CameraEncoder::new(CameraApp::new(device.clone(), Options::default()));
    encoder.configure_video(VideoFlags::NONE).unwrap();

    let outputs = Arc::new(Mutex::new(Vec::new()));
    let sink = outputs.clone();
    encoder.set_encode_output_ready_callback(move |data, timestamp_us, keyframe| {
        sink.lock().unwrap().push((data.to_vec(), timestamp_us, keyframe));
    });
    encoder.start_encoder(Box::new(RecordingEncoder {
        recorder: Recorder::default(),
        output: None,
    }));
    encoder.start().unwrap();

    let stream = encoder.video_stream().unwrap().0;
    let capture = next_capture(&encoder, &device, 0);
    encoder.encode_buffer(&capture, stream).unwrap();

    assert_eq!(
        *outputs.lock().unwrap(),
        [(1u32.to_le_bytes().to_vec(), 2_000_000, true)]
    );
}

#[test]
fn stop_encoder_releases_outstanding_captures() {
    let (device, mut encoder, _recorder) = video_encoder();
    let stream = encoder.video_stream().unwrap().0;

    let mut weak = Vec::new();
    for n in 0..2 {
        let capture = next_capture(&encoder, &device, n);
        encoder.encode_buffer(&capture, stream).unwrap();
        weak.push(Arc::downgrade(&capture));
    }

    encoder.stop_encoder();
    assert_eq!(encoder.queued(), 0);
    assert!(weak.iter().all(|w| w.upgrade().is_none()));

    let capture = next_capture(&encoder, &device, 2);
    assert!(matches!(
        encoder.encode_buffer(&capture, stream),
        Err(Error::Configuration(_))
    ));
}
