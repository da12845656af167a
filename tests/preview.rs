use std::os::unix::io::RawFd;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use framepipe::preview::DoneCallback;
use framepipe::{
    CameraApp, CompletedCapturePtr, Error, MappedRegion, Message, NullPreview, Options, Preview,
    StillFlags, StreamInfo, Timestamp, VirtualDevice,
};

/// Backend that blocks in `show` until the test opens the gate
struct GatedPreview {
    open: Mutex<bool>,
    cond: Condvar,
    entered: Sender<RawFd>,
    seen: Mutex<Vec<[u8; 4]>>,
    done: Mutex<Option<DoneCallback>>,
}

impl GatedPreview {
    fn new() -> (Arc<Self>, Receiver<RawFd>) {
        let (entered, rx) = crossbeam_channel::unbounded();
        let preview = Arc::new(GatedPreview {
            open: Mutex::new(false),
            cond: Condvar::new(),
            entered,
            seen: Mutex::new(Vec::new()),
            done: Mutex::new(None),
        });
        (preview, rx)
    }

    fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.cond.notify_all();
    }
}

impl Preview for GatedPreview {
    fn show(&self, fd: RawFd, span: &MappedRegion, _info: StreamInfo) {
        self.entered.send(fd).unwrap();
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.cond.wait(open).unwrap();
        }
        drop(open);

        let mut head = [0; 4];
        head.copy_from_slice(&span.as_slice()[..4]);
        self.seen.lock().unwrap().push(head);
        if let Some(done) = self.done.lock().unwrap().as_ref() {
            done(fd);
        }
    }

    fn reset(&self) {}

    fn set_done_callback(&self, callback: DoneCallback) {
        *self.done.lock().unwrap() = Some(callback);
    }
}

fn started(backend: Arc<dyn Preview>) -> (Arc<VirtualDevice>, CameraApp) {
    let device = Arc::new(VirtualDevice::default());
    let mut app = CameraApp::with_preview(device.clone(), Options::default(), backend).unwrap();
    app.configure_viewfinder().unwrap();
    app.start().unwrap();
    (device, app)
}

fn next_capture(app: &CameraApp, device: &VirtualDevice, n: u64) -> CompletedCapturePtr {
    assert!(device.complete_next(Timestamp::new(1_000_000_000 + n * 40_000_000)));
    match app.wait().unwrap() {
        Message::RequestComplete(capture) => capture,
        Message::Quit => panic!("unexpected quit"),
    }
}

fn wait_for(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn busy_preview_drops_the_newest_frame() {
    let (backend, entered) = GatedPreview::new();
    let (device, app) = started(backend.clone());
    let stream = app.viewfinder_stream().unwrap().0;

    let first = next_capture(&app, &device, 0);
    assert!(app.show_preview(&first, stream));
    entered.recv_timeout(Duration::from_secs(5)).unwrap();

    let second = next_capture(&app, &device, 1);
    assert!(app.show_preview(&second, stream));
    let third = next_capture(&app, &device, 2);
    assert!(!app.show_preview(&third, stream));
    assert_eq!(app.preview_stats().unwrap().dropped, 1);

    backend.open();
    entered.recv_timeout(Duration::from_secs(5)).unwrap();
    wait_for(|| backend.seen.lock().unwrap().len() == 2);

    let seen = backend.seen.lock().unwrap().clone();
    assert_eq!(seen, [1u32.to_le_bytes(), 2u32.to_le_bytes()]);
    assert_eq!(app.preview_stats().unwrap().displayed, 2);
}

#[test]
fn preview_keeps_capture_until_done() {
    let backend = Arc::new(NullPreview::new());
    let (device, app) = started(backend.clone());
    let stream = app.viewfinder_stream().unwrap().0;

    let capture = next_capture(&app, &device, 0);
    let weak = Arc::downgrade(&capture);
    assert!(app.show_preview(&capture, stream));
    drop(capture);

    wait_for(|| weak.upgrade().is_none());
    assert_eq!(backend.shown(), 1);
    wait_for(|| device.queued() == 4);
}

#[test]
fn overlay_text_is_formatted_from_metadata() {
    let backend = Arc::new(NullPreview::new());
    let (device, app) = started(backend.clone());
    let stream = app.viewfinder_stream().unwrap().0;

    let capture = next_capture(&app, &device, 0);
    app.show_preview(&capture, stream);

    wait_for(|| !backend.info_text().is_empty());
    assert_eq!(
        backend.info_text(),
        "#0 (0.00 fps) exp 10000.00 ag 1.00 dg 1.00"
    );
}

#[test]
fn quit_is_posted_once() {
    let backend = Arc::new(NullPreview::new());
    backend.request_quit();
    let (device, app) = started(backend.clone());
    let stream = app.viewfinder_stream().unwrap().0;

    let mut quits = 0;
    for n in 0..3 {
        assert!(device.complete_next(Timestamp::new(1_000_000_000 + n * 40_000_000)));
        let capture = loop {
            match app.wait().unwrap() {
                Message::RequestComplete(capture) => break capture,
                Message::Quit => quits += 1,
            }
        };
        app.show_preview(&capture, stream);
        drop(capture);
        wait_for(|| backend.shown() == n + 1);
    }

    while let Some(message) = app.wait_timeout(Duration::from_millis(50)) {
        if let Message::Quit = message.unwrap() {
            quits += 1;
        }
    }
    assert_eq!(quits, 1);
}

#[test]
fn shutdown_waits_for_preview_before_unmapping() {
    let (backend, entered) = GatedPreview::new();
    let (device, mut app) = started(backend.clone());
    let stream = app.viewfinder_stream().unwrap().0;

    let capture = next_capture(&app, &device, 0);
    let region = Arc::downgrade(&app.mmap(capture.buffer(stream).unwrap())[0]);
    app.show_preview(&capture, stream);
    drop(capture);
    entered.recv_timeout(Duration::from_secs(5)).unwrap();

    let opener = {
        let backend = backend.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            backend.open();
        })
    };
    app.shutdown();
    opener.join().unwrap();

    // the preview read the buffer after the gate opened, so it was still mapped then
    assert_eq!(*backend.seen.lock().unwrap(), [1u32.to_le_bytes()]);
    assert!(region.upgrade().is_none());
}

#[test]
fn unsupported_pixel_format_is_reported_and_released() {
    let device = Arc::new(VirtualDevice::default());
    let backend = Arc::new(NullPreview::new());
    let mut app =
        CameraApp::with_preview(device.clone(), Options::default(), backend.clone()).unwrap();
    app.configure_still(StillFlags::RGB).unwrap();
    app.start().unwrap();
    let stream = app.still_stream().unwrap().0;

    let capture = next_capture(&app, &device, 0);
    let weak = Arc::downgrade(&capture);
    assert!(app.show_preview(&capture, stream));
    drop(capture);

    assert!(matches!(app.wait(), Err(Error::Configuration(_))));
    wait_for(|| weak.upgrade().is_none());
    wait_for(|| device.queued() == 4);

    let stats = app.preview_stats().unwrap();
    assert_eq!((stats.displayed, stats.dropped), (0, 1));
    assert_eq!(backend.shown(), 0);
}
