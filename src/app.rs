//! The capture pipeline.
//!
//! [`CameraApp`] drives a [`Device`] through configure, start, stop and teardown, turns every
//! completed request into a shared [`CompletedCapture`] delivered through the message queue, and
//! resubmits the buffers once the last reference to a capture is gone.
//!
//! Locks are always taken in this order: stop guard, known captures, free requests, pending
//! controls. The buffer pool, preview and encoder locks are leaves.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use crossbeam_channel::Sender;
use tracing::{debug, error, info, warn};

use crate::capture::{self, BufferMap, CompletedCapture, CompletedCapturePtr};
use crate::control::{ControlId, ControlList, ControlValue};
use crate::device::{ConfigStatus, Device};
use crate::error::{Error, Result};
use crate::memory::MappedRegion;
use crate::message::{Message, MessageQueue};
use crate::options::Options;
use crate::preview::{Preview, PreviewItem, PreviewStats, PreviewThread};
use crate::request::{Request, RequestStatus};
use crate::stream::{Configuration, StillFlags, StreamId, StreamInfo, VideoFlags};
use crate::{BufferPool, FrameBuffer, RequestPool, Timestamp};

/// Logs at info level when the application asked for verbose output, debug otherwise
macro_rules! verbose {
    ($options:expr, $($arg:tt)+) => {
        if $options.verbose {
            info!($($arg)+)
        } else {
            debug!($($arg)+)
        }
    };
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State reachable from the device's completion thread and from capture release hooks
struct Shared {
    device: Arc<dyn Device>,
    buffers: BufferPool,
    requests: RequestPool,
    /// Stop guard, true while the device is streaming
    running: Mutex<bool>,
    /// Bumped on every start; completions carry the value of the start that installed them
    session: AtomicU64,
    /// Captures created since the last start that may still be resubmitted
    known: Mutex<HashSet<u64>>,
    /// Controls applied with the next submitted request
    controls: Mutex<ControlList>,
    sequence: AtomicU64,
    last_timestamp: Mutex<Timestamp>,
    events: MessageQueue<Result<Message>>,
}

impl Shared {
    fn request_complete(self: &Arc<Self>, session: u64, mut request: Request) {
        // held until the capture is posted so a stop cannot interleave
        let running = lock(&self.running);
        let stale = self.session.load(Ordering::Relaxed) != session;
        if request.status() == RequestStatus::Cancelled || stale || !*running {
            debug!(
                cookie = request.cookie(),
                status = ?request.status(),
                stale,
                "discarding request"
            );
            self.give_back(request.take_buffers());
            // stop drains the pool and start rebuilds it
            if *running && !stale {
                self.requests.recycle(request);
            }
            return;
        }

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let buffers = request.take_buffers();
        let buffer_metadata = request.take_buffer_metadata();
        let metadata = request.take_metadata();
        lock(&self.known).insert(sequence);
        self.requests.recycle(request);

        let timestamp = buffer_metadata
            .values()
            .next()
            .map(|m| m.timestamp)
            .unwrap_or_default();
        let framerate = {
            let mut last = lock(&self.last_timestamp);
            let framerate = capture::framerate(*last, timestamp);
            *last = timestamp;
            framerate
        };

        let weak: Weak<Shared> = Arc::downgrade(self);
        let capture = CompletedCapture::new(sequence, buffers, buffer_metadata, metadata)
            .with_framerate(framerate)
            .with_release(Box::new(move |sequence, buffers| {
                if let Some(shared) = weak.upgrade() {
                    shared.queue_request(sequence, buffers);
                }
            }));
        debug!(sequence, framerate, "capture complete");

        self.events.post(Ok(Message::RequestComplete(Arc::new(capture))));
        drop(running);
    }

    /// Release hook of every capture
    fn queue_request(&self, sequence: u64, buffers: BufferMap) {
        let running = lock(&self.running);
        if !*running {
            self.give_back(buffers);
            return;
        }

        // a capture from before a stop must not be resubmitted after the restart
        if !lock(&self.known).remove(&sequence) {
            self.give_back(buffers);
            return;
        }

        let request = match self.requests.pull() {
            Some(request) => request,
            None => {
                warn!(sequence, "could not make request, no free request available");
                self.give_back(buffers);
                return;
            }
        };

        let controls = std::mem::take(&mut *lock(&self.controls));
        if let Err(err) = self.requests.submit(&*self.device, request, buffers, controls) {
            error!(%err, sequence, "failed to queue request");
            self.events.post(Err(err));
        }
        drop(running);
    }

    fn give_back(&self, buffers: BufferMap) {
        for buffer in buffers.into_values() {
            self.buffers.give_back(buffer);
        }
    }
}

/// A camera application: configuration, streaming and capture delivery
///
/// Completed captures arrive through [`CameraApp::wait`]. Holding on to a capture keeps its
/// buffers out of circulation, so applications should drop them as soon as possible.
pub struct CameraApp {
    options: Options,
    shared: Arc<Shared>,
    preview: Option<PreviewThread>,
    configuration: Option<Configuration>,
    closed: bool,
}

impl CameraApp {
    /// Returns an application without preview
    ///
    /// # Arguments
    ///
    /// * `device` - Camera stack to drive
    /// * `options` - Application settings
    pub fn new(device: Arc<dyn Device>, options: Options) -> Self {
        CameraApp {
            options,
            shared: Arc::new(Shared {
                device,
                buffers: BufferPool::new(),
                requests: RequestPool::new(),
                running: Mutex::new(false),
                session: AtomicU64::new(0),
                known: Mutex::new(HashSet::new()),
                controls: Mutex::new(ControlList::new()),
                sequence: AtomicU64::new(0),
                last_timestamp: Mutex::new(Timestamp::default()),
                events: MessageQueue::new(),
            }),
            preview: None,
            configuration: None,
            closed: false,
        }
    }

    /// Returns an application showing frames passed to [`CameraApp::show_preview`] on `backend`
    pub fn with_preview(
        device: Arc<dyn Device>,
        options: Options,
        backend: Arc<dyn Preview>,
    ) -> Result<Self> {
        let mut app = Self::new(device, options);
        let preview = PreviewThread::spawn(
            backend,
            app.options.info_text.clone(),
            app.shared.events.sender(),
        )?;
        app.preview = Some(preview);
        Ok(app)
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Preview streams sized from the sensor's active area and what the preview can show
    pub fn configure_viewfinder(&mut self) -> Result<()> {
        info!("configuring viewfinder");
        let mut options = self.options.clone();
        if let Some(preview) = &self.preview {
            let max = preview.max_image_size();
            if !max.is_null() {
                options.preview_max_size = max;
            }
        }
        let properties = self.shared.device.properties();
        let config = Configuration::viewfinder(&options, &properties)?;
        verbose!(self.options, size = %config.streams[0].size, "viewfinder size chosen");
        self.configure(config)
    }

    pub fn configure_still(&mut self, flags: StillFlags) -> Result<()> {
        info!(?flags, "configuring still capture");
        let config = Configuration::still(&self.options, flags)?;
        self.configure(config)
    }

    pub fn configure_video(&mut self, flags: VideoFlags) -> Result<()> {
        info!(?flags, "configuring video");
        let config = Configuration::video(&self.options, flags)?;
        self.configure(config)
    }

    /// Negotiates `config` with the device, then allocates and maps every buffer
    ///
    /// A previous configuration is torn down first. The camera must be stopped.
    pub fn configure(&mut self, mut config: Configuration) -> Result<()> {
        if self.is_running() {
            return Err(Error::Configuration(
                "camera must be stopped before configuring".to_string(),
            ));
        }
        if self.configuration.is_some() {
            self.teardown()?;
        }
        config.validate()?;

        match self.shared.device.configure(&mut config.streams)? {
            ConfigStatus::Invalid => {
                return Err(Error::Configuration(
                    "failed to validate stream configurations".to_string(),
                ))
            }
            ConfigStatus::Adjusted => info!("stream configuration adjusted"),
            ConfigStatus::Valid => {}
        }
        config.validate()?;
        for stream in &config.streams {
            verbose!(
                self.options,
                name = %stream.name,
                size = %stream.size,
                format = %stream.pixel_format,
                buffers = stream.buffer_count,
                "stream configured"
            );
        }

        for index in 0..config.streams.len() {
            if let Err(err) = self.shared.buffers.allocate(&*self.shared.device, StreamId(index)) {
                self.shared.buffers.teardown_all();
                self.shared.device.release();
                return Err(err);
            }
        }
        info!("buffers allocated and mapped");

        self.configuration = Some(config);
        Ok(())
    }

    /// Builds the requests, applies the initial controls and starts streaming
    pub fn start(&mut self) -> Result<()> {
        let config = self
            .configuration
            .as_ref()
            .ok_or_else(|| Error::Configuration("camera is not configured".to_string()))?;
        if self.is_running() {
            return Err(Error::Device("camera already started".to_string()));
        }

        let requests = self
            .shared
            .requests
            .make_requests(&self.shared.buffers, config.streams.len())?;

        let controls = {
            let mut pending = lock(&self.shared.controls);
            self.initial_controls(&mut pending, config);
            std::mem::take(&mut *pending)
        };

        if let Err(err) = self.shared.device.start(&controls) {
            for mut request in requests {
                self.shared.give_back(request.take_buffers());
            }
            return Err(err);
        }
        *lock(&self.shared.last_timestamp) = Timestamp::default();
        let session = {
            let mut running = lock(&self.shared.running);
            *running = true;
            self.shared.session.fetch_add(1, Ordering::Relaxed) + 1
        };

        let weak = Arc::downgrade(&self.shared);
        self.shared
            .device
            .set_completion_handler(Some(Box::new(move |request: Request| {
                if let Some(shared) = weak.upgrade() {
                    shared.request_complete(session, request);
                }
            })));

        let mut requests = requests.into_iter();
        while let Some(request) = requests.next() {
            let bound: Vec<_> = request.buffers().values().cloned().collect();
            if let Err(err) = self.shared.device.queue_request(request) {
                error!(%err, "failed to queue initial request");
                for buffer in bound {
                    self.shared.buffers.give_back(buffer);
                }
                for mut request in requests {
                    self.shared.give_back(request.take_buffers());
                }
                if let Err(stop_err) = self.stop() {
                    warn!(%stop_err, "failed to stop camera after a failed start");
                }
                return Err(err);
            }
        }

        verbose!(self.options, session, "camera started");
        Ok(())
    }

    /// Fills in start controls the application did not set itself
    fn initial_controls(&self, controls: &mut ControlList, config: &Configuration) {
        let options = &self.options;

        if options.roi.is_set() && !controls.contains(ControlId::ScalerCrop) {
            let sensor_area = self.shared.device.properties().scaler_crop_maximum;
            let crop = options.roi.apply(&sensor_area);
            verbose!(options, %crop, "using crop");
            controls.set(ControlId::ScalerCrop, ControlValue::Rectangle(crop));
        }

        // stills run with the longest frame duration the exposure profile wants
        if !controls.contains(ControlId::FrameDurationLimits) {
            if config.still {
                controls.set(
                    ControlId::FrameDurationLimits,
                    ControlValue::Integer64Pair(100, 1_000_000_000),
                );
            } else if options.framerate > 0.0 {
                let frame_time = (1_000_000.0 / options.framerate) as i64;
                controls.set(
                    ControlId::FrameDurationLimits,
                    ControlValue::Integer64Pair(frame_time, frame_time),
                );
            }
        }

        if options.shutter != 0 {
            controls.set_default(
                ControlId::ExposureTime,
                ControlValue::Integer(options.shutter as i32),
            );
        }
        if options.gain != 0.0 {
            controls.set_default(ControlId::AnalogueGain, ControlValue::Float(options.gain));
        }
        controls.set_default(
            ControlId::AeMeteringMode,
            ControlValue::Integer(options.metering_index),
        );
        controls.set_default(
            ControlId::AeExposureMode,
            ControlValue::Integer(options.exposure_index),
        );
        controls.set_default(ControlId::ExposureValue, ControlValue::Float(options.ev));
        controls.set_default(ControlId::AwbMode, ControlValue::Integer(options.awb_index));
        if options.awb_gain_r != 0.0 && options.awb_gain_b != 0.0 {
            controls.set_default(
                ControlId::ColourGains,
                ControlValue::FloatPair(options.awb_gain_r, options.awb_gain_b),
            );
        }
        controls.set_default(ControlId::Brightness, ControlValue::Float(options.brightness));
        controls.set_default(ControlId::Contrast, ControlValue::Float(options.contrast));
        controls.set_default(ControlId::Saturation, ControlValue::Float(options.saturation));
        controls.set_default(ControlId::Sharpness, ControlValue::Float(options.sharpness));
        controls.set_default(ControlId::NoiseReductionMode, config.denoise.into());
    }

    /// Stops streaming and forgets everything in flight
    ///
    /// Captures still held by the application stay valid, but releasing them only returns their
    /// buffers to the pool.
    pub fn stop(&mut self) -> Result<()> {
        // the device hands cancelled requests back through the handler, which takes the guard
        let was_running = std::mem::replace(&mut *lock(&self.shared.running), false);
        if was_running {
            self.shared.device.stop()?;
        }

        self.shared.device.set_completion_handler(None);
        lock(&self.shared.known).clear();

        let discarded = self.shared.events.clear();
        if discarded > 0 {
            debug!(discarded, "discarded pending messages");
        }
        if let Some(preview) = &self.preview {
            preview.reset();
        }
        self.shared.requests.drain();
        lock(&self.shared.controls).clear();

        info!("camera stopped");
        Ok(())
    }

    /// Unmaps and releases every buffer and drops the configuration
    ///
    /// Stops the camera first if needed. Calling this without a configuration does nothing.
    pub fn teardown(&mut self) -> Result<()> {
        if self.is_running() {
            self.stop()?;
        }
        if self.configuration.is_none() && self.shared.buffers.is_empty() {
            return Ok(());
        }

        info!("tearing down requests, buffers and configuration");
        self.shared.buffers.teardown_all();
        self.shared.device.release();
        self.configuration = None;
        Ok(())
    }

    /// Stops the preview thread, the camera, and frees everything
    ///
    /// Also run on drop. Calling it again does nothing.
    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Some(preview) = &self.preview {
            preview.abort_and_join();
            let stats = preview.stats();
            info!(
                displayed = stats.displayed,
                dropped = stats.dropped,
                "closing camera application"
            );
        }
        if let Err(err) = self.teardown() {
            error!(%err, "failed to shut down camera");
        }
        self.preview = None;
    }

    /// Blocks until the next message
    ///
    /// Faults raised on other threads (a refused resubmission, a collaborator breaking its
    /// contract) come out of here as errors.
    pub fn wait(&self) -> Result<Message> {
        match self.shared.events.wait() {
            Some(message) => message,
            None => Err(Error::Device("message queue disconnected".to_string())),
        }
    }

    /// Like [`CameraApp::wait`], `None` if nothing arrived within `timeout`
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<Message>> {
        self.shared.events.wait_timeout(timeout)
    }

    pub fn post_message(&self, message: Message) {
        self.shared.events.post(Ok(message));
    }

    pub(crate) fn event_sender(&self) -> Sender<Result<Message>> {
        self.shared.events.sender()
    }

    /// Replaces the controls applied with the next submitted request
    pub fn set_controls(&self, controls: ControlList) {
        *lock(&self.shared.controls) = controls;
    }

    /// Hands a capture to the preview thread
    ///
    /// Returns `false` if there is no preview, or the frame was dropped because the preview is
    /// still busy.
    pub fn show_preview(&self, capture: &CompletedCapturePtr, stream: StreamId) -> bool {
        let preview = match &self.preview {
            Some(preview) => preview,
            None => return false,
        };
        let info = match self.stream_info(stream) {
            Some(info) => info,
            None => {
                warn!(%stream, "cannot preview unknown stream");
                return false;
            }
        };
        let span = capture
            .buffer(stream)
            .and_then(|buffer| self.shared.buffers.lookup(buffer).into_iter().next());

        preview.offer(PreviewItem {
            capture: capture.clone(),
            stream,
            info,
            span,
        })
    }

    /// Looks a stream up by its logical name
    pub fn get_stream(&self, name: &str) -> Option<(StreamId, StreamInfo)> {
        self.configuration
            .as_ref()?
            .streams
            .iter()
            .enumerate()
            .find(|(_, s)| s.name == name)
            .map(|(i, s)| (StreamId(i), s.info()))
    }

    pub fn viewfinder_stream(&self) -> Option<(StreamId, StreamInfo)> {
        self.get_stream("viewfinder")
    }

    pub fn still_stream(&self) -> Option<(StreamId, StreamInfo)> {
        self.get_stream("still")
    }

    pub fn raw_stream(&self) -> Option<(StreamId, StreamInfo)> {
        self.get_stream("raw")
    }

    pub fn video_stream(&self) -> Option<(StreamId, StreamInfo)> {
        self.get_stream("video")
    }

    pub fn lores_stream(&self) -> Option<(StreamId, StreamInfo)> {
        self.get_stream("lores")
    }

    /// The viewfinder, still or video stream, whichever is configured
    pub fn main_stream(&self) -> Option<StreamId> {
        self.configuration
            .as_ref()?
            .streams
            .iter()
            .position(|s| matches!(s.name.as_str(), "viewfinder" | "still" | "video"))
            .map(StreamId)
    }

    pub fn stream_info(&self, stream: StreamId) -> Option<StreamInfo> {
        self.configuration
            .as_ref()?
            .streams
            .get(stream.0)
            .map(|s| s.info())
    }

    /// Mapped spans of `buffer`, empty if it does not belong to this application
    pub fn mmap(&self, buffer: &FrameBuffer) -> Vec<Arc<MappedRegion>> {
        self.shared.buffers.lookup(buffer)
    }

    pub fn is_running(&self) -> bool {
        *lock(&self.shared.running)
    }

    /// Requests waiting for a released capture
    pub fn free_requests(&self) -> usize {
        self.shared.requests.free_count()
    }

    /// Captures that will be resubmitted when released
    pub fn known_captures(&self) -> usize {
        lock(&self.shared.known).len()
    }

    /// Buffers of `stream` neither queued nor held by a capture
    pub fn free_buffers(&self, stream: StreamId) -> usize {
        self.shared.buffers.free_count(stream)
    }

    /// Buffers allocated for `stream`
    pub fn buffer_count(&self, stream: StreamId) -> usize {
        self.shared.buffers.buffer_count(stream)
    }

    pub fn preview_stats(&self) -> Option<PreviewStats> {
        self.preview.as_ref().map(PreviewThread::stats)
    }
}

impl Drop for CameraApp {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::VirtualDevice;
    use crate::stream::{StreamConfig, StreamRole};

    fn started() -> (Arc<VirtualDevice>, CameraApp) {
        let device = Arc::new(VirtualDevice::default());
        let mut app = CameraApp::new(device.clone(), Options::default());
        app.configure(Configuration::new(vec![StreamConfig::new(
            "viewfinder",
            StreamRole::Viewfinder,
        )]))
        .unwrap();
        app.start().unwrap();
        (device, app)
    }

    fn next_capture(app: &CameraApp) -> CompletedCapturePtr {
        match app.wait().unwrap() {
            Message::RequestComplete(capture) => capture,
            Message::Quit => panic!("unexpected quit"),
        }
    }

    #[test]
    fn running_out_of_requests_returns_buffers_to_the_pool() {
        let (device, app) = started();
        assert!(device.complete_next(Timestamp::new(1_000)));
        let capture = next_capture(&app);

        app.shared.requests.drain();
        drop(capture);

        assert_eq!(app.free_buffers(StreamId(0)), 1);
        assert_eq!(device.queued(), 3);
        assert_eq!(app.known_captures(), 0);
    }

    #[test]
    fn released_capture_is_resubmitted_with_pending_controls() {
        let (device, app) = started();
        assert!(device.complete_next(Timestamp::new(1_000)));
        let capture = next_capture(&app);

        let mut controls = ControlList::new();
        controls.set(ControlId::Brightness, ControlValue::Float(0.25));
        app.set_controls(controls.clone());
        drop(capture);

        assert_eq!(device.queued(), 4);
        assert_eq!(device.queued_controls().last(), Some(&controls));
        assert_eq!(app.free_requests(), 0);
    }

    #[test]
    fn cancelled_request_returns_its_buffers() {
        let (device, app) = started();
        assert!(device.cancel_next());

        assert_eq!(app.free_buffers(StreamId(0)), 1);
        assert_eq!(app.free_requests(), 1);
        assert!(app.wait_timeout(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn start_requires_configuration() {
        let mut app = CameraApp::new(Arc::new(VirtualDevice::default()), Options::default());
        assert!(matches!(app.start(), Err(Error::Configuration(_))));
    }
}
