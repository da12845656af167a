use std::collections::VecDeque;
use std::os::unix::io::OwnedFd;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::buffer::{BufferId, BufferMetadata, FrameBuffer, FrameStatus, Plane};
use crate::control::{ControlId, ControlList, ControlValue, Rectangle, Size};
use crate::device::{CompletionHandler, ConfigStatus, Device, Properties};
use crate::error::{Error, Result};
use crate::request::{Request, RequestStatus};
use crate::stream::{StreamConfig, StreamId};
use crate::{sys, FourCC, Timestamp};

/// Settings of a [`VirtualDevice`]
#[derive(Debug, Clone)]
pub struct VirtualConfig {
    /// Buffers per stream when the configuration leaves the count at zero
    pub default_buffer_count: u32,
    /// Stream size when the configuration leaves it at zero
    pub default_size: Size,
    /// Back every plane with its own memory object instead of sharing one per buffer
    pub separate_plane_fds: bool,
    pub properties: Properties,
}

impl Default for VirtualConfig {
    fn default() -> Self {
        VirtualConfig {
            default_buffer_count: 4,
            default_size: Size::new(640, 480),
            separate_plane_fds: false,
            properties: Properties {
                scaler_crop_maximum: Rectangle::new(16, 8, 4056, 3040),
                pixel_array_active_areas: vec![Rectangle::new(0, 0, 4056, 3040)],
            },
        }
    }
}

#[derive(Default)]
struct State {
    streams: Vec<StreamConfig>,
    allocated: Vec<StreamId>,
    started: bool,
    queue: VecDeque<Request>,
    sequence: u32,
    fail_submissions: bool,
    fail_allocation: bool,
    start_controls: ControlList,
    queued_controls: Vec<ControlList>,
}

/// An in-process camera
///
/// Buffers are backed by memfds, so they are mapped by the buffer pool exactly like dmabufs
/// exported by a real driver. Nothing is captured on its own: the owner completes queued
/// requests in FIFO order with [`VirtualDevice::complete_next`], which makes frame pacing fully
/// deterministic.
pub struct VirtualDevice {
    config: VirtualConfig,
    state: Mutex<State>,
    handler: Mutex<Option<Arc<CompletionHandler>>>,
}

impl Default for VirtualDevice {
    fn default() -> Self {
        Self::new(VirtualConfig::default())
    }
}

impl VirtualDevice {
    pub fn new(config: VirtualConfig) -> Self {
        VirtualDevice {
            config,
            state: Mutex::new(State::default()),
            handler: Mutex::new(None),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn dispatch(&self, request: Request) {
        let handler = self
            .handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match handler {
            Some(handler) => (**handler)(request),
            None => debug!(cookie = request.cookie(), "no completion handler, dropping request"),
        }
    }

    /// Completes the oldest queued request as if the sensor captured a frame at `timestamp`
    ///
    /// The driver sequence number is written into the first bytes of every buffer. Returns
    /// `false` if nothing was queued.
    pub fn complete_next(&self, timestamp: Timestamp) -> bool {
        let request = {
            let mut state = self.state();
            let request = state.queue.pop_front();
            if request.is_some() {
                state.sequence += 1;
            }
            request.map(|r| (r, state.sequence))
        };
        let (mut request, sequence) = match request {
            Some(r) => r,
            None => return false,
        };

        let streams: Vec<_> = request
            .buffers()
            .iter()
            .map(|(stream, buffer)| (*stream, buffer.clone()))
            .collect();
        for (stream, buffer) in streams {
            if let Some(plane) = buffer.planes().first() {
                // the payload is only a marker for consumers, failing to write it is harmless
                let _ = sys::pwrite(plane.fd(), &sequence.to_le_bytes(), plane.offset() as usize);
            }
            request.set_buffer_metadata(
                stream,
                BufferMetadata {
                    status: FrameStatus::Success,
                    sequence,
                    timestamp,
                    bytesused: buffer.planes().iter().map(Plane::length).collect(),
                },
            );
        }

        let exposure = request
            .controls()
            .get(ControlId::ExposureTime)
            .cloned()
            .unwrap_or(ControlValue::Integer(10000));
        let gain = request
            .controls()
            .get(ControlId::AnalogueGain)
            .cloned()
            .unwrap_or(ControlValue::Float(1.0));
        let metadata = request.metadata_mut();
        metadata.set(ControlId::ExposureTime, exposure);
        metadata.set(ControlId::AnalogueGain, gain);
        metadata.set(ControlId::DigitalGain, ControlValue::Float(1.0));
        metadata.set(ControlId::ColourGains, ControlValue::FloatPair(1.5, 1.8));
        metadata.set(ControlId::FocusFoM, ControlValue::Integer(100));
        metadata.set(ControlId::AeLocked, ControlValue::Bool(false));

        request.set_status(RequestStatus::Complete);
        self.dispatch(request);
        true
    }

    /// Returns the oldest queued request as cancelled
    pub fn cancel_next(&self) -> bool {
        let request = self.state().queue.pop_front();
        match request {
            Some(mut request) => {
                request.set_status(RequestStatus::Cancelled);
                self.dispatch(request);
                true
            }
            None => false,
        }
    }

    /// Number of requests currently queued
    pub fn queued(&self) -> usize {
        self.state().queue.len()
    }

    /// Buffers of `stream` currently queued in requests
    pub fn queued_buffers(&self, stream: StreamId) -> usize {
        self.state()
            .queue
            .iter()
            .filter(|r| r.buffer(stream).is_some())
            .count()
    }

    pub fn is_started(&self) -> bool {
        self.state().started
    }

    /// Controls the device was started with
    pub fn start_controls(&self) -> ControlList {
        self.state().start_controls.clone()
    }

    /// Controls carried by each queued request, in queueing order
    pub fn queued_controls(&self) -> Vec<ControlList> {
        self.state().queued_controls.clone()
    }

    /// Makes every further submission fail
    pub fn fail_submissions(&self, fail: bool) {
        self.state().fail_submissions = fail;
    }

    /// Makes every further allocation fail
    pub fn fail_allocation(&self, fail: bool) {
        self.state().fail_allocation = fail;
    }

    fn make_buffer(&self, id: BufferId, config: &StreamConfig) -> Result<FrameBuffer> {
        let lengths = plane_lengths(config);
        let name = format!("framepipe-{}", id);

        let planes = if self.config.separate_plane_fds {
            lengths
                .iter()
                .map(|&len| -> Result<Plane> {
                    let fd = sys::memfd(&name, len as usize)?;
                    Ok(Plane::new(Arc::new(fd), 0, len))
                })
                .collect::<Result<Vec<_>>>()?
        } else {
            let total: u32 = lengths.iter().sum();
            let fd: Arc<OwnedFd> = Arc::new(sys::memfd(&name, total as usize)?);
            let mut offset = 0;
            lengths
                .iter()
                .map(|&len| {
                    let plane = Plane::new(fd.clone(), offset, len);
                    offset += len;
                    plane
                })
                .collect()
        };

        Ok(FrameBuffer::new(id, planes))
    }
}

fn plane_lengths(config: &StreamConfig) -> Vec<u32> {
    let luma = config.stride * config.size.height;
    if config.pixel_format == FourCC::YUV420 {
        let chroma = (config.stride / 2) * (config.size.height / 2);
        vec![luma, chroma, chroma]
    } else {
        vec![luma]
    }
}

fn stride_for(format: FourCC, width: u32) -> u32 {
    let bytes_per_row = if format == FourCC::RGB888 || format == FourCC::BGR888 {
        width * 3
    } else if format == FourCC::RAW {
        width * 2
    } else {
        width
    };
    (bytes_per_row + 63) / 64 * 64
}

impl Device for VirtualDevice {
    fn configure(&self, streams: &mut [StreamConfig]) -> Result<ConfigStatus> {
        if streams.is_empty() {
            return Ok(ConfigStatus::Invalid);
        }

        let mut status = ConfigStatus::Valid;
        for stream in streams.iter_mut() {
            if stream.size.is_null() {
                stream.size = self.config.default_size;
                status = ConfigStatus::Adjusted;
            }
            if stream.buffer_count == 0 {
                stream.buffer_count = self.config.default_buffer_count;
                status = ConfigStatus::Adjusted;
            }
            stream.stride = stride_for(stream.pixel_format, stream.size.width);
        }

        let mut state = self.state();
        state.streams = streams.to_vec();
        state.allocated.clear();
        Ok(status)
    }

    fn allocate(&self, stream: StreamId) -> Result<Vec<FrameBuffer>> {
        let config = {
            let mut state = self.state();
            if state.fail_allocation {
                return Err(Error::Allocation(format!("no memory for {}", stream)));
            }
            let config = state
                .streams
                .get(stream.0)
                .cloned()
                .ok_or_else(|| Error::Allocation(format!("{} is not configured", stream)))?;
            state.allocated.push(stream);
            config
        };

        (0..config.buffer_count)
            .map(|index| self.make_buffer(BufferId { stream, index }, &config))
            .collect()
    }

    fn release(&self) {
        self.state().allocated.clear();
    }

    fn start(&self, controls: &ControlList) -> Result<()> {
        let mut state = self.state();
        if state.started {
            return Err(Error::Device("device already started".to_string()));
        }
        state.started = true;
        state.start_controls = controls.clone();
        state.queued_controls.clear();
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        let cancelled: Vec<Request> = {
            let mut state = self.state();
            state.started = false;
            state.queue.drain(..).collect()
        };

        for mut request in cancelled {
            request.set_status(RequestStatus::Cancelled);
            self.dispatch(request);
        }
        Ok(())
    }

    fn queue_request(&self, request: Request) -> Result<()> {
        let mut state = self.state();
        if !state.started || state.fail_submissions {
            return Err(Error::Submit(format!(
                "device refused request {}",
                request.cookie()
            )));
        }
        if !request.is_armed_for(state.streams.len()) {
            return Err(Error::Submit(format!(
                "request {} needs one buffer per stream",
                request.cookie()
            )));
        }

        state.queued_controls.push(request.controls().clone());
        state.queue.push_back(request);
        Ok(())
    }

    fn set_completion_handler(&self, handler: Option<CompletionHandler>) {
        *self.handler.lock().unwrap_or_else(PoisonError::into_inner) = handler.map(Arc::new);
    }

    fn properties(&self) -> Properties {
        self.config.properties.clone()
    }
}
