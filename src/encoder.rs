use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam_channel::Sender;
use tracing::{debug, error};

use crate::app::CameraApp;
use crate::capture::CompletedCapturePtr;
use crate::error::{Error, Result};
use crate::memory::MappedRegion;
use crate::message::Message;
use crate::stream::StreamId;

/// Called by the encoder each time it is done reading an input buffer
pub type InputDoneCallback = Box<dyn Fn() + Send + Sync>;

/// Receives encoded data: payload, timestamp in microseconds and whether it is a keyframe
pub type OutputReadyCallback = Box<dyn Fn(&[u8], i64, bool) + Send + Sync>;

/// One frame handed to an encoder
#[derive(Debug)]
pub struct EncodeInput<'a> {
    pub fd: RawFd,
    pub size: usize,
    pub span: &'a MappedRegion,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub timestamp_us: i64,
}

/// A video encoder
///
/// Input buffers are assumed to be released in the order they were submitted, since the input
/// done callback does not say which buffer it refers to.
pub trait Encoder: Send {
    fn encode_buffer(&mut self, input: EncodeInput<'_>) -> Result<()>;

    fn set_input_done_callback(&mut self, callback: InputDoneCallback);

    fn set_output_ready_callback(&mut self, callback: OutputReadyCallback);
}

/// Captures whose buffers are being read by the encoder, oldest first
#[derive(Debug, Default)]
pub struct EncoderQueue {
    queue: Mutex<VecDeque<CompletedCapturePtr>>,
}

impl EncoderQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<CompletedCapturePtr>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, capture: CompletedCapturePtr) {
        self.queue().push_back(capture);
    }

    /// Releases the oldest capture
    ///
    /// More completions than submissions is a breach of the encoder contract.
    pub fn input_done(&self) -> Result<()> {
        let capture = self.queue().pop_front();
        match capture {
            Some(capture) => {
                drop(capture);
                Ok(())
            }
            None => Err(Error::ProtocolViolation(
                "no buffer available to return".to_string(),
            )),
        }
    }

    /// Takes back the newest capture, for a submission the encoder refused
    fn cancel_last(&self) -> Option<CompletedCapturePtr> {
        self.queue().pop_back()
    }

    /// Releases everything still queued, returning how many captures were dropped
    pub fn clear(&self) -> usize {
        let drained: Vec<_> = self.queue().drain(..).collect();
        drained.len()
    }

    pub fn len(&self) -> usize {
        self.queue().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue().is_empty()
    }
}

type OutputReady = Arc<dyn Fn(&[u8], i64, bool) + Send + Sync>;

/// A [`CameraApp`] feeding an [`Encoder`]
pub struct CameraEncoder {
    app: CameraApp,
    queue: Arc<EncoderQueue>,
    encoder: Mutex<Option<Box<dyn Encoder>>>,
    output_ready: Option<OutputReady>,
}

impl CameraEncoder {
    pub fn new(app: CameraApp) -> Self {
        CameraEncoder {
            app,
            queue: Arc::new(EncoderQueue::new()),
            encoder: Mutex::new(None),
            output_ready: None,
        }
    }

    fn encoder(&self) -> MutexGuard<'_, Option<Box<dyn Encoder>>> {
        self.encoder.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Where encoded data goes, takes effect with the next [`CameraEncoder::start_encoder`]
    pub fn set_encode_output_ready_callback(
        &mut self,
        callback: impl Fn(&[u8], i64, bool) + Send + Sync + 'static,
    ) {
        self.output_ready = Some(Arc::new(callback));
    }

    /// Wires `encoder` to the buffer queue and the output callback
    pub fn start_encoder(&mut self, mut encoder: Box<dyn Encoder>) {
        let queue = self.queue.clone();
        let events: Sender<Result<Message>> = self.app.event_sender();
        encoder.set_input_done_callback(Box::new(move || {
            if let Err(err) = queue.input_done() {
                error!(%err, "encoder fault");
                let _ = events.send(Err(err));
            }
        }));

        let output_ready = self.output_ready.clone();
        encoder.set_output_ready_callback(Box::new(move |data: &[u8], timestamp_us: i64, keyframe: bool| {
            if let Some(output_ready) = &output_ready {
                output_ready(data, timestamp_us, keyframe);
            }
        }));

        let previous = self.encoder().replace(encoder);
        drop(previous);
        debug!("encoder started");
    }

    /// Passes the buffer of `stream` to the encoder, keeping `capture` alive until it is done
    pub fn encode_buffer(&self, capture: &CompletedCapturePtr, stream: StreamId) -> Result<()> {
        let info = self
            .app
            .stream_info(stream)
            .ok_or_else(|| Error::Configuration(format!("{} is not configured", stream)))?;
        let buffer = capture
            .buffer(stream)
            .ok_or_else(|| Error::Configuration("no buffer to encode".to_string()))?;
        let span = self
            .app
            .mmap(buffer)
            .into_iter()
            .next()
            .ok_or_else(|| Error::Configuration("no buffer to encode".to_string()))?;
        let fd = buffer
            .fd()
            .ok_or_else(|| Error::Configuration("no buffer to encode".to_string()))?;
        let timestamp = capture
            .buffer_metadata(stream)
            .map(|m| m.timestamp)
            .unwrap_or_default();

        let mut encoder = self.encoder();
        let encoder = encoder
            .as_mut()
            .ok_or_else(|| Error::Configuration("encoder not started".to_string()))?;

        self.queue.push(capture.clone());
        let res = encoder.encode_buffer(EncodeInput {
            fd,
            size: span.len(),
            span: &span,
            width: info.width,
            height: info.height,
            stride: info.stride,
            timestamp_us: timestamp.as_micros(),
        });
        if res.is_err() {
            drop(self.queue.cancel_last());
        }
        res
    }

    /// Drops the encoder and every capture it still held
    pub fn stop_encoder(&mut self) {
        let encoder = self.encoder().take();
        drop(encoder);
        let dropped = self.queue.clear();
        if dropped > 0 {
            debug!(dropped, "released captures still queued for encoding");
        }
    }

    /// Captures currently held for the encoder
    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}

impl Deref for CameraEncoder {
    type Target = CameraApp;

    fn deref(&self) -> &CameraApp {
        &self.app
    }
}

impl DerefMut for CameraEncoder {
    fn deref_mut(&mut self) -> &mut CameraApp {
        &mut self.app
    }
}

impl Drop for CameraEncoder {
    fn drop(&mut self) {
        self.stop_encoder();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{BufferMap, CompletedCapture};
    use crate::control::ControlList;
    use std::collections::BTreeMap;

    fn capture(sequence: u64, released: &Arc<Mutex<Vec<u64>>>) -> CompletedCapturePtr {
        let released = released.clone();
        Arc::new(
            CompletedCapture::new(sequence, BufferMap::new(), BTreeMap::new(), ControlList::new())
                .with_release(Box::new(move |sequence, _| {
                    released.lock().unwrap().push(sequence);
                })),
        )
    }

    #[test]
    fn captures_are_released_in_submission_order() {
        let released = Arc::new(Mutex::new(Vec::new()));
        let queue = EncoderQueue::new();
        for sequence in 0..3 {
            queue.push(capture(sequence, &released));
        }

        for _ in 0..3 {
            queue.input_done().unwrap();
        }
        assert_eq!(*released.lock().unwrap(), [0, 1, 2]);
        assert!(matches!(
            queue.input_done(),
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[test]
    fn clear_releases_everything() {
        let released = Arc::new(Mutex::new(Vec::new()));
        let queue = EncoderQueue::new();
        queue.push(capture(5, &released));
        queue.push(capture(6, &released));

        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
        assert_eq!(released.lock().unwrap().len(), 2);
    }
}
