use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::buffer::{BufferMetadata, FrameBuffer};
use crate::control::ControlList;
use crate::stream::StreamId;
use crate::Timestamp;

/// Buffers of one capture, keyed by the stream they belong to
pub type BufferMap = BTreeMap<StreamId, Arc<FrameBuffer>>;

/// Hook run exactly once, with the capture's buffers, when the last reference goes away
pub type ReleaseHook = Box<dyn FnOnce(u64, BufferMap) + Send + Sync>;

/// Shared handle to a completed capture
pub type CompletedCapturePtr = Arc<CompletedCapture>;

/// One completed exposure cycle: a buffer per active stream plus what the device reported
///
/// Captures are shared between the control thread, the preview and the encoder. Their buffers
/// are recycled when the last [`CompletedCapturePtr`] is dropped.
pub struct CompletedCapture {
    sequence: u64,
    buffers: BufferMap,
    buffer_metadata: BTreeMap<StreamId, BufferMetadata>,
    metadata: ControlList,
    framerate: f32,
    release: Option<ReleaseHook>,
}

impl CompletedCapture {
    /// Returns a capture without a release hook
    ///
    /// # Arguments
    ///
    /// * `sequence` - Pipeline sequence number, strictly increasing over the pipeline lifetime
    /// * `buffers` - One buffer per stream
    /// * `buffer_metadata` - Per buffer metadata reported by the device
    /// * `metadata` - Capture metadata reported by the device
    pub fn new(
        sequence: u64,
        buffers: BufferMap,
        buffer_metadata: BTreeMap<StreamId, BufferMetadata>,
        metadata: ControlList,
    ) -> Self {
        CompletedCapture {
            sequence,
            buffers,
            buffer_metadata,
            metadata,
            framerate: 0.0,
            release: None,
        }
    }

    /// Installs the hook receiving the buffers once the capture is dropped
    pub fn with_release(mut self, hook: ReleaseHook) -> Self {
        self.release = Some(hook);
        self
    }

    pub fn with_framerate(mut self, framerate: f32) -> Self {
        self.framerate = framerate;
        self
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn buffers(&self) -> &BufferMap {
        &self.buffers
    }

    pub fn buffer(&self, stream: StreamId) -> Option<&Arc<FrameBuffer>> {
        self.buffers.get(&stream)
    }

    pub fn buffer_metadata(&self, stream: StreamId) -> Option<&BufferMetadata> {
        self.buffer_metadata.get(&stream)
    }

    pub fn metadata(&self) -> &ControlList {
        &self.metadata
    }

    /// Instantaneous frame rate derived from the previous capture, zero if unknown
    pub fn framerate(&self) -> f32 {
        self.framerate
    }

    /// Sensor timestamp of the first stream's buffer
    pub fn timestamp(&self) -> Timestamp {
        self.buffer_metadata
            .values()
            .next()
            .map(|m| m.timestamp)
            .unwrap_or_default()
    }
}

impl fmt::Debug for CompletedCapture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletedCapture")
            .field("sequence", &self.sequence)
            .field("buffers", &self.buffers.keys().collect::<Vec<_>>())
            .field("framerate", &self.framerate)
            .finish()
    }
}

impl Drop for CompletedCapture {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release(self.sequence, std::mem::take(&mut self.buffers));
        }
    }
}

/// Instantaneous frame rate between two sensor timestamps
///
/// Zero for the first frame (no previous timestamp) and for a repeated timestamp.
///
/// # Example
///
/// ```
/// use framepipe::capture::framerate;
/// use framepipe::Timestamp;
///
/// assert_eq!(framerate(Timestamp::new(0), Timestamp::new(5_000)), 0.0);
/// assert_eq!(framerate(Timestamp::new(1_000_000_000), Timestamp::new(1_040_000_000)), 25.0);
/// ```
pub fn framerate(previous: Timestamp, current: Timestamp) -> f32 {
    if previous.nsec == 0 || previous == current {
        return 0.0;
    }

    let delta = current.nsec as f64 - previous.nsec as f64;
    (1e9 / delta) as f32
}
