use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};
use std::sync::Arc;
use std::fmt;

use crate::stream::StreamId;
use crate::Timestamp;

/// Outcome of a buffer (or request) as reported by the driver
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FrameStatus {
    /// Buffer is ready
    Success,
    /// Buffer is ready, but the data contained within is corrupted
    Error,
    /// Buffer was returned without being filled
    Cancelled,
}

impl Default for FrameStatus {
    fn default() -> Self {
        FrameStatus::Success
    }
}

/// Buffer metadata, filled in by the device when a request completes
#[derive(Debug, Default, Clone)]
pub struct BufferMetadata {
    pub status: FrameStatus,
    /// Sequence number, counting the frames as seen by the driver
    pub sequence: u32,
    /// Time of capture
    pub timestamp: Timestamp,
    /// Bytes used per plane
    pub bytesused: Vec<u32>,
}

/// One physical memory plane of a buffer
///
/// Planes of a single-plane format that are exposed as multi-planar share one memory object,
/// which is how the buffer pool decides to map them as one contiguous span.
#[derive(Debug, Clone)]
pub struct Plane {
    fd: Arc<OwnedFd>,
    offset: u32,
    length: u32,
}

impl Plane {
    /// Returns a plane description
    ///
    /// # Arguments
    ///
    /// * `fd` - Memory object backing the plane, shared by planes living in the same object
    /// * `offset` - Offset of the plane inside the memory object
    /// * `length` - Size of the plane in bytes
    pub fn new(fd: Arc<OwnedFd>, offset: u32, length: u32) -> Self {
        Plane { fd, offset, length }
    }

    /// Raw descriptor of the backing memory object
    pub fn fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn length(&self) -> u32 {
        self.length
    }
}

/// Identifies a buffer within its stream
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId {
    pub stream: StreamId,
    pub index: u32,
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.stream, self.index)
    }
}

/// A hardware-backed frame buffer
///
/// Owned by the buffer pool for the lifetime of a configuration and shared by reference with
/// requests and captures. Buffers are never allocated or freed per frame.
#[derive(Debug)]
pub struct FrameBuffer {
    id: BufferId,
    planes: Vec<Plane>,
}

impl FrameBuffer {
    pub fn new(id: BufferId, planes: Vec<Plane>) -> Self {
        FrameBuffer { id, planes }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn stream(&self) -> StreamId {
        self.id.stream
    }

    pub fn planes(&self) -> &[Plane] {
        &self.planes
    }

    /// Descriptor of the first plane, which identifies the buffer towards display and encoder
    /// backends
    pub fn fd(&self) -> Option<RawFd> {
        self.planes.first().map(Plane::fd)
    }

    /// Sum of all plane lengths
    pub fn len(&self) -> usize {
        self.planes.iter().map(|p| p.length as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
