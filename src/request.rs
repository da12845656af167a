use std::collections::BTreeMap;
use std::sync::Arc;

use crate::buffer::{BufferMetadata, FrameBuffer};
use crate::control::ControlList;
use crate::error::{Error, Result};
use crate::stream::StreamId;

/// Request lifecycle as seen by the device
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RequestStatus {
    /// Free or queued, not yet completed
    Pending,
    Complete,
    /// Returned without being processed, e.g. because the device stopped
    Cancelled,
}

/// A reusable unit of work handed to the device
///
/// A request is armed by attaching exactly one buffer per configured stream, then moved into
/// the device with `Device::queue_request`. The device hands it back through the completion
/// handler, after which it is reset with [`Request::reuse`] and kept on the free list.
#[derive(Debug)]
pub struct Request {
    cookie: u64,
    status: RequestStatus,
    buffers: BTreeMap<StreamId, Arc<FrameBuffer>>,
    buffer_metadata: BTreeMap<StreamId, BufferMetadata>,
    controls: ControlList,
    metadata: ControlList,
}

impl Request {
    /// Returns an empty request
    ///
    /// # Arguments
    ///
    /// * `cookie` - Opaque value identifying the request across its reuses
    pub fn new(cookie: u64) -> Self {
        Request {
            cookie,
            status: RequestStatus::Pending,
            buffers: BTreeMap::new(),
            buffer_metadata: BTreeMap::new(),
            controls: ControlList::new(),
            metadata: ControlList::new(),
        }
    }

    pub fn cookie(&self) -> u64 {
        self.cookie
    }

    pub fn status(&self) -> RequestStatus {
        self.status
    }

    pub fn set_status(&mut self, status: RequestStatus) {
        self.status = status;
    }

    /// Attaches `buffer` for `stream`
    ///
    /// Fails if the stream already has a buffer or the buffer belongs to another stream.
    pub fn add_buffer(&mut self, stream: StreamId, buffer: Arc<FrameBuffer>) -> Result<()> {
        if buffer.stream() != stream {
            return Err(Error::Configuration(format!(
                "buffer {} does not belong to {}",
                buffer.id(),
                stream
            )));
        }
        if self.buffers.contains_key(&stream) {
            return Err(Error::Configuration(format!(
                "request {} already has a buffer for {}",
                self.cookie, stream
            )));
        }

        self.buffers.insert(stream, buffer);
        Ok(())
    }

    pub fn buffers(&self) -> &BTreeMap<StreamId, Arc<FrameBuffer>> {
        &self.buffers
    }

    pub fn buffer(&self, stream: StreamId) -> Option<&Arc<FrameBuffer>> {
        self.buffers.get(&stream)
    }

    /// Detaches all buffers, leaving the request empty
    pub fn take_buffers(&mut self) -> BTreeMap<StreamId, Arc<FrameBuffer>> {
        std::mem::take(&mut self.buffers)
    }

    pub fn buffer_metadata(&self, stream: StreamId) -> Option<&BufferMetadata> {
        self.buffer_metadata.get(&stream)
    }

    pub fn set_buffer_metadata(&mut self, stream: StreamId, metadata: BufferMetadata) {
        self.buffer_metadata.insert(stream, metadata);
    }

    pub fn take_buffer_metadata(&mut self) -> BTreeMap<StreamId, BufferMetadata> {
        std::mem::take(&mut self.buffer_metadata)
    }

    /// Controls to apply when this request is processed
    pub fn controls(&self) -> &ControlList {
        &self.controls
    }

    pub fn set_controls(&mut self, controls: ControlList) {
        self.controls = controls;
    }

    /// Metadata reported by the device on completion
    pub fn metadata(&self) -> &ControlList {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut ControlList {
        &mut self.metadata
    }

    pub fn take_metadata(&mut self) -> ControlList {
        std::mem::take(&mut self.metadata)
    }

    /// Whether the request carries exactly one buffer for each of `streams`
    pub fn is_armed_for(&self, streams: usize) -> bool {
        self.buffers.len() == streams && self.buffers.keys().all(|s| s.0 < streams)
    }

    /// Clears buffers, controls and metadata so the request can be armed again
    pub fn reuse(&mut self) {
        self.status = RequestStatus::Pending;
        self.buffers.clear();
        self.buffer_metadata.clear();
        self.controls.clear();
        self.metadata.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferId;

    fn buffer(stream: usize, index: u32) -> Arc<FrameBuffer> {
        Arc::new(FrameBuffer::new(
            BufferId {
                stream: StreamId(stream),
                index,
            },
            Vec::new(),
        ))
    }

    #[test]
    fn one_buffer_per_stream() {
        let mut request = Request::new(0);
        request.add_buffer(StreamId(0), buffer(0, 0)).unwrap();
        assert!(request.add_buffer(StreamId(0), buffer(0, 1)).is_err());
        assert!(request.add_buffer(StreamId(1), buffer(0, 2)).is_err());
        assert!(!request.is_armed_for(2));

        request.add_buffer(StreamId(1), buffer(1, 0)).unwrap();
        assert!(request.is_armed_for(2));
    }

    #[test]
    fn reuse_clears_bindings() {
        let mut request = Request::new(7);
        request.add_buffer(StreamId(0), buffer(0, 0)).unwrap();
        request.set_status(RequestStatus::Complete);
        request.reuse();

        assert_eq!(request.cookie(), 7);
        assert_eq!(request.status(), RequestStatus::Pending);
        assert!(request.buffers().is_empty());
    }
}
