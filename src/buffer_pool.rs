use std::collections::{BTreeMap, HashMap, VecDeque};
use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::buffer::{BufferId, FrameBuffer, Plane};
use crate::device::Device;
use crate::error::{Error, Result};
use crate::memory::MappedRegion;
use crate::stream::StreamId;

/// Groups the planes of a buffer into the spans that have to be mapped
///
/// Consecutive planes living in the same memory object are coalesced into one span whose size is
/// the sum of their lengths. A plane whose descriptor differs from its successor ends the current
/// span.
pub fn coalesce_planes(planes: &[Plane]) -> Vec<(RawFd, usize)> {
    let mut spans = Vec::new();
    let mut size = 0;

    for (i, plane) in planes.iter().enumerate() {
        size += plane.length() as usize;
        let last = i == planes.len() - 1;
        if last || plane.fd() != planes[i + 1].fd() {
            spans.push((plane.fd(), size));
            size = 0;
        }
    }

    spans
}

struct Mapping {
    buffer: Arc<FrameBuffer>,
    spans: Vec<Arc<MappedRegion>>,
}

#[derive(Default)]
struct Inner {
    buffers: BTreeMap<StreamId, Vec<Arc<FrameBuffer>>>,
    free: BTreeMap<StreamId, VecDeque<Arc<FrameBuffer>>>,
    mapped: HashMap<BufferId, Mapping>,
}

/// Owns the hardware buffers of every configured stream and their mappings
///
/// Each buffer is mapped once when it is allocated. Buffers not bound to a request or held by a
/// capture sit on a per-stream FIFO free list.
#[derive(Default)]
pub struct BufferPool {
    inner: Mutex<Inner>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocates the buffers of `stream` from `device` and maps each of them
    ///
    /// Returns the number of buffers now owned for the stream.
    pub fn allocate(&self, device: &dyn Device, stream: StreamId) -> Result<usize> {
        let buffers = device.allocate(stream)?;
        if buffers.is_empty() {
            return Err(Error::Allocation(format!("no buffers provided for {}", stream)));
        }

        // map everything before publishing anything, a failure unmaps what was done so far
        let mut mappings = Vec::with_capacity(buffers.len());
        for buffer in buffers {
            let buffer = Arc::new(buffer);
            let spans = coalesce_planes(buffer.planes())
                .into_iter()
                .map(|(fd, len)| {
                    MappedRegion::map(fd, len).map(Arc::new).map_err(|e| {
                        Error::Allocation(format!("failed to map buffer {}: {}", buffer.id(), e))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            mappings.push(Mapping { buffer, spans });
        }

        let count = mappings.len();
        let mut inner = self.inner();
        for mapping in mappings {
            inner
                .buffers
                .entry(stream)
                .or_default()
                .push(mapping.buffer.clone());
            inner
                .free
                .entry(stream)
                .or_default()
                .push_back(mapping.buffer.clone());
            inner.mapped.insert(mapping.buffer.id(), mapping);
        }
        debug!(%stream, count, "buffers allocated and mapped");

        Ok(count)
    }

    /// Returns the mapped spans of `buffer`, or nothing if the pool does not know it
    pub fn lookup(&self, buffer: &FrameBuffer) -> Vec<Arc<MappedRegion>> {
        let inner = self.inner();
        match inner.mapped.get(&buffer.id()) {
            Some(mapping) if std::ptr::eq(&*mapping.buffer, buffer) => mapping.spans.clone(),
            _ => Vec::new(),
        }
    }

    /// Drops every buffer and mapping
    ///
    /// Regions are unmapped as soon as nobody else holds them, which after an orderly shutdown
    /// is right here. Calling this on an empty pool does nothing.
    pub fn teardown_all(&self) {
        let mut inner = self.inner();
        if !inner.mapped.is_empty() {
            debug!(count = inner.mapped.len(), "unmapping buffers");
        }
        inner.mapped.clear();
        inner.free.clear();
        inner.buffers.clear();
    }

    /// Pops the oldest free buffer of `stream`
    pub fn take(&self, stream: StreamId) -> Option<Arc<FrameBuffer>> {
        self.inner().free.get_mut(&stream)?.pop_front()
    }

    /// Puts a buffer back on its stream's free list
    ///
    /// Buffers of a previous configuration are dropped.
    pub fn give_back(&self, buffer: Arc<FrameBuffer>) {
        let mut inner = self.inner();
        let known = inner
            .mapped
            .get(&buffer.id())
            .map_or(false, |m| Arc::ptr_eq(&m.buffer, &buffer));
        if !known {
            debug!(buffer = %buffer.id(), "dropping buffer of a stale configuration");
            return;
        }
        inner.free.entry(buffer.stream()).or_default().push_back(buffer);
    }

    /// Number of buffers of `stream` on the free list
    pub fn free_count(&self, stream: StreamId) -> usize {
        self.inner().free.get(&stream).map_or(0, VecDeque::len)
    }

    /// Number of buffers owned for `stream`
    pub fn buffer_count(&self, stream: StreamId) -> usize {
        self.inner().buffers.get(&stream).map_or(0, Vec::len)
    }

    /// Streams that have buffers
    pub fn streams(&self) -> Vec<StreamId> {
        self.inner().buffers.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.inner().buffers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::virtual_device::{VirtualConfig, VirtualDevice};
    use crate::stream::{StreamConfig, StreamRole};
    use crate::sys;

    fn device(separate_plane_fds: bool) -> VirtualDevice {
        let dev = VirtualDevice::new(VirtualConfig {
            separate_plane_fds,
            ..VirtualConfig::default()
        });
        let mut streams = [StreamConfig::new("viewfinder", StreamRole::Viewfinder)];
        dev.configure(&mut streams).unwrap();
        dev
    }

    #[test]
    fn planes_sharing_a_descriptor_become_one_span() {
        let shared = Arc::new(sys::memfd("coalesce", 64).unwrap());
        let other = Arc::new(sys::memfd("coalesce", 64).unwrap());
        let planes = vec![
            Plane::new(shared.clone(), 0, 16),
            Plane::new(shared.clone(), 16, 8),
            Plane::new(other.clone(), 0, 32),
            Plane::new(shared.clone(), 24, 4),
        ];

        let spans = coalesce_planes(&planes);
        let fds: Vec<_> = spans.iter().map(|s| s.0).collect();
        let sizes: Vec<_> = spans.iter().map(|s| s.1).collect();

        assert_eq!(fds, [planes[0].fd(), planes[2].fd(), planes[3].fd()]);
        assert_eq!(sizes, [24, 32, 4]);
        assert!(coalesce_planes(&[]).is_empty());
    }

    #[test]
    fn shared_planes_are_mapped_once() {
        let dev = device(false);
        let pool = BufferPool::new();
        assert_eq!(pool.allocate(&dev, StreamId(0)).unwrap(), 4);

        let buffer = pool.take(StreamId(0)).unwrap();
        let spans = pool.lookup(&buffer);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].len(), buffer.len());
    }

    #[test]
    fn separate_planes_are_mapped_separately() {
        let dev = device(true);
        let pool = BufferPool::new();
        pool.allocate(&dev, StreamId(0)).unwrap();

        let buffer = pool.take(StreamId(0)).unwrap();
        let spans = pool.lookup(&buffer);
        assert_eq!(spans.len(), 3);
        assert_eq!(spans[0].len(), 640 * 480);
    }

    #[test]
    fn lookup_of_unknown_buffer_is_empty() {
        let pool = BufferPool::new();
        let buffer = FrameBuffer::new(
            BufferId {
                stream: StreamId(0),
                index: 0,
            },
            Vec::new(),
        );
        assert!(pool.lookup(&buffer).is_empty());
    }

    #[test]
    fn teardown_unmaps_once_and_is_idempotent() {
        let dev = device(false);
        let pool = BufferPool::new();
        pool.allocate(&dev, StreamId(0)).unwrap();

        let buffer = pool.take(StreamId(0)).unwrap();
        let region = Arc::downgrade(&pool.lookup(&buffer)[0]);
        assert!(region.upgrade().is_some());

        pool.teardown_all();
        assert!(region.upgrade().is_none());
        assert!(pool.lookup(&buffer).is_empty());
        assert!(pool.is_empty());

        pool.teardown_all();
        assert!(pool.is_empty());
    }

    #[test]
    fn free_list_is_fifo() {
        let dev = device(false);
        let pool = BufferPool::new();
        pool.allocate(&dev, StreamId(0)).unwrap();

        let first = pool.take(StreamId(0)).unwrap();
        let second = pool.take(StreamId(0)).unwrap();
        assert_eq!(first.id().index, 0);
        assert_eq!(second.id().index, 1);

        pool.give_back(first.clone());
        assert_eq!(pool.free_count(StreamId(0)), 3);
        assert_eq!(pool.take(StreamId(0)).unwrap().id().index, 2);
        assert_eq!(pool.take(StreamId(0)).unwrap().id().index, 3);
        assert_eq!(pool.take(StreamId(0)).unwrap().id().index, 0);
    }

    #[test]
    fn allocation_failure_is_reported() {
        let dev = device(false);
        dev.fail_allocation(true);
        let pool = BufferPool::new();
        assert!(matches!(
            pool.allocate(&dev, StreamId(0)),
            Err(Error::Allocation(_))
        ));
        assert!(pool.is_empty());
    }
}
