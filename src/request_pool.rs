use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::buffer::FrameBuffer;
use crate::buffer_pool::BufferPool;
use crate::control::ControlList;
use crate::device::Device;
use crate::error::{Error, Result};
use crate::request::Request;
use crate::stream::StreamId;

/// Reusable requests, each armed with one buffer per active stream
///
/// The free list is safe to use from any thread: requests come back from the completion handler
/// while the recycling path pulls them out.
#[derive(Default)]
pub struct RequestPool {
    free: Mutex<VecDeque<Request>>,
    next_cookie: AtomicU64,
    streams: AtomicUsize,
}

impl RequestPool {
    pub fn new() -> Self {
        Self::default()
    }

    fn free(&self) -> MutexGuard<'_, VecDeque<Request>> {
        self.free.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Builds as many armed requests as the free buffers of `streams` streams allow
    ///
    /// Concurrent streams must have matching buffer counts, otherwise nothing is taken from the
    /// pool and a configuration error is returned.
    pub fn make_requests(&self, buffers: &BufferPool, streams: usize) -> Result<Vec<Request>> {
        if streams == 0 {
            return Err(Error::Configuration("no streams configured".to_string()));
        }

        let count = buffers.free_count(StreamId(0));
        for stream in (1..streams).map(StreamId) {
            if buffers.free_count(stream) != count {
                return Err(Error::Configuration(
                    "concurrent streams need matching numbers of buffers".to_string(),
                ));
            }
        }

        let mut requests = Vec::with_capacity(count);
        'outer: for _ in 0..count {
            let mut request = Request::new(self.next_cookie.fetch_add(1, Ordering::Relaxed));
            for stream in (0..streams).map(StreamId) {
                let buffer = match buffers.take(stream) {
                    Some(buffer) => buffer,
                    // someone raced us for the free list, keep what is complete
                    None => {
                        release_buffers(buffers, request.take_buffers());
                        break 'outer;
                    }
                };
                request.add_buffer(stream, buffer)?;
            }
            requests.push(request);
        }

        self.streams.store(streams, Ordering::Relaxed);
        debug!(count = requests.len(), streams, "requests created");
        Ok(requests)
    }

    /// Clears the request's bindings and puts it on the free list
    pub fn recycle(&self, mut request: Request) {
        request.reuse();
        self.free().push_back(request);
    }

    /// Takes the oldest free request
    pub fn pull(&self) -> Option<Request> {
        self.free().pop_front()
    }

    /// Drops every free request
    pub fn drain(&self) {
        self.free().clear();
    }

    /// Number of requests on the free list
    pub fn free_count(&self) -> usize {
        self.free().len()
    }

    /// Arms `request` with one buffer per stream and `controls`, then queues it on `device`
    ///
    /// A refusal from the device is fatal: it means the device is no longer streaming.
    pub fn submit(
        &self,
        device: &dyn Device,
        mut request: Request,
        buffers: BTreeMap<StreamId, Arc<FrameBuffer>>,
        controls: ControlList,
    ) -> Result<()> {
        let streams = self.streams.load(Ordering::Relaxed);
        if buffers.len() != streams {
            return Err(Error::Submit(format!(
                "request {} needs {} buffers, got {}",
                request.cookie(),
                streams,
                buffers.len()
            )));
        }

        for (stream, buffer) in buffers {
            request
                .add_buffer(stream, buffer)
                .map_err(|e| Error::Submit(format!("failed to add buffer to request: {}", e)))?;
        }
        request.set_controls(controls);

        device.queue_request(request)
    }
}

fn release_buffers(pool: &BufferPool, buffers: BTreeMap<StreamId, Arc<FrameBuffer>>) {
    for buffer in buffers.into_values() {
        pool.give_back(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::virtual_device::{VirtualConfig, VirtualDevice};
    use crate::stream::{StreamConfig, StreamRole};

    fn setup(counts: &[u32]) -> (VirtualDevice, BufferPool) {
        let dev = VirtualDevice::new(VirtualConfig::default());
        let mut streams: Vec<_> = counts
            .iter()
            .enumerate()
            .map(|(i, &count)| {
                let mut config = StreamConfig::new(&format!("s{}", i), StreamRole::Viewfinder);
                config.buffer_count = count;
                config
            })
            .collect();
        dev.configure(&mut streams).unwrap();

        let pool = BufferPool::new();
        for i in 0..counts.len() {
            pool.allocate(&dev, StreamId(i)).unwrap();
        }
        (dev, pool)
    }

    #[test]
    fn one_request_per_buffer_set() {
        let (_dev, buffers) = setup(&[3, 3]);
        let requests = RequestPool::new().make_requests(&buffers, 2).unwrap();

        assert_eq!(requests.len(), 3);
        assert!(requests.iter().all(|r| r.is_armed_for(2)));
        assert_eq!(buffers.free_count(StreamId(0)), 0);
        assert_eq!(buffers.free_count(StreamId(1)), 0);
    }

    #[test]
    fn mismatched_buffer_counts_are_rejected() {
        let (_dev, buffers) = setup(&[4, 2]);
        let res = RequestPool::new().make_requests(&buffers, 2);

        assert!(matches!(res, Err(Error::Configuration(_))));
        assert_eq!(buffers.free_count(StreamId(0)), 4);
    }

    #[test]
    fn recycle_and_pull_are_fifo() {
        let pool = RequestPool::new();
        pool.recycle(Request::new(1));
        pool.recycle(Request::new(2));

        assert_eq!(pool.free_count(), 2);
        assert_eq!(pool.pull().unwrap().cookie(), 1);
        pool.drain();
        assert!(pool.pull().is_none());
    }

    #[test]
    fn submit_failure_is_fatal() {
        let (dev, buffers) = setup(&[2]);
        let pool = RequestPool::new();
        let mut requests = pool.make_requests(&buffers, 1).unwrap();
        dev.start(&ControlList::new()).unwrap();
        dev.fail_submissions(true);

        let mut request = requests.remove(0);
        let bound = request.take_buffers();
        let res = pool.submit(&dev, request, bound, ControlList::new());
        assert!(matches!(res, Err(Error::Submit(_))));
    }
}
