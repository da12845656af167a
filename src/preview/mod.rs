//! Preview hand-off.
//!
//! A dedicated thread feeds the display backend from a one-slot mailbox. When the thread is
//! still busy with a frame, newer frames are dropped instead of queued, so the preview always
//! shows something recent and never holds more than two captures (one in the mailbox, one being
//! shown) plus whatever the backend has not released yet.

pub mod null;
pub use null::NullPreview;

use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;
use tracing::{debug, error, info};

use crate::capture::CompletedCapturePtr;
use crate::control::Size;
use crate::error::{Error, Result};
use crate::frame_info::FrameInfo;
use crate::memory::MappedRegion;
use crate::message::Message;
use crate::stream::{StreamId, StreamInfo};
use crate::FourCC;

/// Called by the backend once it no longer reads the buffer behind a descriptor
pub type DoneCallback = Box<dyn Fn(RawFd) + Send + Sync>;

/// The only pixel format the preview accepts
pub const PREVIEW_FORMAT: FourCC = FourCC::YUV420;

/// A display backend
pub trait Preview: Send + Sync {
    /// Presents a frame
    ///
    /// The backend must call the done callback for `fd` once it stops reading `span`, possibly
    /// before returning.
    fn show(&self, fd: RawFd, span: &MappedRegion, info: StreamInfo);

    /// Overlay text for the frames that follow
    fn set_info_text(&self, _text: &str) {}

    /// Whether the user asked to quit, e.g. by closing the window
    fn quit(&self) -> bool {
        false
    }

    /// Drops everything the backend holds without signalling done
    fn reset(&self);

    /// Largest image the backend can show, zero when unbounded
    fn max_image_size(&self) -> Size {
        Size::default()
    }

    fn set_done_callback(&self, callback: DoneCallback);
}

/// A capture waiting to be shown
pub struct PreviewItem {
    pub capture: CompletedCapturePtr,
    pub stream: StreamId,
    pub info: StreamInfo,
    /// First mapped span of the stream's buffer
    pub span: Option<Arc<MappedRegion>>,
}

/// Frames shown and dropped since the thread was started
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct PreviewStats {
    pub displayed: u64,
    pub dropped: u64,
}

#[derive(Default)]
struct Slot {
    item: Option<PreviewItem>,
    abort: bool,
}

/// One-slot exchange between producers and the preview thread
#[derive(Default)]
pub(crate) struct Mailbox {
    slot: Mutex<Slot>,
    cond: Condvar,
}

impl Mailbox {
    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Places `item` if the slot is empty, otherwise hands it back
    pub(crate) fn offer(&self, item: PreviewItem) -> std::result::Result<(), PreviewItem> {
        let mut slot = self.slot();
        let res = if slot.item.is_none() {
            slot.item = Some(item);
            Ok(())
        } else {
            Err(item)
        };
        self.cond.notify_one();
        res
    }

    /// Blocks until an item arrives, returns `None` once aborted
    pub(crate) fn take(&self) -> Option<PreviewItem> {
        let mut slot = self.slot();
        loop {
            if slot.abort {
                return None;
            }
            if let Some(item) = slot.item.take() {
                return Some(item);
            }
            slot = self.cond.wait(slot).unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub(crate) fn clear(&self) -> Option<PreviewItem> {
        self.slot().item.take()
    }

    pub(crate) fn abort(&self) {
        self.slot().abort = true;
        self.cond.notify_one();
    }

    pub(crate) fn is_occupied(&self) -> bool {
        self.slot().item.is_some()
    }
}

struct Shared {
    mailbox: Mailbox,
    retained: Mutex<HashMap<RawFd, CompletedCapturePtr>>,
    displayed: AtomicU64,
    dropped: AtomicU64,
    quit_posted: AtomicBool,
    events: Sender<Result<Message>>,
}

impl Shared {
    fn retained(&self) -> MutexGuard<'_, HashMap<RawFd, CompletedCapturePtr>> {
        self.retained.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fault(&self, err: Error) {
        error!(%err, "preview fault");
        let _ = self.events.send(Err(err));
    }

    fn done(&self, fd: RawFd) {
        let capture = self.retained().remove(&fd);
        match capture {
            // dropped here, outside the lock, since the last reference recycles the buffers
            Some(capture) => drop(capture),
            None => self.fault(Error::ProtocolViolation(format!(
                "preview signalled done for unknown fd {}",
                fd
            ))),
        }
    }

    fn present(&self, item: PreviewItem, backend: &dyn Preview, info_text: &str) {
        if item.info.pixel_format != PREVIEW_FORMAT {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            self.fault(Error::Configuration(format!(
                "preview only supports {}, got {}",
                PREVIEW_FORMAT, item.info.pixel_format
            )));
            return;
        }

        let fd = item.capture.buffer(item.stream).and_then(|b| b.fd());
        let (fd, span) = match (fd, item.span) {
            (Some(fd), Some(span)) => (fd, span),
            _ => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                self.fault(Error::Configuration(format!(
                    "capture {} has no mapped buffer for {}",
                    item.capture.sequence(),
                    item.stream
                )));
                return;
            }
        };

        let frame_info = FrameInfo::from_capture(&item.capture);
        let replaced = self.retained().insert(fd, item.capture);
        if replaced.is_some() {
            debug!(fd, "backend still held a frame on this descriptor");
        }
        drop(replaced);

        if backend.quit() && !self.quit_posted.swap(true, Ordering::SeqCst) {
            info!("preview window has quit");
            let _ = self.events.send(Ok(Message::Quit));
        }

        self.displayed.fetch_add(1, Ordering::Relaxed);
        backend.show(fd, &span, item.info);
        if !info_text.is_empty() {
            backend.set_info_text(&frame_info.format(info_text));
        }
    }
}

/// The preview hand-off thread and its mailbox
pub struct PreviewThread {
    shared: Arc<Shared>,
    backend: Arc<dyn Preview>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PreviewThread {
    /// Starts the thread feeding `backend`
    ///
    /// # Arguments
    ///
    /// * `backend` - Display backend, its done callback is replaced
    /// * `info_text` - Overlay template, see [`FrameInfo::format`], empty for none
    /// * `events` - Where quit requests and faults are posted
    pub fn spawn(
        backend: Arc<dyn Preview>,
        info_text: String,
        events: Sender<Result<Message>>,
    ) -> io::Result<Self> {
        let shared = Arc::new(Shared {
            mailbox: Mailbox::default(),
            retained: Mutex::new(HashMap::new()),
            displayed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            quit_posted: AtomicBool::new(false),
            events,
        });

        let weak: Weak<Shared> = Arc::downgrade(&shared);
        backend.set_done_callback(Box::new(move |fd| {
            if let Some(shared) = weak.upgrade() {
                shared.done(fd);
            }
        }));

        let thread_shared = shared.clone();
        let thread_backend = backend.clone();
        let handle = thread::Builder::new()
            .name("preview".to_string())
            .spawn(move || {
                while let Some(item) = thread_shared.mailbox.take() {
                    thread_shared.present(item, &*thread_backend, &info_text);
                }
                debug!("preview thread exiting");
            })?;

        Ok(PreviewThread {
            shared,
            backend,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Hands a capture to the preview, or drops it if the previous one was not picked up yet
    ///
    /// Returns whether the item was accepted.
    pub fn offer(&self, item: PreviewItem) -> bool {
        match self.shared.mailbox.offer(item) {
            Ok(()) => true,
            Err(rejected) => {
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                drop(rejected);
                false
            }
        }
    }

    /// Releases the reference retained for `fd`, as the backend's done callback does
    pub fn done(&self, fd: RawFd) {
        self.shared.done(fd);
    }

    /// Empties the mailbox, forgets every retained frame and resets the backend
    pub fn reset(&self) {
        let pending = self.shared.mailbox.clear();
        let retained: Vec<_> = self.shared.retained().drain().map(|(_, c)| c).collect();
        self.backend.reset();
        drop(pending);
        drop(retained);
    }

    /// Asks the thread to exit and waits for it
    ///
    /// Does nothing if the thread was already joined.
    pub fn abort_and_join(&self) {
        self.shared.mailbox.abort();
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("preview thread panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(false, |h| !h.is_finished())
    }

    pub fn stats(&self) -> PreviewStats {
        PreviewStats {
            displayed: self.shared.displayed.load(Ordering::Relaxed),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
        }
    }

    /// Number of frames the backend has not released yet
    pub fn retained(&self) -> usize {
        self.shared.retained().len()
    }

    pub fn max_image_size(&self) -> Size {
        self.backend.max_image_size()
    }

    pub fn is_mailbox_occupied(&self) -> bool {
        self.shared.mailbox.is_occupied()
    }
}

impl Drop for PreviewThread {
    fn drop(&mut self) {
        self.abort_and_join();
    }
}
