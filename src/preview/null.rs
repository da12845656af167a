use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::memory::MappedRegion;
use crate::preview::{DoneCallback, Preview};
use crate::stream::StreamInfo;

/// Backend that displays nothing and releases every frame right away
#[derive(Default)]
pub struct NullPreview {
    done: Mutex<Option<DoneCallback>>,
    shown: AtomicU64,
    info_text: Mutex<String>,
    quit: AtomicBool,
}

impl NullPreview {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames passed to [`Preview::show`] so far
    pub fn shown(&self) -> u64 {
        self.shown.load(Ordering::Relaxed)
    }

    /// Last overlay text received
    pub fn info_text(&self) -> String {
        self.info_text
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Reports a quit request from the next frame on
    pub fn request_quit(&self) {
        self.quit.store(true, Ordering::Relaxed);
    }
}

impl Preview for NullPreview {
    fn show(&self, fd: RawFd, _span: &MappedRegion, _info: StreamInfo) {
        self.shown.fetch_add(1, Ordering::Relaxed);
        if let Some(done) = self
            .done
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            done(fd);
        }
    }

    fn set_info_text(&self, text: &str) {
        *self.info_text.lock().unwrap_or_else(PoisonError::into_inner) = text.to_string();
    }

    fn quit(&self) -> bool {
        self.quit.load(Ordering::Relaxed)
    }

    fn reset(&self) {}

    fn set_done_callback(&self, callback: DoneCallback) {
        *self.done.lock().unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }
}
