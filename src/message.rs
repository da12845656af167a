use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::capture::CompletedCapturePtr;

/// Pipeline events delivered to the control thread
#[derive(Debug, Clone)]
pub enum Message {
    /// A capture is ready, the receiver now holds one reference to it
    RequestComplete(CompletedCapturePtr),
    /// The user asked to quit, e.g. by closing the preview window
    Quit,
}

/// Blocking FIFO between any number of producers and the control thread
///
/// Posting never blocks. Messages are consumed in the order they were posted.
pub struct MessageQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> Default for MessageQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> MessageQueue<T> {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        MessageQueue { tx, rx }
    }

    pub fn post(&self, message: T) {
        // the queue owns a receiver, so sending cannot fail
        let _ = self.tx.send(message);
    }

    /// Handle for posting from other threads
    pub fn sender(&self) -> Sender<T> {
        self.tx.clone()
    }

    /// Blocks until a message is available
    ///
    /// Returns `None` only if every sender is gone, which cannot happen while the queue exists.
    pub fn wait(&self) -> Option<T> {
        self.rx.recv().ok()
    }

    /// Like [`MessageQueue::wait`] but gives up after `timeout`
    pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(message) => Some(message),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Discards every queued message, returning how many were dropped
    pub fn clear(&self) -> usize {
        self.rx.try_iter().count()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn messages_keep_posting_order() {
        let queue = MessageQueue::new();
        let tx = queue.sender();
        let producer = thread::spawn(move || {
            for i in 0..100 {
                tx.send(i).unwrap();
            }
        });
        producer.join().unwrap();

        for i in 0..100 {
            assert_eq!(queue.wait(), Some(i));
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn clear_discards_everything() {
        let queue = MessageQueue::new();
        queue.post(Message::Quit);
        queue.post(Message::Quit);

        assert_eq!(queue.clear(), 2);
        assert!(queue.wait_timeout(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn wait_blocks_until_posted() {
        let queue = std::sync::Arc::new(MessageQueue::new());
        let poster = queue.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            poster.post(7u32);
        });

        assert_eq!(queue.wait(), Some(7));
        handle.join().unwrap();
    }
}
