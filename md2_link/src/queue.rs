//! Bounded command queues.
//!
//! Both queues drop-and-log on overflow.

use md2_common::consts::{PMAC_ASCII_QUEUE_LEN, PMAC_BINARY_QUEUE_LEN};
use md2_proto::header::{Header, MAX_PAYLOAD_LEN};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Instant;

/// A completion callback: invoked with the decoded response (or a
/// transport/protocol error) once the command completes.
pub type CommandCallback = Box<dyn FnOnce(Result<md2_proto::Response, crate::LinkError>) + Send>;

/// One binary-path command queue entry.
pub struct CommandEntry {
    pub header: Header,
    pub payload: Vec<u8>,
    pub reply_expected: bool,
    pub callback: Option<CommandCallback>,
    /// Event name published on completion, if any.
    pub completion_event: Option<String>,
    /// Set when the entry is dequeued and actually sent.
    pub sent_at: Option<Instant>,
}

impl CommandEntry {
    pub fn new(header: Header, payload: Vec<u8>, reply_expected: bool) -> Self {
        assert!(payload.len() <= MAX_PAYLOAD_LEN, "payload exceeds 1492 bytes");
        CommandEntry {
            header,
            payload,
            reply_expected,
            callback: None,
            completion_event: None,
            sent_at: None,
        }
    }

    pub fn with_callback(mut self, callback: CommandCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn with_completion_event(mut self, event: impl Into<String>) -> Self {
        self.completion_event = Some(event.into());
        self
    }
}

/// Bounded FIFO of binary-path command entries.
pub struct CommandQueue {
    items: Mutex<VecDeque<CommandEntry>>,
    capacity: usize,
}

impl CommandQueue {
    pub fn new() -> Self {
        CommandQueue {
            items: Mutex::new(VecDeque::with_capacity(PMAC_BINARY_QUEUE_LEN)),
            capacity: PMAC_BINARY_QUEUE_LEN,
        }
    }

    /// Enqueue `entry`. Returns `false` (and logs) if the queue is at
    /// capacity — the entry is dropped, never blocking the producer.
    pub fn push(&self, entry: CommandEntry) -> bool {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            tracing::warn!("PMAC command queue full ({} entries), dropping request", self.capacity);
            return false;
        }
        items.push_back(entry);
        true
    }

    pub fn pop(&self) -> Option<CommandEntry> {
        self.items.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// One ASCII-mailbox queue entry: a command line plus optional callback.
pub struct AsciiEntry {
    pub line: String,
    pub callback: Option<Box<dyn FnOnce(Result<String, crate::LinkError>) + Send>>,
    /// Set to `true` exactly once by the link when the entry has already
    /// been requeued after a `command-not-allowed-during-program-execution`
    /// error.
    pub requeued: bool,
}

impl AsciiEntry {
    pub fn new(line: impl Into<String>) -> Self {
        AsciiEntry {
            line: line.into(),
            callback: None,
            requeued: false,
        }
    }
}

/// Bounded FIFO feeding the double-buffered ASCII mailbox.
pub struct AsciiQueue {
    items: Mutex<VecDeque<AsciiEntry>>,
    capacity: usize,
}

impl AsciiQueue {
    pub fn new() -> Self {
        AsciiQueue {
            items: Mutex::new(VecDeque::with_capacity(PMAC_ASCII_QUEUE_LEN)),
            capacity: PMAC_ASCII_QUEUE_LEN,
        }
    }

    pub fn push(&self, entry: AsciiEntry) -> bool {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            tracing::warn!("PMAC ASCII queue full ({} entries), dropping request", self.capacity);
            return false;
        }
        items.push_back(entry);
        true
    }

    /// Push back to the *front* of the queue, for the one-time requeue on
    /// error 001.
    pub fn push_front(&self, entry: AsciiEntry) {
        self.items.lock().push_front(entry);
    }

    pub fn pop(&self) -> Option<AsciiEntry> {
        self.items.lock().pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

impl Default for AsciiQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use md2_proto::header::{request_code, request_type};

    fn header() -> Header {
        Header::new(request_type::UPLOAD, request_code::GETMEM, 0x400, 0, 0)
    }

    #[test]
    fn push_pop_preserves_order() {
        let q = CommandQueue::new();
        assert!(q.push(CommandEntry::new(header(), vec![], true)));
        assert!(q.push(CommandEntry::new(header(), vec![1], true)));
        assert_eq!(q.pop().unwrap().payload, Vec::<u8>::new());
        assert_eq!(q.pop().unwrap().payload, vec![1]);
        assert!(q.pop().is_none());
    }

    #[test]
    fn drops_and_reports_false_at_capacity() {
        let q = CommandQueue::new();
        for _ in 0..PMAC_BINARY_QUEUE_LEN {
            assert!(q.push(CommandEntry::new(header(), vec![], false)));
        }
        assert!(!q.push(CommandEntry::new(header(), vec![], false)));
        assert_eq!(q.len(), PMAC_BINARY_QUEUE_LEN);
    }

    #[test]
    fn ascii_requeue_goes_to_front() {
        let q = AsciiQueue::new();
        q.push(AsciiEntry::new("#1j=1000"));
        q.push(AsciiEntry::new("#2j=2000"));
        let mut first = q.pop().unwrap();
        first.requeued = true;
        q.push_front(first);
        let front = q.pop().unwrap();
        assert_eq!(front.line, "#1j=1000");
        assert!(front.requeued);
    }
}
