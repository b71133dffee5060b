//! Bounded FIFO of messages set aside while waiting for a reply.

use std::collections::VecDeque;

use htsp_protocol::{ClientError, HtsMsg};

/// Default capacity of the side queue.
pub const SIDE_QUEUE_CAPACITY: usize = 1000;

/// A bounded FIFO of decoded messages.
///
/// A synchronous request stashes every unrelated message it reads here, and
/// the next plain read drains them in arrival order before touching the
/// socket again.
#[derive(Debug)]
pub struct MessageQueue {
    messages: VecDeque<HtsMsg>,
    capacity: usize,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::with_capacity(SIDE_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            messages: VecDeque::new(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a message.
    ///
    /// Fails once `capacity` messages are held: the peer is flooding or the
    /// reply is never coming.
    pub fn push(&mut self, msg: HtsMsg) -> Result<(), ClientError> {
        self.try_push(msg)
            .map_err(|_| ClientError::QueueOverflow(self.messages.len()))
    }

    /// Like [`push`](Self::push), but a full queue hands the message back.
    pub fn try_push(&mut self, msg: HtsMsg) -> Result<(), HtsMsg> {
        if self.messages.len() >= self.capacity {
            return Err(msg);
        }
        self.messages.push_back(msg);
        Ok(())
    }

    /// Put one already-received message at the head. Capacity is not
    /// enforced.
    pub fn push_front(&mut self, msg: HtsMsg) {
        self.messages.push_front(msg);
    }

    /// Take the oldest message.
    pub fn pop(&mut self) -> Option<HtsMsg> {
        self.messages.pop_front()
    }

    /// Put `earlier` in front of everything currently queued, keeping its
    /// order. Capacity is not enforced here since no message is new.
    pub fn prepend(&mut self, mut earlier: MessageQueue) {
        earlier.messages.append(&mut self.messages);
        self.messages = earlier.messages;
    }

    /// Clear the queue.
    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}
