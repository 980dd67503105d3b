// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bounded per-task message rings.
//!
//! Every task slot owns one ring of `QUEUE_DEPTH` fixed-size messages.
//! Sending never blocks: a full ring is an error the sender deals with.
//! Receiving never blocks either; an empty ring reports `WouldBlock` and
//! the receiver decides whether to yield and retry.
//!
//! There are many ways of implementing a circular buffer; this one uses
//! explicit head/tail/count fields and none of the arithmetical tricks,
//! because being obviously correct matters more here than being clever.

use abi::{SysError, MAX_MESSAGE_DATA, QUEUE_DEPTH};

use crate::time::Timestamp;

/// One queued message.
#[derive(Copy, Clone, Debug)]
pub struct Message {
    from: usize,
    to: usize,
    len: usize,
    data: [u8; MAX_MESSAGE_DATA],
    timestamp: Timestamp,
    valid: bool,
}

impl Message {
    fn vacant() -> Self {
        Self {
            from: 0,
            to: 0,
            len: 0,
            data: [0; MAX_MESSAGE_DATA],
            timestamp: Timestamp::default(),
            valid: false,
        }
    }

    /// When the message was sent, by the sender's clock reading.
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
}

/// Circular message ring: `count` always equals the number of queued
/// messages and stays within `[0, QUEUE_DEPTH]`, with
/// `count == (tail - head) mod QUEUE_DEPTH` except when full.
pub struct MessageQueue {
    ring: [Message; QUEUE_DEPTH],
    head: usize,
    tail: usize,
    count: usize,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self {
            ring: [Message::vacant(); QUEUE_DEPTH],
            head: 0,
            tail: 0,
            count: 0,
        }
    }

    /// Empties the ring. Done when a task slot is (re)created so a new task
    /// cannot inherit a predecessor's mail.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Number of messages waiting.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_full(&self) -> bool {
        self.count >= QUEUE_DEPTH
    }

    /// Enqueues a copy of `data` at the tail. Fails with `InvalidParam` for
    /// oversized payloads and `NoMemory` when the ring is full.
    pub fn push(
        &mut self,
        from: usize,
        to: usize,
        data: &[u8],
        now: Timestamp,
    ) -> Result<(), SysError> {
        if data.len() > MAX_MESSAGE_DATA {
            return Err(SysError::InvalidParam);
        }
        if self.is_full() {
            return Err(SysError::NoMemory);
        }

        let slot = &mut self.ring[self.tail];
        slot.from = from;
        slot.to = to;
        slot.len = data.len();
        slot.data[..data.len()].copy_from_slice(data);
        slot.timestamp = now;
        slot.valid = true;

        self.tail = (self.tail + 1) % QUEUE_DEPTH;
        self.count += 1;
        Ok(())
    }

    /// Dequeues the head message into `buf`, returning `(length, sender)`.
    ///
    /// An empty ring reports `WouldBlock`. A message longer than `buf` is
    /// *left in place* and reported as `InvalidParam`, so the caller can
    /// retry with a bigger buffer without losing anything. A head slot that
    /// is somehow not marked valid reports `IoError`; that state should not
    /// occur.
    pub fn pop(&mut self, buf: &mut [u8]) -> Result<(usize, usize), SysError> {
        if self.count == 0 {
            return Err(SysError::WouldBlock);
        }

        let slot = &self.ring[self.head];
        if !slot.valid {
            return Err(SysError::IoError);
        }
        if slot.len > buf.len() {
            return Err(SysError::InvalidParam);
        }

        buf[..slot.len].copy_from_slice(&slot.data[..slot.len]);
        let result = (slot.len, slot.from);

        self.ring[self.head].valid = false;
        self.head = (self.head + 1) % QUEUE_DEPTH;
        self.count -= 1;
        Ok(result)
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> Timestamp {
        Timestamp::from(42)
    }

    #[test]
    fn messages_come_out_in_send_order() {
        let mut q = MessageQueue::new();
        for i in 0..5u8 {
            q.push(1, 2, &[i], now()).expect("ring has room");
        }

        let mut buf = [0; MAX_MESSAGE_DATA];
        for i in 0..5u8 {
            let (len, from) = q.pop(&mut buf).expect("message is queued");
            assert_eq!((len, from), (1, 1));
            assert_eq!(buf[0], i, "FIFO order violated");
        }
        assert_eq!(q.pop(&mut buf), Err(SysError::WouldBlock));
    }

    #[test]
    fn ring_saturates_at_queue_depth() {
        let mut q = MessageQueue::new();
        for _ in 0..QUEUE_DEPTH {
            q.push(1, 2, &[0; 4], now()).expect("ring has room");
        }
        assert_eq!(q.push(1, 2, &[0; 4], now()), Err(SysError::NoMemory));
        assert_eq!(q.count(), QUEUE_DEPTH);

        // One receive opens exactly one slot.
        let mut buf = [0; 4];
        q.pop(&mut buf).expect("ring is nonempty");
        q.push(1, 2, &[0; 4], now()).expect("slot was just freed");
        assert_eq!(q.count(), QUEUE_DEPTH);
    }

    #[test]
    fn oversized_payload_is_rejected_up_front() {
        let mut q = MessageQueue::new();
        let big = [0; MAX_MESSAGE_DATA + 1];
        assert_eq!(q.push(1, 2, &big, now()), Err(SysError::InvalidParam));
        assert_eq!(q.count(), 0);
    }

    #[test]
    fn short_receive_buffer_leaves_message_queued() {
        let mut q = MessageQueue::new();
        q.push(1, 2, &[1, 2, 3, 4], now()).expect("ring has room");

        let mut small = [0; 2];
        assert_eq!(q.pop(&mut small), Err(SysError::InvalidParam));
        assert_eq!(q.count(), 1, "failed receive must not consume");

        let mut big = [0; 4];
        assert_eq!(q.pop(&mut big), Ok((4, 1)));
        assert_eq!(big, [1, 2, 3, 4]);
    }

    #[test]
    fn count_tracks_head_tail_distance_through_wraps() {
        let mut q = MessageQueue::new();
        let mut buf = [0; 1];
        // Cycle enough to wrap the ring several times.
        for round in 0..(3 * QUEUE_DEPTH) {
            q.push(0, 1, &[round as u8], now()).expect("ring has room");
            assert_eq!(q.count(), 1);
            let (_, _) = q.pop(&mut buf).expect("just pushed");
            assert_eq!(q.count(), 0);
            assert_eq!(buf[0], round as u8);
        }
    }

    #[test]
    fn empty_payloads_are_legal() {
        let mut q = MessageQueue::new();
        q.push(3, 1, &[], now()).expect("empty message is fine");
        let mut buf = [0; 0];
        assert_eq!(q.pop(&mut buf), Ok((0, 3)));
    }
}
