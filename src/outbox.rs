//! Bounded FIFO handing encoded messages from the Packer to the Mailer.
//!
//! When the queue is at depth, enqueueing drops the oldest message and hands
//! it back so the caller can report the drop and release its tape columns.

use crate::codec::EncodedMessage;
use crate::tape::TapeMark;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use thiserror::Error;

/// The Mailer stopped; nothing more is accepted.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Outbox is closed")]
pub struct OutboxClosed;

/// A queued uplink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Enqueue order, starting at 1
    pub id: u64,
    /// Serialized message
    pub payload: Bytes,
    /// Columns to release once acknowledged
    pub mark: TapeMark,
    /// Counter stamped into the payload
    pub packet_counter: u32,
}

#[derive(Debug, Default)]
struct State {
    queue: VecDeque<OutboundMessage>,
    next_id: u64,
    closed: bool,
}

/// Shared outbox.
#[derive(Debug, Default)]
pub struct Outbox {
    state: Mutex<State>,
}

impl Outbox {
    /// Creates an empty, open outbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `msg`, first dropping the oldest entries while `depth` is reached.
    ///
    /// Returns the dropped messages, oldest first.
    pub fn enqueue(
        &self,
        msg: EncodedMessage,
        depth: usize,
    ) -> Result<Vec<OutboundMessage>, OutboxClosed> {
        let mut s = self.state.lock();
        if s.closed {
            return Err(OutboxClosed);
        }
        let depth = depth.max(1);
        let mut dropped = Vec::new();
        while s.queue.len() >= depth {
            if let Some(old) = s.queue.pop_front() {
                tracing::warn!(id = old.id, "Outbox full, dropping oldest message");
                dropped.push(old);
            }
        }
        s.next_id += 1;
        let id = s.next_id;
        s.queue.push_back(OutboundMessage {
            id,
            payload: msg.payload,
            mark: msg.mark,
            packet_counter: msg.packet_counter,
        });
        tracing::debug!(id, queued = s.queue.len(), "Message queued");
        Ok(dropped)
    }

    /// Takes the oldest message for sending.
    pub fn pop_front(&self) -> Option<OutboundMessage> {
        self.state.lock().queue.pop_front()
    }

    /// Puts an unsent message back in front of the queue.
    ///
    /// If `depth` shrank meanwhile, the oldest entries beyond it are dropped
    /// and returned, the restored message first.
    pub fn restore_front(&self, msg: OutboundMessage, depth: usize) -> Vec<OutboundMessage> {
        let mut s = self.state.lock();
        s.queue.push_front(msg);
        let depth = depth.max(1);
        let mut dropped = Vec::new();
        while s.queue.len() > depth {
            if let Some(old) = s.queue.pop_front() {
                tracing::warn!(id = old.id, "Outbox over depth, dropping oldest message");
                dropped.push(old);
            }
        }
        dropped
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.state.lock().queue.is_empty()
    }

    /// Rejects further messages.
    pub fn close(&self) {
        self.state.lock().closed = true;
    }
}
