//! Reassembly of PUBLISH payloads delivered in several chunks
//!
//! Engines with small receive buffers hand large messages over as a sequence of
//! [`DataFragment`]s. The topic travels only with the first chunk; the retain/QoS/dup flags
//! of the delivered message are taken from the last one.
//!
//! There is a single in-flight slot: fragments of two different messages must not be
//! interleaved. A new first chunk while a message is in progress abandons the old one.
//! The buffer for a fragmented message is allocated up front, so its declared total length
//! is checked against a limit first.

use crate::protocol::InboundMessage;
use crate::transport::DataFragment;
use bytes::BytesMut;
use thiserror::Error;
use tracing::{debug, warn};

/// Largest fragmented message buffered when no limit is configured
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 256 * 1024;

/// A fragment that cannot be applied; it is dropped without touching the buffer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReassemblyError {
    #[error("Fragment at offset {offset} with {chunk_len} bytes exceeds total length {total_len}")]
    OutOfBounds {
        offset: usize,
        chunk_len: usize,
        total_len: usize,
    },

    #[error("Continuation fragment at offset {offset} with no message in progress")]
    NoMessageInProgress { offset: usize },

    #[error("Fragment total length {actual} does not match message in progress ({expected})")]
    TotalLengthMismatch { expected: usize, actual: usize },

    #[error("Fragment offset {actual} does not match bytes received so far ({expected})")]
    OffsetMismatch { expected: usize, actual: usize },

    #[error("Fragment topic '{actual}' does not match message in progress '{expected}'")]
    TopicMismatch { expected: String, actual: String },

    #[error("Fragmented message of {total_len} bytes exceeds the {limit} byte limit")]
    TooLarge { total_len: usize, limit: usize },
}

#[derive(Debug)]
struct PendingMessage {
    topic: String,
    buffer: BytesMut,
    total_len: usize,
}

impl PendingMessage {
    fn received(&self) -> usize {
        self.buffer.len()
    }
}

/// Turns a stream of fragments into complete [`InboundMessage`]s
#[derive(Debug)]
pub struct FragmentReassembler {
    pending: Option<PendingMessage>,
    max_message_len: usize,
}

impl Default for FragmentReassembler {
    fn default() -> Self {
        Self::with_max_message_len(DEFAULT_MAX_MESSAGE_LEN)
    }
}

impl FragmentReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reassembler that refuses to buffer messages longer than `max_message_len`
    pub fn with_max_message_len(max_message_len: usize) -> Self {
        Self {
            pending: None,
            max_message_len,
        }
    }

    pub fn max_message_len(&self) -> usize {
        self.max_message_len
    }

    /// True while a multi-fragment message is partially received
    pub fn is_accumulating(&self) -> bool {
        self.pending.is_some()
    }

    /// Bytes received so far for the message in progress
    pub fn bytes_received(&self) -> usize {
        self.pending.as_ref().map_or(0, PendingMessage::received)
    }

    /// Discard any partial message. Returns true if one was dropped.
    pub fn reset(&mut self) -> bool {
        match self.pending.take() {
            Some(pending) => {
                debug!(
                    topic = %pending.topic,
                    received = pending.received(),
                    total = pending.total_len,
                    "Discarding partial message"
                );
                true
            }
            None => false,
        }
    }

    /// Apply one fragment; returns the message once its last fragment arrived
    pub fn push(
        &mut self,
        fragment: DataFragment,
    ) -> Result<Option<InboundMessage>, ReassemblyError> {
        let chunk_len = fragment.chunk_len();
        let end = fragment
            .offset
            .checked_add(chunk_len)
            .filter(|end| *end <= fragment.total_len)
            .ok_or(ReassemblyError::OutOfBounds {
                offset: fragment.offset,
                chunk_len,
                total_len: fragment.total_len,
            })?;

        // Whole message in one chunk: hand the payload through untouched
        if fragment.offset == 0 && chunk_len == fragment.total_len {
            return Ok(Some(InboundMessage {
                topic: fragment.topic,
                payload: fragment.payload,
                retain: fragment.retain,
                qos: fragment.qos,
                dup: fragment.dup,
            }));
        }

        if fragment.offset == 0 {
            if fragment.total_len > self.max_message_len {
                return Err(ReassemblyError::TooLarge {
                    total_len: fragment.total_len,
                    limit: self.max_message_len,
                });
            }
            self.start(fragment);
            return Ok(None);
        }

        let pending = self
            .pending
            .as_mut()
            .ok_or(ReassemblyError::NoMessageInProgress {
                offset: fragment.offset,
            })?;

        if fragment.total_len != pending.total_len {
            return Err(ReassemblyError::TotalLengthMismatch {
                expected: pending.total_len,
                actual: fragment.total_len,
            });
        }
        if fragment.offset != pending.received() {
            return Err(ReassemblyError::OffsetMismatch {
                expected: pending.received(),
                actual: fragment.offset,
            });
        }
        if !fragment.topic.is_empty() && fragment.topic != pending.topic {
            return Err(ReassemblyError::TopicMismatch {
                expected: pending.topic.clone(),
                actual: fragment.topic,
            });
        }

        pending.buffer.extend_from_slice(&fragment.payload);
        if end < pending.total_len {
            return Ok(None);
        }

        let Some(complete) = self.pending.take() else {
            return Ok(None);
        };
        Ok(Some(InboundMessage {
            topic: complete.topic,
            payload: complete.buffer.freeze(),
            retain: fragment.retain,
            qos: fragment.qos,
            dup: fragment.dup,
        }))
    }

    fn start(&mut self, fragment: DataFragment) {
        if let Some(stale) = self.pending.take() {
            warn!(
                topic = %stale.topic,
                received = stale.received(),
                total = stale.total_len,
                "New fragmented message started before the previous one completed, dropping it"
            );
        }

        let mut buffer = BytesMut::with_capacity(fragment.total_len);
        buffer.extend_from_slice(&fragment.payload);
        self.pending = Some(PendingMessage {
            topic: fragment.topic,
            buffer,
            total_len: fragment.total_len,
        });
    }
}
