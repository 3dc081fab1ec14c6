//! Bytes in, typed envelope out.
//!
//! Deserialize (compact binary object format) → validate against the
//! registered schema for the claimed version. Timing marks are recorded
//! whether or not the message is accepted. Synchronous; the caller decides
//! which execution context runs it.

use std::time::{Duration, Instant};

use ciborium::value::Value;

use crate::envelope::{Envelope, SchemaRegistry};
use crate::types::{FeedError, Result};
use crate::validate::validate;

/// Messages larger than this are rejected before deserialization.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 8 * 1024 * 1024;

/// Advisory instrumentation for one message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timings {
    pub decode: Duration,
    pub validate: Duration,
    pub total: Duration,
}

/// Result of one pass through the pipeline plus its timings.
#[derive(Debug)]
pub struct Outcome {
    pub result: Result<Envelope>,
    pub timings: Timings,
}

/// Decode-and-validate pipeline. Holds no per-message state.
#[derive(Debug, Clone)]
pub struct Pipeline {
    registry: SchemaRegistry,
    max_message_bytes: usize,
}

impl Default for Pipeline {
    fn default() -> Self {
        Pipeline::new(SchemaRegistry::default())
    }
}

impl Pipeline {
    pub fn new(registry: SchemaRegistry) -> Self {
        Pipeline {
            registry,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }

    pub fn with_max_message_bytes(mut self, max: usize) -> Self {
        self.max_message_bytes = max;
        self
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Run one message through deserialize + validate.
    pub fn process(&self, bytes: &[u8]) -> Outcome {
        let start = Instant::now();

        let decoded = if bytes.len() > self.max_message_bytes {
            Err(FeedError::PayloadTooLarge {
                len: bytes.len(),
                max: self.max_message_bytes,
            })
        } else {
            deserialize(bytes)
        };
        let end_decode = Instant::now();

        let result = decoded.and_then(|value| validate(&self.registry, &value).map_err(FeedError::from));
        let end_validate = Instant::now();

        Outcome {
            result,
            timings: Timings {
                decode: end_decode - start,
                validate: end_validate - end_decode,
                total: end_validate - start,
            },
        }
    }
}

/// Parse raw bytes into a generic value. Corrupt or truncated input is a
/// `FeedError::Deserialize`, never a validation error.
pub fn deserialize(bytes: &[u8]) -> Result<Value> {
    ciborium::from_reader(bytes).map_err(|e| FeedError::Deserialize(e.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
