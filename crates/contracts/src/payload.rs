//! Payload types crossing the transport boundary.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A message still in wire format.
///
/// The core never decodes payloads, and intra-process fusion of serialized messages is
/// rejected when a synchronizer is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedMessage {
    /// Encoded bytes (zero-copy)
    pub data: Bytes,
}

impl SerializedMessage {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
