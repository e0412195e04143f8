//! Core types shared by both sides of the boundary.

use crate::error::{BridgeError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of an object in the remote runtime's handle table.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HandleId(pub u64);

impl fmt::Debug for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", self.0)
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Registration of a listener on an observable collection or subject.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Host-side consumer of a boundary subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registration in an [`EventRouter`](crate::events::EventRouter).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObserverId(pub u64);

/// Encoding used for every value that crosses the boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum WireCodec {
    #[default]
    Json,
    MessagePack,
}

impl WireCodec {
    /// Encode a value into a boundary payload.
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            WireCodec::Json => Ok(serde_json::to_vec(value)?),
            // Named fields keep optional members decodable.
            WireCodec::MessagePack => Ok(rmp_serde::to_vec_named(value)?),
        }
    }

    /// Decode a boundary payload. Any mismatch is a protocol violation.
    pub fn decode<T: DeserializeOwned>(&self, payload: &[u8]) -> Result<T> {
        match self {
            WireCodec::Json => serde_json::from_slice(payload)
                .map_err(|e| BridgeError::ProtocolViolation(e.to_string())),
            WireCodec::MessagePack => Ok(rmp_serde::from_slice(payload)?),
        }
    }

    /// Human-readable rendering of a payload for logs.
    pub fn describe(&self, payload: &[u8]) -> String {
        match self {
            WireCodec::Json => String::from_utf8_lossy(payload).into_owned(),
            WireCodec::MessagePack => format!("<{} bytes msgpack>", payload.len()),
        }
    }
}

/// A point on the editor canvas.
#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Position of one graph node, as relayed by position update streams.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodePosition {
    pub id: String,
    pub x: f64,
    pub y: f64,
}

impl NodePosition {
    pub fn new(id: impl Into<String>, x: f64, y: f64) -> Self {
        Self {
            id: id.into(),
            x,
            y,
        }
    }

    pub fn at(id: impl Into<String>, point: Point) -> Self {
        Self::new(id, point.x, point.y)
    }

    pub fn point(&self) -> Point {
        Point::new(self.x, self.y)
    }
}
