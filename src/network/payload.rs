//! The generic payload carried by every interaction on the connection.
//!
//! A payload is a route plus an opaque body. On the wire it travels as
//!
//! ```text
//! +----------------------+--------------------------------+------------+
//! | metadata len (u24 BE) | route len (u8) | route (ASCII) |    body    |
//! +----------------------+--------------------------------+------------+
//! ```
//!
//! where the metadata block is the routing metadata `[len][route]`.

use crate::error::{ChatError, Result};

const METADATA_LEN_BYTES: usize = 3;
const MAX_METADATA_LEN: usize = 0x00FF_FFFF;
pub const MAX_ROUTE_LEN: usize = u8::MAX as usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WirePayload {
    pub route: String,
    pub body: Vec<u8>,
}

impl WirePayload {
    pub fn new(route: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            route: route.into(),
            body,
        }
    }

    /// Routing metadata for this payload's route.
    pub fn routing_metadata(&self) -> Result<Vec<u8>> {
        validate_route(&self.route)?;
        let mut metadata = Vec::with_capacity(1 + self.route.len());
        metadata.push(self.route.len() as u8);
        metadata.extend_from_slice(self.route.as_bytes());
        Ok(metadata)
    }

    pub fn encode_frame(&self) -> Result<Vec<u8>> {
        let metadata = self.routing_metadata()?;
        if metadata.len() > MAX_METADATA_LEN {
            return Err(ChatError::encode(&self.route, "metadata exceeds 24-bit length"));
        }

        let mut frame = Vec::with_capacity(METADATA_LEN_BYTES + metadata.len() + self.body.len());
        let len = metadata.len() as u32;
        frame.extend_from_slice(&len.to_be_bytes()[1..]);
        frame.extend_from_slice(&metadata);
        frame.extend_from_slice(&self.body);
        Ok(frame)
    }

    pub fn decode_frame(frame: &[u8]) -> Result<Self> {
        let truncated = |what: &str| ChatError::decode("", format!("truncated frame: {what}"));

        if frame.len() < METADATA_LEN_BYTES {
            return Err(truncated("missing metadata length"));
        }
        let metadata_len =
            u32::from_be_bytes([0, frame[0], frame[1], frame[2]]) as usize;
        let rest = &frame[METADATA_LEN_BYTES..];
        if rest.len() < metadata_len {
            return Err(truncated("metadata shorter than declared"));
        }
        let (metadata, body) = rest.split_at(metadata_len);

        let Some((&route_len, route_bytes)) = metadata.split_first() else {
            return Err(ChatError::decode("", "frame carries no routing metadata"));
        };
        if route_bytes.len() != route_len as usize {
            return Err(truncated("route length does not match metadata"));
        }
        if !route_bytes.is_ascii() {
            return Err(ChatError::decode("", "route is not ASCII"));
        }
        let route = String::from_utf8_lossy(route_bytes).into_owned();

        Ok(Self {
            route,
            body: body.to_vec(),
        })
    }
}

fn validate_route(route: &str) -> Result<()> {
    if route.is_empty() {
        return Err(ChatError::encode(route, "route is empty"));
    }
    if route.len() > MAX_ROUTE_LEN {
        return Err(ChatError::encode(
            route,
            format!("route longer than {MAX_ROUTE_LEN} bytes"),
        ));
    }
    if !route.is_ascii() {
        return Err(ChatError::encode(route, "route is not ASCII"));
    }
    Ok(())
}
