use thiserror::Error;

/// Error code of an application-level failure reported by the far end.
pub const APPLICATION_ERROR: u32 = 0x0000_0201;
/// The far end refused to handle the request.
pub const REJECTED: u32 = 0x0000_0202;
/// The request was malformed or addressed an unknown route.
pub const INVALID: u32 = 0x0000_0204;

/// Every failure an operation of the chat client can surface.
///
/// None of these are retried or swallowed internally; they reach the caller
/// as the `Err` side of an operation or as the last item of a live stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    /// No live connection at call time.
    #[error("connection is not established")]
    ConnectionUnavailable,

    /// The request could not be turned into a wire payload.
    #[error("failed to encode request for `{route}`: {message}")]
    Encode { route: String, message: String },

    /// The connection failed while the interaction was in flight.
    #[error("transport error: {0}")]
    Transport(String),

    /// A reply did not match the schema expected for its route.
    #[error("failed to decode reply for `{route}`: {message}")]
    Decode { route: String, message: String },

    /// The far end explicitly rejected the request.
    #[error("remote error {code:#x}: {message}")]
    Remote { code: u32, message: String },
}

impl ChatError {
    pub fn encode(route: &str, message: impl Into<String>) -> Self {
        Self::Encode {
            route: route.to_string(),
            message: message.into(),
        }
    }

    pub fn decode(route: &str, message: impl Into<String>) -> Self {
        Self::Decode {
            route: route.to_string(),
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn remote(code: u32, message: impl Into<String>) -> Self {
        Self::Remote {
            code,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
