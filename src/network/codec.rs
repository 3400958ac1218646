//! Route registry and the payload codec.
//!
//! Each route is a marker type tying a route name to its request and reply
//! schema, so both ends resolve the body format at compile time.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::common::{
    Chat, ConversationRequest, ConversationsQuery, Message, MessagesQuery, UnreadCountQuery,
    UnreadCountResult,
};
use crate::error::{ChatError, Result};

use super::payload::WirePayload;

pub mod routes {
    pub const GET_ALL: &str = "chats.getAll";
    pub const GET_MESSAGES: &str = "chats.getMessages";
    pub const GET_OR_CREATE: &str = "chats.getOrCreate";
    pub const STREAM_MESSAGES: &str = "chats.streamMessages";
    pub const GET_UNREAD_COUNT: &str = "chats.getUnreadCount";
    pub const HAS_CHATS: &str = "chats.hasChats";
}

pub trait Route {
    const NAME: &'static str;
    type Request: Serialize + DeserializeOwned;
    /// Reply type, or the item type for streaming routes.
    type Reply: Serialize + DeserializeOwned;
}

pub struct GetAllChats;
pub struct GetMessages;
pub struct GetOrCreateChat;
pub struct StreamMessages;
pub struct GetUnreadCount;
pub struct HasChats;

impl Route for GetAllChats {
    const NAME: &'static str = routes::GET_ALL;
    type Request = ConversationsQuery;
    type Reply = Chat;
}

impl Route for GetMessages {
    const NAME: &'static str = routes::GET_MESSAGES;
    type Request = MessagesQuery;
    type Reply = Message;
}

impl Route for GetOrCreateChat {
    const NAME: &'static str = routes::GET_OR_CREATE;
    type Request = ConversationRequest;
    type Reply = Chat;
}

impl Route for StreamMessages {
    const NAME: &'static str = routes::STREAM_MESSAGES;
    /// Conversation id, sent as a bare JSON string.
    type Request = String;
    type Reply = Message;
}

impl Route for GetUnreadCount {
    const NAME: &'static str = routes::GET_UNREAD_COUNT;
    type Request = UnreadCountQuery;
    type Reply = UnreadCountResult;
}

impl Route for HasChats {
    const NAME: &'static str = routes::HAS_CHATS;
    /// User id, sent as a bare JSON string.
    type Request = String;
    type Reply = bool;
}

/// Serializes a request for route `R`.
pub fn encode<R: Route>(request: &R::Request) -> Result<WirePayload> {
    let body = serde_json::to_vec(request).map_err(|e| ChatError::encode(R::NAME, e.to_string()))?;
    Ok(WirePayload::new(R::NAME, body))
}

/// Deserializes a reply received for route `R`.
///
/// Replies either echo the request route or leave it empty; any other route
/// means the payload belongs to a different schema.
pub fn decode<R: Route>(payload: &WirePayload) -> Result<R::Reply> {
    check_route::<R>(payload)?;
    serde_json::from_slice(&payload.body).map_err(|e| ChatError::decode(R::NAME, e.to_string()))
}

/// Server-side counterpart of [`decode`]: reads the request of route `R`.
pub fn decode_request<R: Route>(payload: &WirePayload) -> Result<R::Request> {
    check_route::<R>(payload)?;
    serde_json::from_slice(&payload.body).map_err(|e| ChatError::decode(R::NAME, e.to_string()))
}

/// Server-side counterpart of [`encode`]: writes a reply for route `R`.
pub fn encode_reply<R: Route>(reply: &R::Reply) -> Result<WirePayload> {
    let body = serde_json::to_vec(reply).map_err(|e| ChatError::encode(R::NAME, e.to_string()))?;
    Ok(WirePayload::new(R::NAME, body))
}

fn check_route<R: Route>(payload: &WirePayload) -> Result<()> {
    if payload.route.is_empty() || payload.route == R::NAME {
        Ok(())
    } else {
        Err(ChatError::decode(
            R::NAME,
            format!("payload belongs to route `{}`", payload.route),
        ))
    }
}
