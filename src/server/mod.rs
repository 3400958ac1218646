//! Chat backend answering the client's routes.
//!
//! Runs in-process behind a [`LoopbackConnection`](crate::network::LoopbackConnection);
//! history lives in SQLite and live messages fan out through one broadcast
//! channel per conversation.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt, future, stream};
use tokio::sync::broadcast;

use crate::common::{Chat, Message, UnreadCountResult};
use crate::error::{APPLICATION_ERROR, ChatError, INVALID, Result};
use crate::network::codec::{
    self, GetAllChats, GetMessages, GetOrCreateChat, GetUnreadCount, HasChats, Route,
    StreamMessages, routes,
};
use crate::network::{RequestHandler, WirePayload};
use crate::storage::ChatDatabase;

const LIVE_CHANNEL_CAPACITY: usize = 64;

pub struct ChatServer {
    db: Mutex<ChatDatabase>,
    live: Mutex<HashMap<String, broadcast::Sender<Message>>>,
}

impl ChatServer {
    pub fn new(db: ChatDatabase) -> Self {
        Self {
            db: Mutex::new(db),
            live: Mutex::new(HashMap::new()),
        }
    }

    pub fn in_memory() -> Result<Self> {
        let db = ChatDatabase::in_memory().map_err(storage_error)?;
        Ok(Self::new(db))
    }

    /// Stores a message and pushes it to every live subscriber of its conversation.
    pub fn post_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        body: &str,
    ) -> Result<Message> {
        let message = self
            .db()
            .insert_message(conversation_id, sender_id, body)
            .map_err(storage_error)?;

        let mut live = self.live();
        if let Some(sender) = live.get(conversation_id) {
            // Err means every subscriber is gone
            if sender.send(message.clone()).is_err() {
                live.remove(conversation_id);
                log::debug!("Dropped idle live channel of {conversation_id}");
            }
        }
        drop(live);
        log::debug!("Posted message {} to {}", message.id, conversation_id);
        Ok(message)
    }

    pub fn mark_read(&self, conversation_id: &str, reader_id: &str) -> Result<usize> {
        self.db()
            .mark_read(conversation_id, reader_id)
            .map_err(storage_error)
    }

    fn get_or_create(&self, payload: &WirePayload) -> Result<WirePayload> {
        let request = codec::decode_request::<GetOrCreateChat>(payload)?;
        let chat = self
            .db()
            .get_or_create_conversation(&request.user_a_id, &request.user_b_id)
            .map_err(storage_error)?;
        codec::encode_reply::<GetOrCreateChat>(&chat)
    }

    fn unread_count(&self, payload: &WirePayload) -> Result<WirePayload> {
        let query = codec::decode_request::<GetUnreadCount>(payload)?;
        let count = self
            .db()
            .unread_count(&query.conversation_id, &query.user_id)
            .map_err(storage_error)?;
        codec::encode_reply::<GetUnreadCount>(&UnreadCountResult { count })
    }

    fn has_chats(&self, payload: &WirePayload) -> Result<WirePayload> {
        let user_id = codec::decode_request::<HasChats>(payload)?;
        let found = self.db().has_conversations(&user_id).map_err(storage_error)?;
        codec::encode_reply::<HasChats>(&found)
    }

    fn list_chats(&self, payload: &WirePayload) -> Result<Vec<Chat>> {
        let query = codec::decode_request::<GetAllChats>(payload)?;
        let offset = page_offset(query.page, query.size)?;
        self.db()
            .conversations_for_user(&query.user_id, query.size, offset)
            .map_err(storage_error)
    }

    fn list_messages(&self, payload: &WirePayload) -> Result<Vec<Message>> {
        let query = codec::decode_request::<GetMessages>(payload)?;
        let offset = page_offset(query.page, query.size)?;
        self.db()
            .messages_for_conversation(&query.conversation_id, query.size, offset)
            .map_err(storage_error)
    }

    fn subscribe(&self, payload: &WirePayload) -> Result<broadcast::Receiver<Message>> {
        let conversation_id = codec::decode_request::<StreamMessages>(payload)?;
        let known = self
            .db()
            .get_conversation(&conversation_id)
            .map_err(storage_error)?;
        if known.is_none() {
            return Err(ChatError::remote(
                INVALID,
                format!("unknown conversation `{conversation_id}`"),
            ));
        }

        let mut live = self.live();
        let sender = live
            .entry(conversation_id)
            .or_insert_with(|| broadcast::channel(LIVE_CHANNEL_CAPACITY).0);
        Ok(sender.subscribe())
    }

    fn db(&self) -> MutexGuard<'_, ChatDatabase> {
        self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn live(&self) -> MutexGuard<'_, HashMap<String, broadcast::Sender<Message>>> {
        self.live.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl RequestHandler for ChatServer {
    fn request_response(&self, payload: WirePayload) -> BoxFuture<'static, Result<WirePayload>> {
        let reply = match payload.route.as_str() {
            routes::GET_OR_CREATE => self.get_or_create(&payload),
            routes::GET_UNREAD_COUNT => self.unread_count(&payload),
            routes::HAS_CHATS => self.has_chats(&payload),
            other => Err(unknown_route(other)),
        };
        future::ready(reply.map_err(into_remote)).boxed()
    }

    fn request_stream(&self, payload: WirePayload) -> BoxStream<'static, Result<WirePayload>> {
        match payload.route.as_str() {
            routes::GET_ALL => finite::<GetAllChats>(self.list_chats(&payload)),
            routes::GET_MESSAGES => finite::<GetMessages>(self.list_messages(&payload)),
            routes::STREAM_MESSAGES => match self.subscribe(&payload) {
                Ok(receiver) => live_messages(receiver),
                Err(err) => failed(err),
            },
            other => failed(unknown_route(other)),
        }
    }
}

/// Replies for a query whose results are all known up front.
fn finite<R: Route + 'static>(
    items: Result<Vec<R::Reply>>,
) -> BoxStream<'static, Result<WirePayload>>
where
    R::Reply: Send + 'static,
{
    match items {
        Ok(items) => stream::iter(items)
            .map(|item| codec::encode_reply::<R>(&item).map_err(into_remote))
            .boxed(),
        Err(err) => failed(err),
    }
}

fn live_messages(
    receiver: broadcast::Receiver<Message>,
) -> BoxStream<'static, Result<WirePayload>> {
    stream::unfold(Some(receiver), |receiver| async move {
        let mut receiver = receiver?;
        match receiver.recv().await {
            Ok(message) => {
                let reply = codec::encode_reply::<StreamMessages>(&message);
                Some((reply.map_err(into_remote), Some(receiver)))
            }
            // Missed messages cannot be replayed, so the subscriber is cut off.
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                log::warn!("Live subscriber lagged behind, skipped {skipped} messages");
                let err = ChatError::remote(
                    APPLICATION_ERROR,
                    format!("live subscriber lagged behind by {skipped} messages"),
                );
                Some((Err(err), None))
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    })
    .boxed()
}

fn failed(err: ChatError) -> BoxStream<'static, Result<WirePayload>> {
    stream::once(future::ready(Err(into_remote(err)))).boxed()
}

fn page_offset(page: u32, size: u32) -> Result<u64> {
    if size == 0 {
        return Err(ChatError::remote(INVALID, "page size must be positive"));
    }
    Ok(u64::from(page) * u64::from(size))
}

fn unknown_route(route: &str) -> ChatError {
    ChatError::remote(INVALID, format!("no handler for route `{route}`"))
}

fn storage_error(err: rusqlite::Error) -> ChatError {
    log::error!("Chat storage failure: {err}");
    ChatError::remote(APPLICATION_ERROR, err.to_string())
}

/// Whatever goes wrong on this side reaches the client as a remote error.
fn into_remote(err: ChatError) -> ChatError {
    match err {
        ChatError::Remote { .. } => err,
        ChatError::Decode { message, .. } | ChatError::Encode { message, .. } => {
            ChatError::remote(INVALID, message)
        }
        other => ChatError::remote(APPLICATION_ERROR, other.to_string()),
    }
}
