use std::sync::{Arc, Mutex};

use futures::stream::BoxStream;
use futures::{StreamExt, future, stream};

use crate::common::{
    Chat, ConversationRequest, ConversationsQuery, Message, MessagesQuery, UnreadCountQuery,
};
use crate::error::{ChatError, Result};

use super::codec::{
    self, GetAllChats, GetMessages, GetOrCreateChat, GetUnreadCount, HasChats, Route,
    StreamMessages,
};
use super::connection::ConnectionProvider;
use super::payload::WirePayload;
use super::subscription::{MessageSubscription, Subscription, SubscriptionHandle};

/// Typed chat operations over the shared connection.
///
/// Every operation reports failure through its return value: a connection
/// that is missing or dies, a request that cannot be encoded, a reply that
/// cannot be decoded and a rejection from the server all come back as
/// [`ChatError`]. Nothing is retried.
pub struct ChatClient {
    provider: Arc<dyn ConnectionProvider>,
    /// The most recent live message subscription, for [`ChatClient::dispose_message_stream`].
    message_stream: Mutex<Option<SubscriptionHandle>>,
}

impl ChatClient {
    pub fn new(provider: Arc<dyn ConnectionProvider>) -> Self {
        Self {
            provider,
            message_stream: Mutex::new(None),
        }
    }

    /// Conversations of `user_id`, in the order the server streams them.
    pub async fn list_conversations(
        &self,
        user_id: &str,
        page: u32,
        size: u32,
    ) -> Result<Vec<Chat>> {
        let query = ConversationsQuery {
            user_id: user_id.to_string(),
            page,
            size,
        };
        self.collect::<GetAllChats>(&query).await
    }

    /// One page of a conversation's history.
    pub async fn list_messages(
        &self,
        conversation_id: &str,
        page: u32,
        size: u32,
    ) -> Result<Vec<Message>> {
        let query = MessagesQuery {
            conversation_id: conversation_id.to_string(),
            page,
            size,
        };
        self.collect::<GetMessages>(&query).await
    }

    /// The conversation between two users, created by the server if needed.
    ///
    /// Concurrent identical calls are not deduplicated here.
    pub async fn get_or_create_conversation(
        &self,
        user_a_id: &str,
        user_b_id: &str,
    ) -> Result<Chat> {
        let request = ConversationRequest {
            user_a_id: user_a_id.to_string(),
            user_b_id: user_b_id.to_string(),
        };
        log::debug!("Sending ConversationRequest: {request:?}");
        self.request::<GetOrCreateChat>(&request).await
    }

    pub async fn get_unread_count(&self, conversation_id: &str, user_id: &str) -> Result<u64> {
        let query = UnreadCountQuery {
            conversation_id: conversation_id.to_string(),
            user_id: user_id.to_string(),
        };
        let result = self.request::<GetUnreadCount>(&query).await?;
        Ok(result.count)
    }

    pub async fn has_conversations(&self, user_id: &str) -> Result<bool> {
        self.request::<HasChats>(&user_id.to_string()).await
    }

    /// Subscribes to new messages of a conversation.
    ///
    /// The subscription stays open until cancelled or until the connection
    /// fails, in which case its last item is the error. It is not resumable;
    /// call again for a fresh subscription. The returned subscription also
    /// becomes the one [`ChatClient::dispose_message_stream`] cancels.
    pub fn stream_messages(&self, conversation_id: &str) -> MessageSubscription {
        let replies = match self.open_stream::<StreamMessages>(&conversation_id.to_string()) {
            Ok(replies) => replies,
            Err(err) => {
                log::warn!("Failed to open message stream for {conversation_id}: {err}");
                stream::once(future::ready(Err(err))).boxed()
            }
        };

        let messages = replies
            .map(|reply| reply.and_then(|payload| codec::decode::<StreamMessages>(&payload)))
            .boxed();
        let subscription = Subscription::new(messages);

        let replaced = self
            .message_stream
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(subscription.handle());
        if replaced.is_some_and(|handle| !handle.is_cancelled()) {
            log::debug!("Previous message stream is no longer tracked by the client");
        }
        log::info!("Subscribed to live messages of {conversation_id}");

        subscription
    }

    /// Cancels the most recent live message subscription.
    ///
    /// A no-op when none was started or it was already disposed.
    pub fn dispose_message_stream(&self) {
        let tracked = self
            .message_stream
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = tracked {
            if !handle.is_cancelled() {
                handle.cancel();
                log::info!("Live message stream disposed");
            }
        }
    }

    async fn request<R: Route>(&self, request: &R::Request) -> Result<R::Reply> {
        let result = async {
            let payload = codec::encode::<R>(request)?;
            let connection = self.provider.active()?;
            let reply = connection.request_response(payload).await?;
            log::debug!("Received reply for {}", R::NAME);
            codec::decode::<R>(&reply)
        }
        .await;
        result.inspect_err(|err| log::warn!("{} failed: {err}", R::NAME))
    }

    /// Buffers a whole request-stream; any error discards what was collected.
    async fn collect<R: Route>(&self, request: &R::Request) -> Result<Vec<R::Reply>> {
        let result = async {
            let mut replies = self.open_stream::<R>(request)?;
            let mut items = Vec::new();
            while let Some(reply) = replies.next().await {
                items.push(codec::decode::<R>(&reply?)?);
            }
            log::debug!("Collected {} items from {}", items.len(), R::NAME);
            Ok::<_, ChatError>(items)
        }
        .await;
        result.inspect_err(|err| log::warn!("{} failed: {err}", R::NAME))
    }

    fn open_stream<R: Route>(
        &self,
        request: &R::Request,
    ) -> Result<BoxStream<'static, Result<WirePayload>>> {
        let payload = codec::encode::<R>(request)?;
        let connection = self.provider.active()?;
        Ok(connection.request_stream(payload))
    }
}
