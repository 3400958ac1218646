use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt, future, stream};
use serde_json::json;

use rust_chat_rpc::common::{Chat, Message, MessageStatus};
use rust_chat_rpc::error::{APPLICATION_ERROR, ChatError, INVALID, REJECTED, Result};
use rust_chat_rpc::network::codec::routes;
use rust_chat_rpc::network::{ChatClient, Connection, ConnectionSlot, WirePayload};

/// Connection whose replies are scripted per route.
#[derive(Default)]
struct ScriptedConnection {
    replies: Mutex<HashMap<&'static str, Result<Vec<u8>>>>,
    streams: Mutex<HashMap<&'static str, Vec<Result<Vec<u8>>>>>,
    open_streams: Mutex<HashSet<&'static str>>,
    requests: Mutex<Vec<WirePayload>>,
    interactions: AtomicUsize,
    disposed: AtomicBool,
}

impl ScriptedConnection {
    fn reply(&self, route: &'static str, body: serde_json::Value) {
        let body = serde_json::to_vec(&body).unwrap();
        self.replies.lock().unwrap().insert(route, Ok(body));
    }

    fn fail(&self, route: &'static str, err: ChatError) {
        self.replies.lock().unwrap().insert(route, Err(err));
    }

    /// Stream that completes after `items`.
    fn stream(&self, route: &'static str, items: Vec<Result<Vec<u8>>>) {
        self.streams.lock().unwrap().insert(route, items);
    }

    /// Stream that stays open after `items`.
    fn stream_open(&self, route: &'static str, items: Vec<Result<Vec<u8>>>) {
        self.stream(route, items);
        self.open_streams.lock().unwrap().insert(route);
    }

    fn interactions(&self) -> usize {
        self.interactions.load(Ordering::SeqCst)
    }

    fn requests(&self) -> Vec<WirePayload> {
        self.requests.lock().unwrap().clone()
    }

    fn record(&self, payload: &WirePayload) {
        self.interactions.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(payload.clone());
    }
}

impl Connection for ScriptedConnection {
    fn request_response(&self, payload: WirePayload) -> BoxFuture<'static, Result<WirePayload>> {
        self.record(&payload);
        let reply = match self.replies.lock().unwrap().get(payload.route.as_str()) {
            Some(Ok(body)) => Ok(WirePayload::new("", body.clone())),
            Some(Err(err)) => Err(err.clone()),
            None => Err(ChatError::remote(INVALID, "unscripted route")),
        };
        future::ready(reply).boxed()
    }

    fn request_stream(&self, payload: WirePayload) -> BoxStream<'static, Result<WirePayload>> {
        self.record(&payload);
        let route = payload.route.as_str();
        let items: Vec<_> = self
            .streams
            .lock()
            .unwrap()
            .get(route)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(|item| item.map(|body| WirePayload::new(route, body)))
            .collect();

        if self.open_streams.lock().unwrap().contains(route) {
            stream::iter(items).chain(stream::pending()).boxed()
        } else {
            stream::iter(items).boxed()
        }
    }

    fn fire_and_forget(&self, payload: WirePayload) -> BoxFuture<'static, Result<()>> {
        self.record(&payload);
        future::ready(Ok(())).boxed()
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }
}

fn client_over(connection: &Arc<ScriptedConnection>) -> ChatClient {
    let slot = ConnectionSlot::with_connection(connection.clone());
    ChatClient::new(Arc::new(slot))
}

fn chat(id: &str) -> Result<Vec<u8>> {
    let chat = Chat {
        id: id.to_string(),
        participants: vec!["u1".to_string(), "u2".to_string()],
        last_activity: None,
    };
    Ok(serde_json::to_vec(&chat).unwrap())
}

fn message(id: &str, body: &str) -> Result<Vec<u8>> {
    let message = Message {
        id: id.to_string(),
        conversation_id: "c1".to_string(),
        sender_id: "u2".to_string(),
        body: body.to_string(),
        timestamp: 1_700_000_000_000,
        status: MessageStatus::Sent,
    };
    Ok(serde_json::to_vec(&message).unwrap())
}

fn body_json(payload: &WirePayload) -> serde_json::Value {
    serde_json::from_slice(&payload.body).unwrap()
}

#[tokio::test]
async fn conversations_keep_server_order() {
    let connection = Arc::new(ScriptedConnection::default());
    connection.stream(routes::GET_ALL, vec![chat("c3"), chat("c1"), chat("c2")]);
    let client = client_over(&connection);

    let chats = client.list_conversations("u1", 0, 20).await.unwrap();
    let ids: Vec<_> = chats.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["c3", "c1", "c2"]);

    let requests = connection.requests();
    assert_eq!(requests[0].route, routes::GET_ALL);
    assert_eq!(
        body_json(&requests[0]),
        json!({ "userId": "u1", "page": 0, "size": 20 })
    );
}

#[tokio::test]
async fn empty_history_is_an_empty_list() {
    let connection = Arc::new(ScriptedConnection::default());
    connection.stream(routes::GET_MESSAGES, Vec::new());
    let client = client_over(&connection);

    assert!(client.list_messages("c1", 0, 20).await.unwrap().is_empty());
}

#[tokio::test]
async fn error_after_some_items_discards_them() {
    let connection = Arc::new(ScriptedConnection::default());
    let failure = ChatError::remote(APPLICATION_ERROR, "storage offline");
    connection.stream(
        routes::GET_MESSAGES,
        vec![message("m1", "a"), message("m2", "b"), Err(failure.clone())],
    );
    let client = client_over(&connection);

    assert_eq!(client.list_messages("c1", 0, 20).await, Err(failure));
}

#[tokio::test]
async fn malformed_item_fails_the_whole_list() {
    let connection = Arc::new(ScriptedConnection::default());
    connection.stream(
        routes::GET_MESSAGES,
        vec![message("m1", "a"), Ok(br#"{"id":"m2"}"#.to_vec())],
    );
    let client = client_over(&connection);

    assert!(matches!(
        client.list_messages("c1", 0, 20).await,
        Err(ChatError::Decode { route, .. }) if route == routes::GET_MESSAGES
    ));
}

#[tokio::test]
async fn paging_values_are_forwarded_verbatim() {
    let connection = Arc::new(ScriptedConnection::default());
    connection.stream(routes::GET_MESSAGES, Vec::new());
    let client = client_over(&connection);

    client.list_messages("c1", 7, 0).await.unwrap();
    assert_eq!(
        body_json(&connection.requests()[0]),
        json!({ "conversationId": "c1", "page": 7, "size": 0 })
    );
}

#[tokio::test]
async fn get_or_create_returns_the_same_conversation() {
    let connection = Arc::new(ScriptedConnection::default());
    connection.reply(
        routes::GET_OR_CREATE,
        json!({ "id": "c1", "participants": ["u1", "u2"] }),
    );
    let client = client_over(&connection);

    let first = client.get_or_create_conversation("u1", "u2").await.unwrap();
    let again = client.get_or_create_conversation("u1", "u2").await.unwrap();
    assert_eq!(first.id, "c1");
    assert_eq!(first, again);

    // no caching: both calls reached the connection
    assert_eq!(connection.interactions(), 2);
    assert_eq!(
        body_json(&connection.requests()[1]),
        json!({ "userAId": "u1", "userBId": "u2" })
    );
}

#[tokio::test]
async fn remote_rejection_is_surfaced() {
    let connection = Arc::new(ScriptedConnection::default());
    connection.fail(
        routes::GET_OR_CREATE,
        ChatError::remote(REJECTED, "user u9 does not exist"),
    );
    let client = client_over(&connection);

    assert_eq!(
        client.get_or_create_conversation("u1", "u9").await,
        Err(ChatError::remote(REJECTED, "user u9 does not exist"))
    );
}

#[tokio::test]
async fn unread_count_replies() {
    let connection = Arc::new(ScriptedConnection::default());
    let client = client_over(&connection);

    connection.reply(routes::GET_UNREAD_COUNT, json!({ "count": 0 }));
    assert_eq!(client.get_unread_count("c1", "u1").await, Ok(0));

    connection.reply(routes::GET_UNREAD_COUNT, json!({ "count": 42 }));
    assert_eq!(client.get_unread_count("c1", "u1").await, Ok(42));

    connection.reply(routes::GET_UNREAD_COUNT, json!({}));
    assert!(matches!(
        client.get_unread_count("c1", "u1").await,
        Err(ChatError::Decode { .. })
    ));

    assert_eq!(
        body_json(&connection.requests()[0]),
        json!({ "conversationId": "c1", "userId": "u1" })
    );
}

#[tokio::test]
async fn has_conversations_sends_a_bare_user_id() {
    let connection = Arc::new(ScriptedConnection::default());
    connection.reply(routes::HAS_CHATS, json!(false));
    let client = client_over(&connection);

    assert_eq!(client.has_conversations("u1").await, Ok(false));
    assert_eq!(connection.requests()[0].body, b"\"u1\"");
}

#[tokio::test]
async fn missing_connection_fails_without_any_interaction() {
    let client = ChatClient::new(Arc::new(ConnectionSlot::new()));

    assert_eq!(
        client.list_conversations("u1", 0, 20).await,
        Err(ChatError::ConnectionUnavailable)
    );
    assert_eq!(
        client.get_unread_count("c1", "u1").await,
        Err(ChatError::ConnectionUnavailable)
    );

    let mut live = client.stream_messages("c1");
    assert_eq!(live.next().await, Some(Err(ChatError::ConnectionUnavailable)));
    assert_eq!(live.next().await, None);
}

#[tokio::test]
async fn disposed_connection_is_never_used() {
    let connection = Arc::new(ScriptedConnection::default());
    connection.reply(routes::HAS_CHATS, json!(true));
    let client = client_over(&connection);
    connection.dispose();

    assert_eq!(
        client.has_conversations("u1").await,
        Err(ChatError::ConnectionUnavailable)
    );
    assert_eq!(
        client.get_or_create_conversation("u1", "u2").await,
        Err(ChatError::ConnectionUnavailable)
    );
    assert_eq!(connection.interactions(), 0);
}

#[tokio::test]
async fn live_stream_ends_after_a_transport_error() {
    let connection = Arc::new(ScriptedConnection::default());
    connection.stream(
        routes::STREAM_MESSAGES,
        vec![
            message("m1", "one"),
            message("m2", "two"),
            message("m3", "three"),
            Err(ChatError::transport("connection reset")),
            message("m4", "late"),
        ],
    );
    let client = client_over(&connection);

    let items: Vec<_> = client.stream_messages("c1").collect().await;
    assert_eq!(items.len(), 4);
    let bodies: Vec<_> = items[..3]
        .iter()
        .map(|item| item.as_ref().unwrap().body.as_str())
        .collect();
    assert_eq!(bodies, vec!["one", "two", "three"]);
    assert_eq!(items[3], Err(ChatError::transport("connection reset")));
}

#[tokio::test]
async fn dispose_without_subscription_is_a_no_op() {
    let connection = Arc::new(ScriptedConnection::default());
    let client = client_over(&connection);

    client.dispose_message_stream();
    client.dispose_message_stream();
    assert_eq!(connection.interactions(), 0);
}

#[tokio::test]
async fn dispose_stops_the_live_stream() {
    let connection = Arc::new(ScriptedConnection::default());
    connection.stream_open(routes::STREAM_MESSAGES, vec![message("m1", "hi")]);
    let client = client_over(&connection);

    let mut live = client.stream_messages("c1");
    assert_eq!(live.next().await.unwrap().unwrap().body, "hi");

    client.dispose_message_stream();
    client.dispose_message_stream();
    assert!(live.is_terminated());
    assert_eq!(live.next().await, None);
}

#[tokio::test]
async fn only_the_newest_subscription_is_tracked() {
    let connection = Arc::new(ScriptedConnection::default());
    connection.stream_open(routes::STREAM_MESSAGES, Vec::new());
    let client = client_over(&connection);

    let older = client.stream_messages("c1");
    let mut newer = client.stream_messages("c2");

    client.dispose_message_stream();
    assert_eq!(newer.next().await, None);
    assert!(!older.is_terminated());

    // still the caller's to cancel
    older.cancel();
    assert!(older.is_terminated());
}

#[tokio::test]
async fn first_conversation_between_two_users() {
    let connection = Arc::new(ScriptedConnection::default());
    connection.reply(routes::HAS_CHATS, json!(false));
    connection.reply(
        routes::GET_OR_CREATE,
        json!({ "id": "c1", "participants": ["u1", "u2"] }),
    );
    connection.stream(routes::GET_ALL, vec![chat("c1")]);
    connection.reply(routes::GET_UNREAD_COUNT, json!({ "count": 0 }));
    let client = client_over(&connection);

    assert_eq!(client.has_conversations("u1").await, Ok(false));
    let chat = client.get_or_create_conversation("u1", "u2").await.unwrap();
    assert_eq!(chat.id, "c1");

    connection.reply(routes::HAS_CHATS, json!(true));
    assert_eq!(client.has_conversations("u1").await, Ok(true));

    let chats = client.list_conversations("u1", 0, 20).await.unwrap();
    assert_eq!(chats, vec![chat.clone()]);
    assert_eq!(client.get_unread_count(&chat.id, "u1").await, Ok(0));
}
