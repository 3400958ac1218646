//! In-process connection.
//!
//! Requests and replies are pushed through the wire frame encoding so the
//! far end only ever sees what a socket would have carried.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt, future, stream};
use tokio::sync::watch;

use crate::error::{ChatError, Result};

use super::connection::Connection;
use super::payload::WirePayload;

/// The far end of a [`LoopbackConnection`].
pub trait RequestHandler: Send + Sync + 'static {
    fn request_response(&self, payload: WirePayload) -> BoxFuture<'static, Result<WirePayload>>;

    fn request_stream(&self, payload: WirePayload) -> BoxStream<'static, Result<WirePayload>>;
}

pub struct LoopbackConnection {
    handler: Arc<dyn RequestHandler>,
    closed: watch::Sender<bool>,
}

impl LoopbackConnection {
    pub fn new(handler: Arc<dyn RequestHandler>) -> Self {
        let (closed, _) = watch::channel(false);
        Self { handler, closed }
    }

    fn send(&self, payload: &WirePayload) -> Result<WirePayload> {
        if self.is_disposed() {
            return Err(ChatError::transport("connection disposed"));
        }
        over_the_wire(payload)
    }
}

impl Connection for LoopbackConnection {
    fn request_response(&self, payload: WirePayload) -> BoxFuture<'static, Result<WirePayload>> {
        let request = match self.send(&payload) {
            Ok(request) => request,
            Err(err) => return future::ready(Err(err)).boxed(),
        };
        let reply = self.handler.request_response(request);
        let mut closed = self.closed.subscribe();

        async move {
            // A reply that is already there wins over the close signal.
            tokio::select! {
                biased;
                reply = reply => reply.and_then(|reply| over_the_wire(&reply)),
                _ = wait_closed(&mut closed) => Err(ChatError::transport("connection closed")),
            }
        }
        .boxed()
    }

    fn request_stream(&self, payload: WirePayload) -> BoxStream<'static, Result<WirePayload>> {
        let request = match self.send(&payload) {
            Ok(request) => request,
            Err(err) => return stream::once(future::ready(Err(err))).boxed(),
        };
        let state = StreamState {
            replies: self.handler.request_stream(request),
            closed: self.closed.subscribe(),
            done: false,
        };

        stream::unfold(state, |mut state| async move {
            if state.done {
                return None;
            }
            // Replies emitted before the close are still delivered.
            let item = tokio::select! {
                biased;
                reply = state.replies.next() => {
                    reply.map(|reply| reply.and_then(|reply| over_the_wire(&reply)))
                }
                _ = wait_closed(&mut state.closed) => {
                    Some(Err(ChatError::transport("connection closed")))
                }
            };
            match item {
                Some(Ok(reply)) => Some((Ok(reply), state)),
                Some(Err(err)) => {
                    state.done = true;
                    Some((Err(err), state))
                }
                None => None,
            }
        })
        .boxed()
    }

    /// Dispatched like a request-response whose reply is thrown away.
    fn fire_and_forget(&self, payload: WirePayload) -> BoxFuture<'static, Result<()>> {
        let request = match self.send(&payload) {
            Ok(request) => request,
            Err(err) => return future::ready(Err(err)).boxed(),
        };
        let route = request.route.clone();
        let reply = self.handler.request_response(request);
        async move {
            tokio::spawn(async move {
                if let Err(err) = reply.await {
                    log::debug!("Fire-and-forget on {route} failed remotely: {err}");
                }
            });
            Ok(())
        }
        .boxed()
    }

    fn is_disposed(&self) -> bool {
        *self.closed.borrow()
    }

    fn dispose(&self) {
        if !self.closed.send_replace(true) {
            log::info!("Loopback connection closed");
        }
    }
}

struct StreamState {
    replies: BoxStream<'static, Result<WirePayload>>,
    closed: watch::Receiver<bool>,
    done: bool,
}

fn over_the_wire(payload: &WirePayload) -> Result<WirePayload> {
    let frame = payload.encode_frame()?;
    WirePayload::decode_frame(&frame)
}

/// Resolves once the connection is closed or dropped.
async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    loop {
        if *closed.borrow_and_update() {
            return;
        }
        if closed.changed().await.is_err() {
            return;
        }
    }
}
