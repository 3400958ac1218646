use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use futures::stream::{AbortHandle, Abortable, BoxStream};

use crate::common::Message;
use crate::error::Result;

/// Cancels the live subscription it was handed out with.
///
/// Cloneable; cancelling any clone, any number of times, has the same effect
/// as cancelling once.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    abort: AbortHandle,
}

impl SubscriptionHandle {
    pub fn cancel(&self) {
        self.abort.abort();
    }

    pub fn is_cancelled(&self) -> bool {
        self.abort.is_aborted()
    }
}

/// A live sequence of items from a request-stream interaction.
///
/// Ends quietly when cancelled or when the server completes the stream. An
/// `Err` item is terminal: nothing is yielded after it.
pub struct Subscription<T> {
    inner: Abortable<BoxStream<'static, Result<T>>>,
    handle: SubscriptionHandle,
    terminated: bool,
}

pub type MessageSubscription = Subscription<Message>;

impl<T> Subscription<T> {
    pub fn new(items: BoxStream<'static, Result<T>>) -> Self {
        let (abort, registration) = AbortHandle::new_pair();
        Self {
            inner: Abortable::new(items, registration),
            handle: SubscriptionHandle { abort },
            terminated: false,
        }
    }

    pub fn handle(&self) -> SubscriptionHandle {
        self.handle.clone()
    }

    pub fn cancel(&self) {
        self.handle.cancel();
    }

    /// True once the sequence has ended for any reason.
    pub fn is_terminated(&self) -> bool {
        self.terminated || self.handle.is_cancelled()
    }
}

impl<T> Stream for Subscription<T> {
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.terminated {
            return Poll::Ready(None);
        }

        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(item))) => Poll::Ready(Some(Ok(item))),
            Poll::Ready(Some(Err(err))) => {
                this.terminated = true;
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                this.terminated = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::{StreamExt, stream};

    use super::*;
    use crate::error::ChatError;

    #[tokio::test]
    async fn nothing_after_an_error() {
        let items = stream::iter(vec![
            Ok(1),
            Err(ChatError::transport("reset")),
            Ok(2),
        ])
        .boxed();
        let subscription = Subscription::new(items);

        let seen: Vec<_> = subscription.collect().await;
        assert_eq!(seen, vec![Ok(1), Err(ChatError::transport("reset"))]);
    }

    #[tokio::test]
    async fn cancel_ends_a_pending_stream() {
        let mut subscription = Subscription::<u32>::new(stream::pending().boxed());
        let handle = subscription.handle();

        handle.cancel();
        handle.cancel();
        assert!(subscription.is_terminated());
        assert_eq!(subscription.next().await, None);
    }

    #[tokio::test]
    async fn cancel_from_another_task() {
        let mut subscription = Subscription::<u32>::new(stream::pending().boxed());
        let handle = subscription.handle();

        tokio::spawn(async move { handle.cancel() });
        assert_eq!(subscription.next().await, None);
    }
}
