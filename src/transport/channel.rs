use futures::stream::{BoxStream, Stream, StreamExt};

use crate::core::errors::Result;
use crate::transport::protocol::StreamMessage;

pub type MessageStream = BoxStream<'static, Result<StreamMessage>>;

/// One run's push channel, independent of how frames actually arrive.
///
/// `close` is idempotent: the stream is dropped and the close hook runs on the
/// first call only. Dropping an open channel closes it.
pub struct RunChannel {
    stream: Option<MessageStream>,
    on_close: Option<Box<dyn FnOnce() + Send>>,
}

impl RunChannel {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<StreamMessage>> + Send + 'static,
    {
        Self {
            stream: Some(stream.boxed()),
            on_close: None,
        }
    }

    /// Run `hook` when the channel is closed
    pub fn with_close_hook(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_close = Some(Box::new(hook));
        self
    }

    /// Next message; `None` once the stream ended or the channel was closed
    pub async fn next(&mut self) -> Option<Result<StreamMessage>> {
        match self.stream.as_mut() {
            Some(stream) => stream.next().await,
            None => None,
        }
    }

    /// Close the channel. Returns `false` if it was already closed.
    pub fn close(&mut self) -> bool {
        if self.stream.take().is_none() {
            return false;
        }
        if let Some(hook) = self.on_close.take() {
            hook();
        }
        true
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }
}

impl Drop for RunChannel {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let hook_calls = Arc::new(AtomicUsize::new(0));
        let calls = hook_calls.clone();
        let frames: Vec<Result<StreamMessage>> = vec![Ok(StreamMessage::End)];
        let mut channel = RunChannel::new(stream::iter(frames))
            .with_close_hook(move || {
                calls.fetch_add(1, Ordering::SeqCst);
            });

        assert!(channel.close());
        assert!(!channel.close());
        assert!(channel.is_closed());
        assert!(channel.next().await.is_none());
        drop(channel);
        assert_eq!(hook_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_drop_closes() {
        let hook_calls = Arc::new(AtomicUsize::new(0));
        let calls = hook_calls.clone();
        let channel = RunChannel::new(stream::empty::<Result<StreamMessage>>()).with_close_hook(move || {
            calls.fetch_add(1, Ordering::SeqCst);
        });
        drop(channel);
        assert_eq!(hook_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_yields_messages_in_order() {
        let frames: Vec<Result<StreamMessage>> = vec![
            Ok(StreamMessage::answer(0, "v", "a")),
            Ok(StreamMessage::End),
        ];
        let mut channel = RunChannel::new(stream::iter(frames));
        assert_eq!(channel.next().await.unwrap().unwrap(), StreamMessage::answer(0, "v", "a"));
        assert_eq!(channel.next().await.unwrap().unwrap(), StreamMessage::End);
        assert!(channel.next().await.is_none());
    }
}
