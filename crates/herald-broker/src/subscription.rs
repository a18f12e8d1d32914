//! Subscription handle owned by one relay session.

use futures::stream::{BoxStream, Stream, StreamExt};
use herald_core::Channel;

type Release = Box<dyn FnOnce() + Send>;

/// A live subscription to one broker channel.
///
/// Yields payloads lazily until the broker connection ends or [`close`](Self::close)
/// is called. Not restartable. Broker resources are released exactly once: by the
/// first `close()`, or on drop if the session never closed it.
pub struct Subscription {
    channel: Channel,
    messages: Option<BoxStream<'static, String>>,
    release: Option<Release>,
}

impl Subscription {
    /// Wrap a payload stream. Dropping the stream must release the broker side.
    pub fn new<S>(channel: Channel, messages: S) -> Self
    where
        S: Stream<Item = String> + Send + 'static,
    {
        Self {
            channel,
            messages: Some(messages.boxed()),
            release: None,
        }
    }

    /// Attach extra cleanup that runs once, after the stream has been dropped.
    #[must_use]
    pub fn on_release(mut self, release: impl FnOnce() + Send + 'static) -> Self {
        self.release = Some(Box::new(release));
        self
    }

    /// Channel this subscription is bound to.
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Wait for the next payload. `None` once closed or when the broker ended the stream.
    pub async fn next(&mut self) -> Option<String> {
        self.messages.as_mut()?.next().await
    }

    /// Release broker resources. Returns `true` only for the call that actually released.
    pub fn close(&mut self) -> bool {
        let Some(messages) = self.messages.take() else {
            return false;
        };
        drop(messages);
        if let Some(release) = self.release.take() {
            release();
        }
        true
    }

    /// Whether [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.messages.is_none()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .field("closed", &self.is_closed())
            .finish()
    }
}
