// # Change Notifier
//
// The sink the scraper hands owner keys to when a tracked subdomain's NS
// values drift. The owning controller uses it to enqueue a re-reconcile.
//
// ## Implementations
//
// - Any `Fn(OwnerKey) + Send + Sync` closure
// - `ChannelNotifier`: bounded channel feeding a `ChangeStream`

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

/// Identifies the controller-owned object that asked for a subdomain to be tracked
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OwnerKey {
    /// Namespace of the owning object
    pub namespace: String,
    /// Name of the owning object
    pub name: String,
}

impl OwnerKey {
    /// Create a new owner key
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for OwnerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl std::str::FromStr for OwnerKey {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((namespace, name)) if !namespace.is_empty() && !name.is_empty() => {
                Ok(Self::new(namespace, name))
            }
            _ => Err(crate::Error::config(format!(
                "Invalid owner key {s:?}, expected namespace/name"
            ))),
        }
    }
}

/// Trait for change notification sinks
///
/// # Contract
///
/// `notify` is fire-and-forget and must not block indefinitely: the scrape
/// loop calls it inline after every pass that detected drift.
pub trait ChangeNotifier: Send + Sync {
    /// Report that the subdomain owned by `owner` changed
    fn notify(&self, owner: OwnerKey);
}

impl<F> ChangeNotifier for F
where
    F: Fn(OwnerKey) + Send + Sync,
{
    fn notify(&self, owner: OwnerKey) {
        self(owner)
    }
}

/// Stream of owner keys produced by a [`ChannelNotifier`]
pub type ChangeStream = ReceiverStream<OwnerKey>;

/// Notifier backed by a bounded channel
///
/// When the buffer is full the notification is dropped with a warning
/// rather than stalling the scrape loop.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::Sender<OwnerKey>,
}

impl ChangeNotifier for ChannelNotifier {
    fn notify(&self, owner: OwnerKey) {
        match self.tx.try_send(owner) {
            Ok(()) => {}
            Err(TrySendError::Full(owner)) => {
                warn!(%owner, "Change notification channel full, dropping notification");
            }
            Err(TrySendError::Closed(owner)) => {
                warn!(%owner, "Change notification receiver dropped");
            }
        }
    }
}

/// Create a bounded notification channel
///
/// # Parameters
///
/// - `capacity`: Buffered notifications before new ones are dropped
pub fn notification_channel(capacity: usize) -> (ChannelNotifier, ChangeStream) {
    let (tx, rx) = mpsc::channel(capacity);
    (ChannelNotifier { tx }, ReceiverStream::new(rx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio_stream::StreamExt;

    #[test]
    fn test_owner_key_display_and_parse() {
        let key = OwnerKey::new("test-namespace", "test-name");
        assert_eq!(key.to_string(), "test-namespace/test-name");
        assert_eq!("test-namespace/test-name".parse::<OwnerKey>().unwrap(), key);
        assert!("no-slash".parse::<OwnerKey>().is_err());
        assert!("/name".parse::<OwnerKey>().is_err());
    }

    #[test]
    fn test_closure_notifier() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = Arc::clone(&seen);
            move |owner: OwnerKey| seen.lock().unwrap().push(owner)
        };

        sink.notify(OwnerKey::new("ns", "a"));
        sink.notify(OwnerKey::new("ns", "b"));

        assert_eq!(
            *seen.lock().unwrap(),
            vec![OwnerKey::new("ns", "a"), OwnerKey::new("ns", "b")]
        );
    }

    #[tokio::test]
    async fn test_channel_notifier_drops_when_full() {
        let (notifier, mut stream) = notification_channel(1);

        notifier.notify(OwnerKey::new("ns", "first"));
        // Buffer is full, must not block
        notifier.notify(OwnerKey::new("ns", "second"));
        drop(notifier);

        assert_eq!(stream.next().await, Some(OwnerKey::new("ns", "first")));
        assert_eq!(stream.next().await, None);
    }

    #[test]
    fn test_channel_notifier_closed_receiver() {
        let (notifier, stream) = notification_channel(4);
        drop(stream);
        notifier.notify(OwnerKey::new("ns", "orphan"));
    }
}
