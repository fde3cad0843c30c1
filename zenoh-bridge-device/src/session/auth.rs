//! Relay of interactive authentication prompts to the client.

use std::sync::{Mutex, MutexGuard, PoisonError};

use telebridge_common::BridgeEvent;
use tokio::sync::oneshot;

use crate::events::EventSink;

/// Holds the resolver of the single outstanding prompt.
///
/// A new challenge replaces the previous resolver; the superseded prompt
/// is never answered and its waiter sees `None`.
#[derive(Debug, Default)]
pub struct AuthBroker {
    pending: Mutex<Option<oneshot::Sender<String>>>,
}

impl AuthBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Option<oneshot::Sender<String>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Emit an `auth_challenge` and wait for the client's answer.
    pub async fn challenge(&self, sink: &EventSink, prompt: &str, echo: bool) -> Option<String> {
        let (tx, rx) = oneshot::channel();
        if self.slot().replace(tx).is_some() {
            tracing::debug!("Superseding unanswered authentication prompt");
        }

        sink.emit(BridgeEvent::AuthChallenge {
            prompt: prompt.to_string(),
            echo,
        });
        rx.await.ok()
    }

    /// Deliver the client's answer. Returns false if nothing was pending.
    pub fn answer(&self, value: String) -> bool {
        match self.slot().take() {
            Some(tx) => tx.send(value).is_ok(),
            None => false,
        }
    }

    /// Drop the pending prompt, if any.
    pub fn cancel(&self) {
        self.slot().take();
    }

    pub fn is_pending(&self) -> bool {
        self.slot().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_answer_resolves_challenge() {
        let broker = Arc::new(AuthBroker::new());
        let (sink, mut events) = EventSink::channel();

        let waiter = {
            let broker = Arc::clone(&broker);
            tokio::spawn(async move { broker.challenge(&sink, "Password: ", false).await })
        };

        assert_eq!(
            events.recv().await,
            Some(BridgeEvent::AuthChallenge {
                prompt: "Password: ".to_string(),
                echo: false
            })
        );
        assert!(broker.answer("hunter2".to_string()));
        assert_eq!(waiter.await.unwrap(), Some("hunter2".to_string()));
        assert!(!broker.answer("late".to_string()));
    }

    #[tokio::test]
    async fn test_new_challenge_supersedes_old() {
        let broker = Arc::new(AuthBroker::new());
        let (sink, mut events) = EventSink::channel();

        let first = {
            let (broker, sink) = (Arc::clone(&broker), sink.clone());
            tokio::spawn(async move { broker.challenge(&sink, "Code: ", true).await })
        };
        events.recv().await;

        let second = {
            let broker = Arc::clone(&broker);
            tokio::spawn(async move { broker.challenge(&sink, "Token: ", true).await })
        };
        events.recv().await;

        assert_eq!(first.await.unwrap(), None);
        assert!(broker.answer("42".to_string()));
        assert_eq!(second.await.unwrap(), Some("42".to_string()));
    }

    #[tokio::test]
    async fn test_cancel_without_pending() {
        let broker = AuthBroker::new();
        broker.cancel();
        assert!(!broker.is_pending());
    }
}
