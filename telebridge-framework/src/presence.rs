//! Liveliness-based presence for the bridge and its clients.
//!
//! # Key Expressions
//!
//! - Bridge liveliness: `<prefix>/@/alive`
//! - Client liveliness: `<prefix>/@/clients/<client_id>/alive`
//!
//! The bridge declares its own token for as long as [`ClientPresence`]
//! lives and reports client tokens appearing and disappearing as
//! [`PresenceChange`]s. A disappearing client token is how the bridge
//! learns that a client went away.

use std::sync::Arc;

use tokio::sync::mpsc;
use zenoh::Session;
use zenoh::liveliness::LivelinessToken;
use zenoh::sample::SampleKind;

use telebridge_common::ClientKeys;

use crate::error::{BridgeError, Result};

/// A client token appeared or disappeared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceChange {
    Joined(String),
    Left(String),
}

impl PresenceChange {
    pub fn client_id(&self) -> &str {
        match self {
            PresenceChange::Joined(id) | PresenceChange::Left(id) => id,
        }
    }
}

/// Holds the bridge liveliness token and watches client tokens.
#[derive(Debug)]
pub struct ClientPresence {
    #[allow(dead_code)]
    bridge_token: LivelinessToken,
    watcher: tokio::task::JoinHandle<()>,
}

impl ClientPresence {
    /// Declare the bridge as alive and start watching client tokens.
    ///
    /// Tokens already present when the watch starts are reported as
    /// [`PresenceChange::Joined`].
    pub async fn start(
        session: Arc<Session>,
        keys: ClientKeys,
    ) -> Result<(Self, mpsc::Receiver<PresenceChange>)> {
        let bridge_key = keys.bridge_alive_key();
        let bridge_token = session
            .liveliness()
            .declare_token(&bridge_key)
            .await
            .map_err(|e| BridgeError::presence(format!("Failed to declare bridge token: {}", e)))?;

        tracing::info!(key = %bridge_key, "Bridge liveliness token declared");

        let wildcard = keys.all_presence_wildcard();
        let subscriber = session
            .liveliness()
            .declare_subscriber(&wildcard)
            .history(true)
            .await
            .map_err(|e| {
                BridgeError::presence(format!("Failed to watch client tokens: {}", e))
            })?;

        let (tx, rx) = mpsc::channel(64);
        let watcher = tokio::spawn(async move {
            while let Ok(sample) = subscriber.recv_async().await {
                let key = sample.key_expr().as_str();
                let Some(client_id) = keys.parse_client_id(key) else {
                    tracing::debug!(key = %key, "Ignoring unrelated liveliness key");
                    continue;
                };

                let change = match sample.kind() {
                    SampleKind::Put => PresenceChange::Joined(client_id.to_string()),
                    SampleKind::Delete => PresenceChange::Left(client_id.to_string()),
                };
                tracing::debug!(?change, "Client presence changed");

                if tx.send(change).await.is_err() {
                    break;
                }
            }
        });

        Ok((
            Self {
                bridge_token,
                watcher,
            },
            rx,
        ))
    }

    /// Declare a client token. Used by clients and tests.
    pub async fn declare_client(
        session: &Session,
        keys: &ClientKeys,
        client_id: &str,
    ) -> Result<LivelinessToken> {
        session
            .liveliness()
            .declare_token(keys.presence_key(client_id))
            .await
            .map_err(|e| {
                BridgeError::presence(format!(
                    "Failed to declare client token for {}: {}",
                    client_id, e
                ))
            })
    }
}

impl Drop for ClientPresence {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}
