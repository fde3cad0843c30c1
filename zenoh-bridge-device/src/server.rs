//! Connection controller: routes client commands to per-client contexts.
//!
//! Commands arrive on `<prefix>/clients/*/cmd`. The first command from a
//! client id creates its [`ClientContext`]; the context lives until the
//! client's liveliness token disappears. Each context runs on its own
//! task, and its events are published by a forwarder task.

use std::collections::HashMap;
use std::sync::Arc;

use telebridge_common::{BridgeCommand, decode_auto};
use telebridge_framework::{BridgeError, ClientPresence, PresenceChange, Publisher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::context::{BridgeServices, ClientContext};
use crate::events::EventSink;

/// Handle to one client's context task.
#[derive(Debug)]
struct ClientHandle {
    commands: mpsc::UnboundedSender<BridgeCommand>,
    task: JoinHandle<()>,
}

impl ClientHandle {
    fn spawn(client_id: &str, services: Arc<BridgeServices>, publisher: Publisher) -> Self {
        let (sink, mut events) = EventSink::channel();

        // Runs while any sink clone lives; job watchers may outlive the
        // context and still report under this client id.
        let id = client_id.to_string();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let Err(e) = publisher.publish_event(&id, &event).await {
                    tracing::warn!(client = %id, kind = event.kind(), error = %e, "Failed to publish event");
                }
            }
        });

        let (commands, mut rx) = mpsc::unbounded_channel();
        let mut context = ClientContext::new(client_id, services, sink);
        let task = tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                context.handle(command).await;
            }
            context.shutdown().await;
        });

        tracing::info!(client = %client_id, "Client context created");
        Self { commands, task }
    }

    fn is_alive(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop accepting commands and wait for the context to shut down.
    async fn close(self, client_id: String) {
        drop(self.commands);
        if let Err(e) = self.task.await {
            tracing::error!(client = %client_id, error = %e, "Client context failed");
        }
        tracing::info!(client = %client_id, "Client context closed");
    }
}

/// Serve clients until the command subscription ends.
pub async fn serve(
    services: Arc<BridgeServices>,
    publisher: Publisher,
) -> telebridge_framework::Result<()> {
    let session = Arc::clone(publisher.session());
    let keys = publisher.keys().clone();

    let commands_key = keys.all_commands_wildcard();
    let subscriber = session
        .declare_subscriber(&commands_key)
        .await
        .map_err(|e| BridgeError::ZenohSession(format!("Failed to subscribe to {}: {}", commands_key, e)))?;
    tracing::info!(key = %commands_key, "Listening for client commands");

    let (_presence, mut changes) = ClientPresence::start(Arc::clone(&session), keys.clone()).await?;
    let mut clients: HashMap<String, ClientHandle> = HashMap::new();

    loop {
        tokio::select! {
            sample = subscriber.recv_async() => {
                let Ok(sample) = sample else {
                    tracing::warn!("Command subscription closed");
                    break;
                };
                let key = sample.key_expr().as_str();
                let Some(client_id) = keys.parse_client_id(key) else {
                    tracing::debug!(key = %key, "Ignoring command on unexpected key");
                    continue;
                };

                let command: BridgeCommand = match decode_auto(&sample.payload().to_bytes()) {
                    Ok(command) => command,
                    Err(e) => {
                        tracing::warn!(client = %client_id, error = %e, "Undecodable command");
                        continue;
                    }
                };

                if clients.get(client_id).is_none_or(|h| !h.is_alive()) {
                    let handle = ClientHandle::spawn(
                        client_id,
                        Arc::clone(&services),
                        publisher.clone(),
                    );
                    clients.insert(client_id.to_string(), handle);
                }
                if let Some(handle) = clients.get(client_id) {
                    if handle.commands.send(command).is_err() {
                        tracing::warn!(client = %client_id, "Client context gone, command dropped");
                    }
                }
            }
            Some(change) = changes.recv() => match change {
                PresenceChange::Joined(client_id) => {
                    tracing::info!(client = %client_id, "Client joined");
                }
                PresenceChange::Left(client_id) => {
                    tracing::info!(client = %client_id, "Client left");
                    if let Some(handle) = clients.remove(&client_id) {
                        tokio::spawn(handle.close(client_id));
                    }
                }
            },
        }
    }

    for (client_id, handle) in clients.drain() {
        handle.close(client_id).await;
    }
    Ok(())
}
