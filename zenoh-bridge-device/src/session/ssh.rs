//! SSH transport: password or keyboard-interactive auth, then an
//! interactive shell on a PTY.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use russh::client::{self, KeyboardInteractiveAuthResponse};
use russh::{ChannelMsg, Disconnect};
use telebridge_common::{OpenSessionParams, SessionState};
use tokio::net::TcpStream;

use super::{AuthBroker, ShellLink, TransportError};
use crate::batch::SessionOutput;
use crate::events::EventSink;
use crate::parser::Utf8Decoder;
use crate::recovery::try_candidates;

static PASSWORD_PROMPT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)pass(word|phrase)").expect("valid regex"));

/// Does a keyboard-interactive prompt ask for the password?
pub fn is_password_prompt(prompt: &str) -> bool {
    PASSWORD_PROMPT.is_match(prompt)
}

/// How one keyboard-interactive prompt is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptRoute {
    /// Answer with the password supplied at open.
    AutoAnswer,
    /// Send an auth challenge to the client and wait for its answer.
    Relay,
}

/// Routes keyboard-interactive prompts across rounds.
///
/// A password prompt is auto-answered at most once per connection, and
/// only when a password was supplied.
#[derive(Debug)]
pub struct PromptRouter {
    has_password: bool,
    auto_answered: bool,
}

impl PromptRouter {
    pub fn new(has_password: bool) -> Self {
        Self {
            has_password,
            auto_answered: false,
        }
    }

    pub fn route(&mut self, prompt: &str) -> PromptRoute {
        if self.has_password && !self.auto_answered && is_password_prompt(prompt) {
            self.auto_answered = true;
            PromptRoute::AutoAnswer
        } else {
            PromptRoute::Relay
        }
    }
}

/// Accepts any host key, recording its fingerprint.
struct AcceptAnyKey {
    output: SessionOutput,
}

impl client::Handler for AcceptAnyKey {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint(Default::default());
        tracing::debug!(%fingerprint, "Accepting unverified host key");
        self.output
            .debug(format!("Accepting unverified host key {fingerprint}"));
        Ok(true)
    }
}

async fn connect_addr(addr: SocketAddr, timeout: Duration) -> Result<TcpStream, TransportError> {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) if e.kind() == ErrorKind::ConnectionRefused => {
            Err(TransportError::ConnectionRefused(addr.to_string()))
        }
        Ok(Err(e)) => Err(TransportError::Io(e)),
        Err(_) => Err(TransportError::Timeout(format!(
            "connecting to {} took longer than {}ms",
            addr,
            timeout.as_millis()
        ))),
    }
}

async fn open_tcp(host: &str, port: u16, timeout: Duration) -> Result<TcpStream, TransportError> {
    let target = format!("{host}:{port}");
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host(&target)
        .await
        .map_err(|e| TransportError::HostNotFound(format!("{target}: {e}")))?
        .collect();

    try_candidates(addrs, |addr| connect_addr(addr, timeout))
        .await
        .map_err(|mut errors| {
            errors
                .pop()
                .unwrap_or_else(|| TransportError::HostNotFound(target.clone()))
        })
}

async fn authenticate(
    handle: &mut client::Handle<AcceptAnyKey>,
    user: &str,
    password: Option<&str>,
    sink: &EventSink,
    output: &SessionOutput,
    auth: &AuthBroker,
) -> Result<(), TransportError> {
    if let Some(password) = password {
        output.debug(format!("Trying password authentication as {user}"));
        if handle.authenticate_password(user, password).await?.success() {
            return Ok(());
        }
        output.debug("Password authentication rejected");
    }

    output.debug("Trying keyboard-interactive authentication");
    let mut router = PromptRouter::new(password.is_some());
    let mut response = handle
        .authenticate_keyboard_interactive_start(user, None::<String>)
        .await?;

    loop {
        match response {
            KeyboardInteractiveAuthResponse::Success => return Ok(()),
            KeyboardInteractiveAuthResponse::Failure { .. } => {
                return Err(TransportError::AuthFailed(format!(
                    "server rejected credentials for {user}"
                )));
            }
            KeyboardInteractiveAuthResponse::InfoRequest { prompts, .. } => {
                let mut answers = Vec::with_capacity(prompts.len());
                for prompt in prompts {
                    match (router.route(&prompt.prompt), password) {
                        (PromptRoute::AutoAnswer, Some(password)) => {
                            output.debug("Answering password prompt automatically");
                            answers.push(password.to_string());
                        }
                        _ => {
                            output.debug(format!("Relaying prompt: {}", prompt.prompt.trim()));
                            match auth.challenge(sink, &prompt.prompt, prompt.echo).await {
                                Some(answer) => answers.push(answer),
                                None => {
                                    return Err(TransportError::AuthFailed(
                                        "authentication prompt was abandoned".to_string(),
                                    ));
                                }
                            }
                        }
                    }
                }
                response = handle
                    .authenticate_keyboard_interactive_respond(answers)
                    .await?;
            }
        }
    }
}

pub(super) async fn run(
    params: &OpenSessionParams,
    link: ShellLink,
    auth: &AuthBroker,
    connect_timeout: Duration,
) -> Result<(), TransportError> {
    let command_line = link.command_line();
    let ShellLink {
        sink,
        output,
        mut input,
        settle,
        ..
    } = link;

    let host = params
        .host
        .as_deref()
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or_else(|| TransportError::InvalidParams("ssh transport needs a host".to_string()))?;
    let port = params.port.unwrap_or(22);
    let user = params.username.as_deref().unwrap_or("root");

    output.debug(format!("Connecting TCP {host}:{port}"));
    let stream = open_tcp(host, port, connect_timeout).await?;

    let config = Arc::new(client::Config::default());
    let mut handle = tokio::time::timeout(
        connect_timeout,
        client::connect_stream(
            config,
            stream,
            AcceptAnyKey {
                output: output.clone(),
            },
        ),
    )
    .await
    .map_err(|_| TransportError::Timeout(format!("SSH handshake with {host}:{port}")))??;
    output.debug("SSH handshake complete");

    authenticate(
        &mut handle,
        user,
        params.password.as_deref(),
        &sink,
        &output,
        auth,
    )
    .await?;
    output.debug(format!("Authenticated as {user}"));

    let mut channel = handle.channel_open_session().await?;
    channel
        .request_pty(false, "xterm", 80, 24, 0, 0, &[])
        .await?;
    channel.request_shell(true).await?;

    sink.status(
        SessionState::Connected,
        format!("Connected to {user}@{host}:{port}"),
    );

    let settle_timer = tokio::time::sleep(settle);
    tokio::pin!(settle_timer);
    let mut pending = command_line;
    let mut decoder = Utf8Decoder::new();

    loop {
        tokio::select! {
            _ = &mut settle_timer, if pending.is_some() => {
                if let Some(line) = pending.take() {
                    output.debug(format!("Writing command: {}", line.trim_end()));
                    channel.data(line.as_bytes()).await?;
                }
            }
            msg = channel.wait() => match msg {
                Some(ChannelMsg::Data { data }) => output.output(decoder.decode(&data)),
                Some(ChannelMsg::ExtendedData { data, .. }) => output.output(decoder.decode(&data)),
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    output.debug(format!("Remote shell exited with status {exit_status}"));
                }
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => break,
                Some(_) => {}
            },
            data = input.recv() => match data {
                Some(bytes) => channel.data(&bytes[..]).await?,
                None => break,
            },
        }
    }

    if let Err(e) = handle
        .disconnect(Disconnect::ByApplication, "", "en")
        .await
    {
        tracing::debug!(error = %e, "SSH disconnect failed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_prompt_detection() {
        assert!(is_password_prompt("Password: "));
        assert!(is_password_prompt("Enter passphrase for key: "));
        assert!(is_password_prompt("root@10.0.0.7's password:"));
        assert!(!is_password_prompt("Verification code: "));
    }

    #[test]
    fn test_password_prompt_auto_answered_once() {
        let mut router = PromptRouter::new(true);
        assert_eq!(router.route("Password: "), PromptRoute::AutoAnswer);
        assert_eq!(router.route("Verification code: "), PromptRoute::Relay);
        // A second password prompt means the first answer was wrong.
        assert_eq!(router.route("Password: "), PromptRoute::Relay);
    }

    #[test]
    fn test_prompts_relayed_without_password() {
        let mut router = PromptRouter::new(false);
        assert_eq!(router.route("Password: "), PromptRoute::Relay);
        assert_eq!(router.route("OTP: "), PromptRoute::Relay);
    }

    #[tokio::test]
    async fn test_host_key_fingerprint_recorded() {
        use crate::batch::PipelineInput;
        use russh::client::Handler;

        let key = russh::keys::PublicKey::from_openssh(
            "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIGxG5889nq2nZEZ4XMYk/04Ix+GombD14T+8Ev4THnPf",
        )
        .unwrap();
        let (output, mut input) = SessionOutput::detached(true);
        let mut handler = AcceptAnyKey { output };

        assert!(handler.check_server_key(&key).await.unwrap());
        match input.try_recv() {
            Ok(PipelineInput::Debug(line)) => assert!(
                line.contains("SHA256:ZUbN6vgaamU3jGd/N1aTJikoyA2G0DTZ+3fWv4xVi/A"),
                "{line}"
            ),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_refused_connection_is_classified() {
        // Bind then drop to get a port nothing listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = open_tcp("127.0.0.1", port, Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::ConnectionRefused(_)));
    }
}
