//! Resilient SSH transport.
//!
//! One `SshTransport` per job: dialed once, shared by all traversal
//! workers. Only session opens contend, and those are gated by the
//! circuit breaker; each node run gets its own exec channel.

use crate::error::CollectError;
use crate::models::TransportConfig;
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig};
use crate::CollectResult;
use async_trait::async_trait;
use russh::client::Handle;
use russh::ChannelMsg;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use worker_pool::JobContext;

/// TCP + SSH handshake budget.
const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Captured output of one script run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptOutput {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub exit_status: u32,
}

/// Runs one script to completion and returns its streams as lines.
///
/// The seam between the node executor and the wire: production uses
/// `SshTransport`, tests substitute scripted fakes.
#[async_trait]
pub trait ScriptRunner: Send + Sync {
    async fn run_script(&self, script: &str, ctx: &JobContext) -> CollectResult<ScriptOutput>;
}

/// Host key acceptor.
///
/// Collection targets are lab-provisioned hosts addressed by inventory;
/// key pinning belongs in the catalog and lands here when it does.
struct Acceptor;

impl russh::client::Handler for Acceptor {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Resilient SSH client: dial + breaker-gated session opens.
pub struct SshTransport {
    handle: Handle<Acceptor>,
    breaker: CircuitBreaker,
    remote: String,
    closed: AtomicBool,
}

impl SshTransport {
    /// Dial and authenticate within the 10s dial budget.
    ///
    /// Auth order: private key (when a key path is configured), then
    /// password fallback.
    pub async fn connect(config: &TransportConfig, ctx: &JobContext) -> CollectResult<Self> {
        let (host, port) = parse_remote(&config.remote_host)?;

        debug!(host = %host, port, login = %config.login, "SSH connecting");

        let ssh_config = Arc::new(russh::client::Config::default());
        let dial = russh::client::connect(ssh_config, (host.as_str(), port), Acceptor);

        let handle = tokio::select! {
            _ = ctx.cancelled() => return Err(CollectError::from_cancelled_ctx(ctx)),
            result = tokio::time::timeout(DIAL_TIMEOUT, dial) => match result {
                Ok(Ok(handle)) => handle,
                Ok(Err(e)) => {
                    return Err(CollectError::Dial(format!(
                        "{}:{}: {}", host, port, e
                    )))
                }
                Err(_) => {
                    return Err(CollectError::Dial(format!(
                        "{}:{}: dial timeout after {:?}", host, port, DIAL_TIMEOUT
                    )))
                }
            },
        };

        let mut handle = handle;
        authenticate(&mut handle, config).await?;

        info!(remote = %config.remote_host, "SSH connection established");

        Ok(Self {
            handle,
            breaker: CircuitBreaker::new("ssh-session", CircuitBreakerConfig::default()),
            remote: config.remote_host.clone(),
            closed: AtomicBool::new(false),
        })
    }

    /// Open one exec session, gated by the circuit breaker.
    async fn open_session(&self) -> CollectResult<russh::Channel<russh::client::Msg>> {
        if !self.breaker.try_acquire() {
            return Err(CollectError::BreakerOpen);
        }

        match self.handle.channel_open_session().await {
            Ok(channel) => {
                self.breaker.record_success();
                Ok(channel)
            }
            Err(e) => {
                self.breaker.record_failure();
                Err(classify_ssh_error(e))
            }
        }
    }

    /// Release the underlying socket. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self
            .handle
            .disconnect(russh::Disconnect::ByApplication, "", "English")
            .await;
        debug!(remote = %self.remote, "SSH connection closed");
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

#[async_trait]
impl ScriptRunner for SshTransport {
    /// Run one script on a fresh session, draining stdout/stderr to lines.
    ///
    /// Cancellation stops the drain immediately; the channel is dropped
    /// with the future, which releases the reader.
    async fn run_script(&self, script: &str, ctx: &JobContext) -> CollectResult<ScriptOutput> {
        if ctx.is_cancelled() {
            return Err(CollectError::from_cancelled_ctx(ctx));
        }

        let mut channel = self.open_session().await?;

        channel
            .exec(true, script)
            .await
            .map_err(classify_ssh_error)?;

        let mut stdout = LineBuffer::default();
        let mut stderr = LineBuffer::default();
        let mut exit_status: Option<u32> = None;

        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    debug!("Output reading cancelled");
                    return Err(CollectError::from_cancelled_ctx(ctx));
                }
                msg = channel.wait() => match msg {
                    None => break,
                    Some(ChannelMsg::Data { ref data }) => stdout.push(data),
                    Some(ChannelMsg::ExtendedData { ref data, ext: 1 }) => stderr.push(data),
                    Some(ChannelMsg::ExitStatus { exit_status: status }) => {
                        exit_status = Some(status);
                    }
                    Some(_) => {}
                },
            }
        }

        let status = exit_status.unwrap_or(0);
        if status != 0 {
            warn!(status, "Script exited non-zero");
            return Err(CollectError::ScriptExit { status });
        }

        Ok(ScriptOutput {
            stdout: stdout.into_lines(),
            stderr: stderr.into_lines(),
            exit_status: status,
        })
    }
}

async fn authenticate(handle: &mut Handle<Acceptor>, config: &TransportConfig) -> CollectResult<()> {
    let login = config.login.as_str();
    if login.is_empty() {
        return Err(CollectError::Auth("no login configured".to_string()));
    }

    if !config.ssh_key_path.is_empty() {
        match private_key_auth(handle, login, &config.ssh_key_path).await {
            Ok(true) => return Ok(()),
            Ok(false) => {
                warn!(key = %config.ssh_key_path, "Private key rejected, trying password")
            }
            Err(e) => warn!(key = %config.ssh_key_path, error = %e, "Private key unusable, trying password"),
        }
    }

    if !config.password.is_empty() {
        let auth = handle
            .authenticate_password(login, config.password.as_str())
            .await
            .map_err(|e| CollectError::Auth(e.to_string()))?;
        if auth.success() {
            return Ok(());
        }
    }

    Err(CollectError::Auth(format!(
        "all methods rejected for {}@{}",
        login, config.remote_host
    )))
}

async fn private_key_auth(
    handle: &mut Handle<Acceptor>,
    login: &str,
    key_path: &str,
) -> CollectResult<bool> {
    let key = russh::keys::load_secret_key(key_path, None)
        .map_err(|e| CollectError::Auth(format!("unable to read private key: {}", e)))?;

    let hash = handle
        .best_supported_rsa_hash()
        .await
        .map_err(|e| CollectError::Auth(e.to_string()))?
        .flatten();

    let auth = handle
        .authenticate_publickey(
            login,
            russh::keys::PrivateKeyWithHashAlg::new(Arc::new(key), hash),
        )
        .await
        .map_err(|e| CollectError::Auth(e.to_string()))?;

    Ok(auth.success())
}

/// Only known "session is dead" errors count as transient; everything
/// else (policy rejection, malformed request) is permanent.
fn classify_ssh_error(err: russh::Error) -> CollectError {
    match err {
        russh::Error::Disconnect | russh::Error::SendError | russh::Error::IO(_) => {
            CollectError::Session(err.to_string())
        }
        other => CollectError::Protocol(other.to_string()),
    }
}

fn parse_remote(remote: &str) -> CollectResult<(String, u16)> {
    match remote.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => {
            let port: u16 = port.parse().map_err(|_| {
                CollectError::Validation(format!("invalid port in remote host {:?}", remote))
            })?;
            Ok((host.to_string(), port))
        }
        None if !remote.is_empty() => Ok((remote.to_string(), 22)),
        _ => Err(CollectError::Validation(format!(
            "invalid remote host {:?}",
            remote
        ))),
    }
}

/// Accumulates raw chunks and yields complete lines.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
    lines: Vec<String>,
}

impl LineBuffer {
    fn push(&mut self, data: &[u8]) {
        self.pending.extend_from_slice(data);
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop(); // the newline itself
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            self.lines.push(String::from_utf8_lossy(&line).into_owned());
        }
    }

    fn into_lines(mut self) -> Vec<String> {
        if !self.pending.is_empty() {
            self.lines
                .push(String::from_utf8_lossy(&self.pending).into_owned());
        }
        self.lines
    }
}
