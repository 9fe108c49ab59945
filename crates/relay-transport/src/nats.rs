//! NATS publisher built on `async-nats`.
//!
//! The client library owns the wire protocol: it answers server PINGs,
//! reconnects after the server goes away and buffers writes. This module
//! adapts it to the synchronous [`Publisher`] seam used by the relay loop.

use std::sync::Arc;
use std::time::Duration;

use async_nats::{Client, ConnectOptions, Event};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Runtime;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::connection::ConnectionState;
use crate::error::TransportError;
use crate::{Publisher, TransportResult, DEFAULT_NATS_PORT};

pub use async_nats::ServerInfo;

/// Options for [`NatsPublisher`].
#[derive(Debug, Clone)]
pub struct NatsOptions {
    /// Client name announced in `CONNECT`.
    pub name: String,

    /// Deadline for TCP connect plus handshake.
    pub connect_timeout: Duration,

    /// Deadline for a single publish; expiry is a publish failure.
    pub publish_timeout: Option<Duration>,
}

impl Default for NatsOptions {
    fn default() -> Self {
        Self {
            name: "nalu-relay".to_string(),
            connect_timeout: Duration::from_secs(5),
            publish_timeout: None,
        }
    }
}

/// Parsed bus address.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Endpoint {
    host: String,
    port: u16,
    user: Option<String>,
    pass: Option<String>,
}

impl Endpoint {
    /// Accepts `host`, `host:port` or `nats://[user:pass@]host[:port]`.
    fn parse(address: &str) -> TransportResult<Self> {
        let address = address.trim();
        if address.is_empty() {
            return Err(TransportError::InvalidAddress("empty address".to_string()));
        }

        let with_scheme = if address.contains("://") {
            address.to_string()
        } else {
            format!("nats://{}", address)
        };

        let parsed =
            Url::parse(&with_scheme).map_err(|e| TransportError::InvalidAddress(e.to_string()))?;

        if parsed.scheme() != "nats" && parsed.scheme() != "tcp" {
            return Err(TransportError::InvalidAddress(format!(
                "unsupported scheme {:?}",
                parsed.scheme()
            )));
        }

        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| TransportError::InvalidAddress("missing host".to_string()))?
            .to_string();

        let user = Some(parsed.username())
            .filter(|u| !u.is_empty())
            .map(str::to_string);
        let pass = parsed.password().map(str::to_string);

        Ok(Self {
            host,
            port: parsed.port().unwrap_or(DEFAULT_NATS_PORT),
            user,
            pass,
        })
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Connection health as reported by the client's event callback.
#[derive(Debug, Default)]
struct Health {
    state: RwLock<ConnectionState>,
    server_error: Mutex<Option<String>>,
}

impl Health {
    fn observe(&self, event: Event) {
        match event {
            Event::Connected => {
                *self.state.write() = ConnectionState::Connected;
                info!("NATS connection up");
            }
            Event::Disconnected => {
                *self.state.write() = ConnectionState::Disconnected;
                warn!("NATS connection lost, reconnecting");
            }
            Event::ServerError(err) => {
                warn!("NATS server error: {}", err);
                *self.server_error.lock() = Some(err.to_string());
            }
            other => debug!(event = ?other, "NATS client event"),
        }
    }

    /// Leave `Connecting` once the initial handshake has returned, unless an
    /// event already moved the state on.
    fn handshake_complete(&self) {
        let mut state = self.state.write();
        if *state == ConnectionState::Connecting {
            *state = ConnectionState::Connected;
        }
    }

    fn take_server_error(&self) -> Option<String> {
        self.server_error.lock().take()
    }
}

/// Publishing NATS client.
///
/// The client owns a tokio runtime whose worker keeps the connection alive
/// between calls; publishing blocks the calling thread on that runtime so
/// it can be used from the synchronous relay loop.
pub struct NatsPublisher {
    client: Client,
    health: Arc<Health>,
    options: NatsOptions,
    endpoint: Endpoint,
    messages_sent: u64,
    bytes_sent: u64,
    // Dropped last: the client's background tasks live on it.
    runtime: Runtime,
}

impl NatsPublisher {
    /// Connect to the NATS server at `address` and complete the handshake.
    #[instrument(name = "nats_connect", skip_all)]
    pub fn connect(address: &str, options: NatsOptions) -> TransportResult<Self> {
        let endpoint = Endpoint::parse(address)?;

        info!(endpoint = %endpoint, "Connecting to NATS server");

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("nats-io")
            .enable_all()
            .build()
            .map_err(TransportError::Io)?;

        let health = Arc::new(Health::default());
        let events = Arc::clone(&health);

        let mut connect_options = ConnectOptions::new()
            .name(&options.name)
            .connection_timeout(options.connect_timeout)
            .event_callback(move |event| {
                let health = Arc::clone(&events);
                async move { health.observe(event) }
            });
        if let Some(user) = &endpoint.user {
            connect_options = connect_options
                .user_and_password(user.clone(), endpoint.pass.clone().unwrap_or_default());
        }

        let deadline = options.connect_timeout;
        let client = runtime
            .block_on(async {
                tokio::time::timeout(
                    deadline,
                    async_nats::connect_with_options(endpoint.to_string(), connect_options),
                )
                .await
            })
            .map_err(|_| TransportError::Timeout(deadline))?
            .map_err(|e| TransportError::ConnectionFailed(format!("{}: {}", endpoint, e)))?;
        health.handshake_complete();

        let server_info = client.server_info();
        info!(
            server_id = %server_info.server_id,
            version = %server_info.version,
            max_payload = server_info.max_payload,
            "NATS connection established"
        );

        Ok(Self {
            client,
            health,
            options,
            endpoint,
            messages_sent: 0,
            bytes_sent: 0,
            runtime,
        })
    }

    /// Server details from the most recent handshake.
    pub fn server_info(&self) -> ServerInfo {
        self.client.server_info()
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.health.state.read()
    }

    /// Messages published since connecting.
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent
    }

    /// Payload bytes published since connecting.
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }
}

impl Publisher for NatsPublisher {
    fn publish(&mut self, subject: &str, payload: &[u8]) -> TransportResult<()> {
        validate_subject(subject)?;

        // Zero means the server did not announce a limit.
        let limit = self.client.server_info().max_payload;
        if limit > 0 && payload.len() > limit {
            return Err(TransportError::PayloadTooLarge {
                size: payload.len(),
                limit,
            });
        }

        // An asynchronous -ERR fails the publish that follows it.
        if let Some(message) = self.health.take_server_error() {
            return Err(TransportError::Server(message));
        }

        if !self.state().is_connected() {
            return Err(TransportError::NotConnected);
        }

        let client = &self.client;
        let message = Bytes::copy_from_slice(payload);
        let subject = subject.to_string();
        let result = match self.options.publish_timeout {
            Some(deadline) => self
                .runtime
                .block_on(async {
                    tokio::time::timeout(deadline, client.publish(subject, message)).await
                })
                .map_err(|_| TransportError::Timeout(deadline))
                .and_then(|r| r.map_err(|e| TransportError::Send(e.to_string()))),
            None => self
                .runtime
                .block_on(client.publish(subject, message))
                .map_err(|e| TransportError::Send(e.to_string())),
        };

        if let Err(e) = result {
            warn!(endpoint = %self.endpoint, "NATS publish failed: {}", e);
            return Err(e);
        }

        self.messages_sent += 1;
        self.bytes_sent += payload.len() as u64;
        Ok(())
    }

    fn flush(&mut self) -> TransportResult<()> {
        let deadline = self
            .options
            .publish_timeout
            .unwrap_or(self.options.connect_timeout);
        let client = &self.client;

        self.runtime
            .block_on(async { tokio::time::timeout(deadline, client.flush()).await })
            .map_err(|_| TransportError::Timeout(deadline))?
            .map_err(|e| TransportError::Send(e.to_string()))?;

        debug!(messages = self.messages_sent, "NATS flush complete");
        Ok(())
    }
}

impl Drop for NatsPublisher {
    fn drop(&mut self) {
        // Hand buffered messages to the server; skipped while reconnecting.
        if !self.state().is_connected() {
            return;
        }
        let deadline = self.options.connect_timeout;
        let client = &self.client;
        match self
            .runtime
            .block_on(async { tokio::time::timeout(deadline, client.flush()).await })
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Final NATS flush failed: {}", e),
            Err(_) => debug!("Final NATS flush timed out after {:?}", deadline),
        }
    }
}

/// Subjects are dot-separated tokens without whitespace.
fn validate_subject(subject: &str) -> TransportResult<()> {
    let valid = !subject.is_empty()
        && !subject.chars().any(char::is_whitespace)
        && subject.split('.').all(|token| !token.is_empty());

    if valid {
        Ok(())
    } else {
        Err(TransportError::InvalidSubject(subject.to_string()))
    }
}
