//! TCP server: configuration, bind with retries, handshake, accept loop.

use std::future::Future;
use std::io::{self, Write};
use std::ops::RangeInclusive;
use std::sync::Arc;

use rand::Rng;
use tokio::net::TcpListener;
use tracing::info;

use super::connection::handle_connection;
use crate::bridge::codec::DEFAULT_MAX_LINE_LENGTH;
use crate::bridge::protocol::Handshake;
use crate::tasks::TaskRegistry;
use crate::worker::{Engine, Worker};

/// Ports tried when none is configured.
pub const PORT_RANGE: RangeInclusive<u16> = 20000..=59999;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },

    #[error("missing value for {0}")]
    MissingValue(String),

    #[error("unknown argument '{0}'")]
    UnknownArgument(String),
}

impl ConfigError {
    fn invalid(key: &str, value: &str, reason: impl ToString) -> Self {
        Self::Invalid {
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    /// Fixed port, tried once. `None` picks random ports from [`PORT_RANGE`].
    pub port: Option<u16>,
    /// Random ports to try before giving up.
    pub bind_attempts: u32,
    /// Maximum frame length in bytes.
    pub max_line_length: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: None,
            bind_attempts: 10,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `JLBRIDGE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env(|key| std::env::var(key).ok())
    }

    /// Apply overrides from a variable lookup. Empty values are ignored.
    pub fn with_env(mut self, var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let lookup = |key: &str| var(key).filter(|v| !v.trim().is_empty());

        if let Some(host) = lookup("JLBRIDGE_HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("JLBRIDGE_PORT") {
            self.port = Some(parse_port("JLBRIDGE_PORT", &port)?);
        }
        if let Some(attempts) = lookup("JLBRIDGE_BIND_ATTEMPTS") {
            self.bind_attempts = parse_attempts("JLBRIDGE_BIND_ATTEMPTS", &attempts)?;
        }
        if let Some(max) = lookup("JLBRIDGE_MAX_LINE") {
            self.max_line_length = max
                .trim()
                .parse()
                .map_err(|e| ConfigError::invalid("JLBRIDGE_MAX_LINE", &max, e))?;
        }
        Ok(self)
    }

    /// Apply `--host`, `--port` and `--bind-attempts` flags.
    ///
    /// Both `--flag value` and `--flag=value` are accepted.
    pub fn with_args<I>(mut self, args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let mut args = args.into_iter().map(Into::into);
        while let Some(arg) = args.next() {
            let (flag, inline) = match arg.split_once('=') {
                Some((flag, value)) => (flag.to_string(), Some(value.to_string())),
                None => (arg, None),
            };
            if !matches!(flag.as_str(), "--host" | "--port" | "--bind-attempts") {
                return Err(ConfigError::UnknownArgument(flag));
            }
            let value = match inline.or_else(|| args.next()) {
                Some(value) => value,
                None => return Err(ConfigError::MissingValue(flag)),
            };
            match flag.as_str() {
                "--host" => self.host = value,
                "--port" => self.port = Some(parse_port(&flag, &value)?),
                _ => self.bind_attempts = parse_attempts(&flag, &value)?,
            }
        }
        Ok(self)
    }
}

fn parse_port(key: &str, value: &str) -> Result<u16, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|e| ConfigError::invalid(key, value, e))
}

fn parse_attempts(key: &str, value: &str) -> Result<u32, ConfigError> {
    match value.trim().parse::<u32>() {
        Ok(0) => Err(ConfigError::invalid(key, value, "must be at least 1")),
        Ok(attempts) => Ok(attempts),
        Err(e) => Err(ConfigError::invalid(key, value, e)),
    }
}

/// Bind the listener.
///
/// A configured port is tried once. Otherwise random ports from
/// [`PORT_RANGE`] are tried up to `bind_attempts` times and the last error
/// is returned.
pub async fn bind(config: &ServerConfig) -> io::Result<TcpListener> {
    if let Some(port) = config.port {
        return TcpListener::bind((config.host.as_str(), port)).await;
    }

    let mut last_err = None;
    for attempt in 1..=config.bind_attempts.max(1) {
        let port = rand::thread_rng().gen_range(PORT_RANGE);
        match TcpListener::bind((config.host.as_str(), port)).await {
            Ok(listener) => return Ok(listener),
            Err(e) => {
                tracing::debug!(attempt, port, error = %e, "Bind failed");
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| io::Error::other("no bind attempts made")))
}

/// Print the handshake line on stdout.
pub fn announce(handshake: &Handshake) -> io::Result<()> {
    let line = serde_json::to_string(handshake)?;
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{line}")?;
    stdout.flush()
}

/// Bind, announce, and serve until SIGINT/SIGTERM.
pub async fn serve<E: Engine>(config: ServerConfig, worker: Arc<Worker<E>>) -> anyhow::Result<()> {
    let listener = match bind(&config).await {
        Ok(listener) => listener,
        Err(e) => {
            announce(&Handshake::Error { msg: e.to_string() })?;
            return Err(anyhow::Error::new(e).context(format!("failed to bind on {}", config.host)));
        }
    };
    let addr = listener.local_addr()?;
    announce(&Handshake::Ready {
        addr: addr.ip().to_string(),
        port: addr.port(),
    })?;

    info!("Serving on {}", addr);
    serve_listener(listener, worker, config.max_line_length, shutdown_signal()).await
}

/// Accept connections on `listener` until `shutdown` resolves.
///
/// Connections share the worker, so scopes and references outlive them.
pub async fn serve_listener<E, F>(
    listener: TcpListener,
    worker: Arc<Worker<E>>,
    max_line_length: usize,
    shutdown: F,
) -> anyhow::Result<()>
where
    E: Engine,
    F: Future<Output = ()>,
{
    let tasks = TaskRegistry::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        continue;
                    }
                };
                tracing::debug!(%peer, "Connection opened");
                let worker = Arc::clone(&worker);
                let tasks = tasks.clone();
                tokio::spawn(async move {
                    handle_connection(stream, worker, tasks, max_line_length).await;
                    tracing::debug!(%peer, "Connection closed");
                });
            }
            _ = &mut shutdown => break,
        }
    }

    if !tasks.is_empty() {
        info!(in_flight = tasks.len(), "Aborting in-flight requests");
        tasks.abort_all();
    }
    info!("Server shutdown complete");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, None);
        assert_eq!(config.bind_attempts, 10);
        assert_eq!(config.max_line_length, 64 * 1024 * 1024);
    }

    #[test]
    fn env_overrides() {
        let config = ServerConfig::default()
            .with_env(env(&[
                ("JLBRIDGE_HOST", "0.0.0.0"),
                ("JLBRIDGE_PORT", "9000"),
                ("JLBRIDGE_BIND_ATTEMPTS", "3"),
                ("JLBRIDGE_MAX_LINE", "1024"),
            ]))
            .unwrap();
        assert_eq!(
            config,
            ServerConfig {
                host: "0.0.0.0".into(),
                port: Some(9000),
                bind_attempts: 3,
                max_line_length: 1024,
            }
        );
    }

    #[test]
    fn empty_env_values_are_ignored() {
        let config = ServerConfig::default()
            .with_env(env(&[("JLBRIDGE_PORT", ""), ("JLBRIDGE_HOST", " ")]))
            .unwrap();
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn invalid_env_values_are_rejected() {
        let err = ServerConfig::default()
            .with_env(env(&[("JLBRIDGE_PORT", "99999")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "JLBRIDGE_PORT"));

        let err = ServerConfig::default()
            .with_env(env(&[("JLBRIDGE_BIND_ATTEMPTS", "0")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn args_override_env() {
        let config = ServerConfig::default()
            .with_env(env(&[("JLBRIDGE_PORT", "9000")]))
            .unwrap()
            .with_args(["--port=9001", "--host", "::1", "--bind-attempts", "2"])
            .unwrap();
        assert_eq!(config.port, Some(9001));
        assert_eq!(config.host, "::1");
        assert_eq!(config.bind_attempts, 2);
    }

    #[test]
    fn bad_args() {
        assert!(matches!(
            ServerConfig::default().with_args(["--verbose"]),
            Err(ConfigError::UnknownArgument(a)) if a == "--verbose"
        ));
        assert!(matches!(
            ServerConfig::default().with_args(["--port"]),
            Err(ConfigError::MissingValue(_))
        ));
    }

    #[tokio::test]
    async fn random_port_is_in_range() {
        let listener = bind(&ServerConfig::default()).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(PORT_RANGE.contains(&port));
    }

    #[tokio::test]
    async fn fixed_port_is_tried_once() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();
        let config = ServerConfig {
            port: Some(port),
            ..ServerConfig::default()
        };
        assert!(bind(&config).await.is_err());
    }
}
