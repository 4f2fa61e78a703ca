//! Russh session module
//!
//! SSH sessions using the russh crate. Russh is async-native, so commands run
//! on the Tokio runtime without tying up worker threads.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use russh::client::{Handle, Handler};
use russh::keys::key::PublicKey;
use russh::keys::load_secret_key;
use russh::{ChannelMsg, Sig};
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};

use super::{
    CommandError, CommandResult, ConnectionError, ConnectionResult, Credential, Session,
    SessionFactory, SessionTarget,
};

/// Identity files tried, in order, for [`Credential::Default`].
const DEFAULT_IDENTITY_FILES: &[&str] = &["id_ed25519", "id_ecdsa", "id_rsa"];

/// Error type for the russh client handler.
#[derive(Debug)]
pub struct HandlerError(pub russh::Error);

impl From<russh::Error> for HandlerError {
    fn from(err: russh::Error) -> Self {
        HandlerError(err)
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for HandlerError {}

/// Result of host key verification
#[derive(Debug, Clone, Copy, PartialEq)]
enum HostKeyStatus {
    /// Key matches known_hosts entry
    Verified,
    /// Host not found in known_hosts
    Unknown,
    /// Key doesn't match known_hosts entry
    Mismatch,
}

/// Client handler verifying the server key against known_hosts.
struct ClientHandler {
    host: String,
    port: u16,
    known: Arc<Vec<(String, PublicKey)>>,
    accept_unknown: bool,
    /// Set when the server key contradicts known_hosts
    mismatch: Arc<AtomicBool>,
}

impl ClientHandler {
    fn matches_host(&self, pattern: &str) -> bool {
        if let Some(rest) = pattern.strip_prefix('[') {
            return match rest.split_once("]:") {
                Some((host, port)) => host == self.host && port.parse::<u16>().ok() == Some(self.port),
                None => false,
            };
        }
        self.port == 22 && pattern == self.host
    }

    fn verify(&self, server_key: &PublicKey) -> HostKeyStatus {
        let mut status = HostKeyStatus::Unknown;
        for (pattern, key) in self.known.iter() {
            if !self.matches_host(pattern) {
                continue;
            }
            if key.fingerprint() == server_key.fingerprint() {
                return HostKeyStatus::Verified;
            }
            status = HostKeyStatus::Mismatch;
        }
        status
    }
}

#[async_trait]
impl Handler for ClientHandler {
    type Error = HandlerError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        match self.verify(server_public_key) {
            HostKeyStatus::Verified => {
                debug!(host = %self.host, "Host key verified against known_hosts");
                Ok(true)
            }
            HostKeyStatus::Unknown if self.accept_unknown => {
                warn!(host = %self.host, "Host not found in known_hosts, accepting");
                Ok(true)
            }
            HostKeyStatus::Unknown => {
                warn!(host = %self.host, "Host not found in known_hosts, rejecting");
                self.mismatch.store(true, Ordering::SeqCst);
                Ok(false)
            }
            HostKeyStatus::Mismatch => {
                warn!(
                    host = %self.host,
                    "HOST KEY VERIFICATION FAILED! Server key does not match known_hosts entry."
                );
                self.mismatch.store(true, Ordering::SeqCst);
                Ok(false)
            }
        }
    }
}

/// Parse known_hosts content into (pattern, key) pairs.
///
/// Hashed entries (`|1|...`) and markers (`@revoked`) are skipped.
fn parse_known_hosts(content: &str) -> Vec<(String, PublicKey)> {
    let mut entries = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('@') {
            continue;
        }
        let mut parts = line.split_whitespace();
        let (Some(hosts), Some(_key_type), Some(data)) = (parts.next(), parts.next(), parts.next())
        else {
            continue;
        };
        let Ok(bytes) = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, data)
        else {
            continue;
        };
        let Ok(key) = russh::keys::key::parse_public_key(&bytes, None) else {
            trace!(hosts = %hosts, "Unparseable known_hosts key, skipping entry");
            continue;
        };
        for pattern in hosts.split(',').filter(|p| !p.starts_with('|')) {
            entries.push((pattern.to_string(), key.clone()));
        }
    }
    entries
}

/// Signal name without the `SIG` prefix.
fn signal_label(signal: &Sig) -> String {
    let name = match signal {
        Sig::ABRT => "ABRT",
        Sig::ALRM => "ALRM",
        Sig::FPE => "FPE",
        Sig::HUP => "HUP",
        Sig::ILL => "ILL",
        Sig::INT => "INT",
        Sig::KILL => "KILL",
        Sig::PIPE => "PIPE",
        Sig::QUIT => "QUIT",
        Sig::SEGV => "SEGV",
        Sig::TERM => "TERM",
        Sig::USR1 => "USR1",
        Sig::Custom(name) => name.as_str(),
    };
    name.trim_start_matches("SIG").to_string()
}

/// Shell convention: `128 + n` for signal `n`, 255 when unknown.
fn signal_exit_code(label: &str) -> i32 {
    let number = match label {
        "HUP" => 1,
        "INT" => 2,
        "QUIT" => 3,
        "ILL" => 4,
        "ABRT" => 6,
        "FPE" => 8,
        "KILL" => 9,
        "USR1" => 10,
        "SEGV" => 11,
        "PIPE" => 13,
        "ALRM" => 14,
        "TERM" => 15,
        _ => return 255,
    };
    128 + number
}

/// Opens russh sessions.
#[derive(Debug, Clone)]
pub struct RusshSessionFactory {
    known_hosts: Option<PathBuf>,
    accept_unknown: bool,
}

impl Default for RusshSessionFactory {
    fn default() -> Self {
        Self {
            known_hosts: dirs::home_dir().map(|h| h.join(".ssh").join("known_hosts")),
            accept_unknown: true,
        }
    }
}

impl RusshSessionFactory {
    /// Create a factory.
    pub fn new(known_hosts: Option<PathBuf>, accept_unknown: bool) -> Self {
        let mut factory = Self::default();
        if known_hosts.is_some() {
            factory.known_hosts = known_hosts;
        }
        factory.accept_unknown = accept_unknown;
        factory
    }

    fn load_known_hosts(&self) -> Vec<(String, PublicKey)> {
        let Some(path) = self.known_hosts.as_ref() else {
            return Vec::new();
        };
        match std::fs::read_to_string(path) {
            Ok(content) => parse_known_hosts(&content),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Failed to read known_hosts file");
                Vec::new()
            }
        }
    }

    async fn authenticate(
        session: &mut Handle<ClientHandler>,
        target: &SessionTarget,
    ) -> ConnectionResult<()> {
        let user = target.user.as_str();
        let authenticated = match &target.credential {
            Credential::Key { path, passphrase } => {
                Self::key_auth(session, user, path, passphrase.as_ref().map(|p| p.expose())).await?
            }
            Credential::Password(password) => session
                .authenticate_password(user, password.expose())
                .await
                .map_err(|e| {
                    ConnectionError::AuthenticationFailed(format!(
                        "Password authentication failed: {}",
                        e
                    ))
                })?,
            Credential::Default => {
                let mut ok = false;
                if let Some(home) = dirs::home_dir() {
                    for name in DEFAULT_IDENTITY_FILES {
                        let path = home.join(".ssh").join(name);
                        if !path.exists() {
                            continue;
                        }
                        match Self::key_auth(session, user, &path, None).await {
                            Ok(true) => {
                                ok = true;
                                break;
                            }
                            Ok(false) => trace!(key = %path.display(), "Key rejected"),
                            Err(e) => trace!(key = %path.display(), error = %e, "Key unusable"),
                        }
                    }
                }
                ok
            }
        };

        if authenticated {
            debug!(user = %user, host = %target.host, "Authenticated");
            Ok(())
        } else {
            Err(ConnectionError::AuthenticationFailed(format!(
                "credentials for {}@{} were rejected",
                user, target.host
            )))
        }
    }

    async fn key_auth(
        session: &mut Handle<ClientHandler>,
        user: &str,
        key_path: &Path,
        passphrase: Option<&str>,
    ) -> ConnectionResult<bool> {
        let key_pair = load_secret_key(key_path, passphrase).map_err(|e| {
            ConnectionError::AuthenticationFailed(format!(
                "Failed to load key {}: {}",
                key_path.display(),
                e
            ))
        })?;

        session
            .authenticate_publickey(user, Arc::new(key_pair))
            .await
            .map_err(|e| {
                ConnectionError::AuthenticationFailed(format!(
                    "Key authentication failed for {}: {}",
                    key_path.display(),
                    e
                ))
            })
    }
}

#[async_trait]
impl SessionFactory for RusshSessionFactory {
    async fn connect(&self, target: &SessionTarget) -> ConnectionResult<Arc<dyn Session>> {
        let timeout = target.timeout;
        let addr = format!("{}:{}", target.host, target.port);
        debug!(host = %target.host, port = %target.port, user = %target.user, "Connecting via SSH (russh)");

        let mut config = russh::client::Config::default();
        config.inactivity_timeout = Some(timeout);
        let config = Arc::new(config);

        let socket = tokio::time::timeout(timeout, tokio::net::TcpStream::connect(&addr))
            .await
            .map_err(|_| ConnectionError::Timeout(timeout.as_secs()))?
            .map_err(|e| ConnectionError::Unreachable(format!("{}: {}", addr, e)))?;
        socket.set_nodelay(true).map_err(|e| {
            ConnectionError::Protocol(format!("Failed to set TCP_NODELAY: {}", e))
        })?;

        let mismatch = Arc::new(AtomicBool::new(false));
        let handler = ClientHandler {
            host: target.host.clone(),
            port: target.port,
            known: Arc::new(self.load_known_hosts()),
            accept_unknown: self.accept_unknown,
            mismatch: Arc::clone(&mismatch),
        };

        let handshake = tokio::time::timeout(
            timeout,
            russh::client::connect_stream(config, socket, handler),
        )
        .await
        .map_err(|_| ConnectionError::Timeout(timeout.as_secs()))?;

        let mut handle = match handshake {
            Ok(handle) => handle,
            Err(_) if mismatch.load(Ordering::SeqCst) => {
                return Err(ConnectionError::HostKeyMismatch(format!(
                    "server key for {} is not trusted",
                    addr
                )))
            }
            Err(e) => {
                return Err(ConnectionError::Protocol(format!(
                    "SSH handshake failed: {}",
                    e
                )))
            }
        };

        Self::authenticate(&mut handle, target).await?;

        Ok(Arc::new(RusshSession {
            identifier: format!("{}@{}:{}", target.user, target.host, target.port),
            handle: RwLock::new(Some(handle)),
            connected: AtomicBool::new(true),
        }))
    }
}

/// A russh-backed session.
pub struct RusshSession {
    identifier: String,
    handle: RwLock<Option<Handle<ClientHandler>>>,
    connected: AtomicBool,
}

impl std::fmt::Debug for RusshSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RusshSession")
            .field("identifier", &self.identifier)
            .field("connected", &self.connected.load(Ordering::Relaxed))
            .finish()
    }
}

#[async_trait]
impl Session for RusshSession {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn execute(&self, command: &str) -> Result<CommandResult, CommandError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(CommandError::Interrupted("session closed".to_string()));
        }

        let mut channel = {
            let guard = self.handle.read().await;
            let handle = guard
                .as_ref()
                .ok_or_else(|| CommandError::Interrupted("session closed".to_string()))?;
            handle.channel_open_session().await.map_err(|e| {
                self.connected.store(false, Ordering::SeqCst);
                CommandError::ChannelFailed(e.to_string())
            })?
        };

        channel.exec(true, command).await.map_err(|e| {
            self.connected.store(false, Ordering::SeqCst);
            CommandError::Interrupted(format!("Failed to execute command: {}", e))
        })?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code = None;
        let mut killed_by = None;

        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                // Extended data type 1 is stderr
                ChannelMsg::ExtendedData { ref data, ext } if ext == 1 => {
                    stderr.extend_from_slice(data)
                }
                ChannelMsg::ExitStatus { exit_status } => exit_code = Some(exit_status),
                ChannelMsg::ExitSignal { signal_name, .. } => killed_by = Some(signal_label(&signal_name)),
                ChannelMsg::Close => break,
                _ => {}
            }
        }

        let stdout = String::from_utf8_lossy(&stdout).into_owned();
        let mut stderr = String::from_utf8_lossy(&stderr).into_owned();
        match (exit_code, killed_by) {
            (Some(exit_code), _) => Ok(CommandResult::from_exit(
                i32::try_from(exit_code).unwrap_or(i32::MAX),
                stdout,
                stderr,
            )),
            // The command died; the session itself is still usable
            (None, Some(signal)) => {
                if !stderr.is_empty() && !stderr.ends_with('\n') {
                    stderr.push('\n');
                }
                stderr.push_str(&format!("killed by signal SIG{}", signal));
                Ok(CommandResult::failure(signal_exit_code(&signal), stdout, stderr))
            }
            (None, None) => {
                self.connected.store(false, Ordering::SeqCst);
                Err(CommandError::Interrupted(
                    "channel closed without an exit status".to_string(),
                ))
            }
        }
    }

    async fn close(&self) -> ConnectionResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        let handle = self.handle.write().await.take();
        if let Some(handle) = handle {
            handle
                .disconnect(russh::Disconnect::ByApplication, "", "en")
                .await
                .map_err(|e| ConnectionError::Protocol(format!("Disconnect failed: {}", e)))?;
        }
        Ok(())
    }
}
