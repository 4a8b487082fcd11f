//! SSH tunnel transport, used as a pre-connect step for every driver when
//! `chat.connection.ssh.enabled` (§4.A).
//!
//! Host-key verification is "insecure accept" — an explicit, documented
//! weakening for cases where the SSH host is not known in advance (§4.A,
//! §9). A production rewrite should default to a `known_hosts` mode and
//! relegate accept-any to opt-in (§9 design note).

use std::io::{Read, Write};
use std::net::TcpListener as StdTcpListener;
use std::sync::{Arc, Mutex};

use ssh2::Session;
use tokio::net::TcpListener;
use tracing::{debug, warn};

use crate::error::{NeoBaseError, Result};
use crate::model::connection::{SshAuthMethod, SshConfig};

/// A live SSH tunnel. Dropping it stops accepting new local connections;
/// in-flight forwarded streams finish independently. The Connection Manager
/// closes tunnels when the last executor using them disconnects (§4.A).
pub struct SshTunnel {
    local_port: u16,
    _listener_task: tokio::task::JoinHandle<()>,
    session: Arc<Mutex<Session>>,
}

impl SshTunnel {
    /// Opens the tunnel to `ssh.host:ssh.port` and starts forwarding local
    /// connections to `target_host:target_port` through it.
    pub async fn open(cfg: &SshConfig, target_host: &str, target_port: u16) -> Result<Self> {
        let cfg = cfg.clone();
        let target_host = target_host.to_string();

        let session = tokio::task::spawn_blocking(move || -> Result<Session> {
            let tcp = std::net::TcpStream::connect((cfg.host.as_str(), cfg.port))
                .map_err(|e| NeoBaseError::driver_connect(format!("ssh dial failed: {e}")))?;

            let mut session = Session::new()
                .map_err(|e| NeoBaseError::driver_connect(format!("ssh session init failed: {e}")))?;
            session.set_tcp_stream(tcp);
            session
                .handshake()
                .map_err(|e| NeoBaseError::driver_connect(format!("ssh handshake failed: {e}")))?;

            // Host-key verification is intentionally "insecure accept" (§4.A).
            // We do not call `session.host_key()` / compare against a
            // known_hosts file here; see module docs.
            warn!(
                host = %cfg.host,
                "SSH host key verification policy is insecure-accept; not validating host identity"
            );

            match cfg.auth_method {
                SshAuthMethod::Password => {
                    let password = cfg
                        .password
                        .as_deref()
                        .ok_or_else(|| NeoBaseError::validation("ssh password auth requires a password"))?;
                    session
                        .userauth_password(&cfg.username, password)
                        .map_err(|e| NeoBaseError::driver_connect(format!("ssh password auth failed: {e}")))?;
                }
                SshAuthMethod::PublicKey => {
                    let key = cfg
                        .private_key
                        .as_deref()
                        .ok_or_else(|| NeoBaseError::validation("ssh publickey auth requires a private key"))?;
                    session
                        .userauth_pubkey_memory(&cfg.username, None, key, cfg.passphrase.as_deref())
                        .map_err(|e| {
                            NeoBaseError::driver_connect(format!("ssh publickey auth failed: {e}"))
                        })?;
                }
            }

            if !session.authenticated() {
                return Err(NeoBaseError::driver_connect("ssh authentication did not complete"));
            }

            Ok(session)
        })
        .await
        .map_err(|e| NeoBaseError::driver_connect(format!("ssh task join error: {e}")))??;

        let session = Arc::new(Mutex::new(session));

        // Bind an ephemeral local port; tokio's async listener accepts
        // connections, but forwarding itself happens over the blocking
        // ssh2 API on a dedicated thread per connection.
        let std_listener = StdTcpListener::bind("127.0.0.1:0")
            .map_err(|e| NeoBaseError::driver_connect(format!("failed to bind local tunnel port: {e}")))?;
        std_listener
            .set_nonblocking(true)
            .map_err(|e| NeoBaseError::driver_connect(e.to_string()))?;
        let local_port = std_listener
            .local_addr()
            .map_err(|e| NeoBaseError::driver_connect(e.to_string()))?
            .port();
        let listener = TcpListener::from_std(std_listener)
            .map_err(|e| NeoBaseError::driver_connect(e.to_string()))?;

        let forward_session = session.clone();
        let listener_task = tokio::spawn(async move {
            loop {
                let (local_stream, _addr) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!("ssh tunnel accept failed: {e}");
                        continue;
                    }
                };
                let session = forward_session.clone();
                let target_host = target_host.clone();
                tokio::task::spawn_blocking(move || {
                    if let Err(e) = forward_one(&session, local_stream, &target_host, target_port) {
                        debug!("ssh tunnel stream ended: {e}");
                    }
                });
            }
        });

        Ok(Self {
            local_port,
            _listener_task: listener_task,
            session,
        })
    }

    /// The local loopback endpoint drivers should dial instead of the real
    /// remote host/port (§4.A: "dials the database through the tunnel's
    /// virtual local endpoint").
    pub fn local_addr(&self) -> (String, u16) {
        ("127.0.0.1".to_string(), self.local_port)
    }

    pub fn close(&self) {
        self._listener_task.abort();
    }
}

impl Drop for SshTunnel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Bridges one accepted local TCP connection to a `direct-tcpip` SSH
/// channel, blocking on both sides from a dedicated thread.
fn forward_one(
    session: &Arc<Mutex<Session>>,
    local_stream: tokio::net::TcpStream,
    target_host: &str,
    target_port: u16,
) -> Result<()> {
    let std_stream = local_stream
        .into_std()
        .map_err(|e| NeoBaseError::driver_connect(e.to_string()))?;
    std_stream
        .set_nonblocking(false)
        .map_err(|e| NeoBaseError::driver_connect(e.to_string()))?;

    let mut channel = {
        let session = session.lock().expect("ssh session mutex poisoned");
        session
            .channel_direct_tcpip(target_host, target_port, None)
            .map_err(|e| NeoBaseError::driver_connect(format!("ssh direct-tcpip failed: {e}")))?
    };

    let mut read_stream = std_stream
        .try_clone()
        .map_err(|e| NeoBaseError::driver_connect(e.to_string()))?;
    let mut write_stream = std_stream;

    let mut channel_reader = channel
        .stream(0)
        .try_clone()
        .map_err(|e| NeoBaseError::driver_connect(e.to_string()))
        .unwrap_or_else(|_| channel.stream(0));

    let to_remote = std::thread::spawn(move || {
        let mut buf = [0u8; 8192];
        loop {
            match read_stream.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if channel_reader.write_all(&buf[..n]).is_err() {
                        break;
                    }
                }
            }
        }
    });

    let mut buf = [0u8; 8192];
    loop {
        match channel.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if write_stream.write_all(&buf[..n]).is_err() {
                    break;
                }
            }
        }
    }

    let _ = to_remote.join();
    Ok(())
}
