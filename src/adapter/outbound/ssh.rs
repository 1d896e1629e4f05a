//! Node configurator over SSH, using libssh2.
//!
//! libssh2 sessions block, so every call opens its own session on the
//! blocking pool. The connect timeout bounds the TCP connect, the handshake
//! and authentication; commands themselves run without a timeout because the
//! provisioning driver already bounds the whole node.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use ssh2::Session;
use tracing::debug;

use crate::error::BootstrapError;
use crate::infrastructure::config::provider::SshConfig;
use crate::port::NodeConfigurator;

/// Prints the core count, falling back to counting `/proc/cpuinfo` entries.
const CORE_COUNT_COMMAND: &str = "nproc 2>/dev/null || grep -c ^processor /proc/cpuinfo";

const SSH_PORT: u16 = 22;

/// Parse the output of [`CORE_COUNT_COMMAND`].
#[must_use]
pub fn parse_core_count(stdout: &str) -> Option<u32> {
    stdout
        .lines()
        .find_map(|line| line.trim().parse::<u32>().ok())
        .filter(|n| *n > 0)
}

/// Quote `value` as a single POSIX shell word.
#[must_use]
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Credentials and timeouts for opening a session.
#[derive(Debug, Clone)]
struct Login {
    user: String,
    key_path: Option<PathBuf>,
    connect_timeout: Duration,
    port: u16,
}

impl Login {
    fn connect(&self, address: &str) -> Result<Session, String> {
        let target = (address, self.port)
            .to_socket_addrs()
            .map_err(|e| format!("cannot resolve {address}: {e}"))?
            .next()
            .ok_or_else(|| format!("no address found for {address}"))?;
        let tcp = TcpStream::connect_timeout(&target, self.connect_timeout)
            .map_err(|e| format!("failed to connect to {target}: {e}"))?;

        let mut session = Session::new().map_err(|e| format!("failed to create SSH session: {e}"))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(u32::try_from(self.connect_timeout.as_millis()).unwrap_or(u32::MAX));
        session
            .handshake()
            .map_err(|e| format!("SSH handshake with {target} failed: {e}"))?;

        match &self.key_path {
            Some(key) => session.userauth_pubkey_file(&self.user, None, key, None),
            None => session.userauth_agent(&self.user),
        }
        .map_err(|e| format!("authentication as {} failed: {e}", self.user))?;
        if !session.authenticated() {
            return Err(format!("authentication as {} failed", self.user));
        }

        session.set_timeout(0);
        Ok(session)
    }
}

/// Output of one remote command.
struct Exec {
    status: i32,
    stdout: String,
    stderr: String,
}

fn exec(session: &Session, command: &str) -> Result<Exec, String> {
    let mut channel = session
        .channel_session()
        .map_err(|e| format!("failed to open channel: {e}"))?;
    channel
        .exec(command)
        .map_err(|e| format!("failed to start command: {e}"))?;

    let mut stdout = String::new();
    channel
        .read_to_string(&mut stdout)
        .map_err(|e| format!("failed to read output: {e}"))?;
    let mut stderr = String::new();
    channel
        .stderr()
        .read_to_string(&mut stderr)
        .map_err(|e| format!("failed to read errors: {e}"))?;

    channel
        .wait_close()
        .map_err(|e| format!("failed to close channel: {e}"))?;
    let status = channel
        .exit_status()
        .map_err(|e| format!("no exit status: {e}"))?;
    Ok(Exec {
        status,
        stdout,
        stderr,
    })
}

/// Upload `contents` over SFTP to a staging file in the login user's home,
/// then move it into place with `sudo` so root-owned targets work too.
fn upload(session: &Session, path: &str, contents: &str) -> Result<Exec, String> {
    let staging = format!(".rcluster-upload-{}", uuid::Uuid::new_v4().simple());
    let sftp = session
        .sftp()
        .map_err(|e| format!("failed to start SFTP: {e}"))?;
    let mut file = sftp
        .create(Path::new(&staging))
        .map_err(|e| format!("failed to create {staging}: {e}"))?;
    file.write_all(contents.as_bytes())
        .map_err(|e| format!("failed to write {staging}: {e}"))?;
    drop(file);

    exec(
        session,
        &format!(
            "sudo install -m 0644 {staged} {target}; status=$?; rm -f {staged}; exit $status",
            staged = shell_quote(&staging),
            target = shell_quote(path),
        ),
    )
}

fn connection_failure(step: &str, reason: String) -> BootstrapError {
    BootstrapError::ScriptFailure {
        step: step.to_string(),
        exit_code: -1,
        stderr: reason,
    }
}

fn check_status(step: String, output: Exec) -> Result<Exec, BootstrapError> {
    if output.status == 0 {
        return Ok(output);
    }
    Err(BootstrapError::ScriptFailure {
        step,
        exit_code: output.status,
        stderr: output.stderr.trim().to_string(),
    })
}

/// Runs commands on nodes as the image's login user.
pub struct SshConfigurator {
    login: Login,
}

impl SshConfigurator {
    #[must_use]
    pub fn new(config: &SshConfig) -> Self {
        Self {
            login: Login {
                user: config.user.clone(),
                key_path: config.key_path.clone(),
                connect_timeout: Duration::from_secs(config.connect_timeout_secs),
                port: SSH_PORT,
            },
        }
    }

    /// Connect to a port other than 22.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.login.port = port;
        self
    }

    /// Open a session to `address` on the blocking pool and run `op` on it.
    async fn with_session<T, F>(&self, address: &str, op: F) -> Result<T, String>
    where
        T: Send + 'static,
        F: FnOnce(&Session) -> Result<T, String> + Send + 'static,
    {
        let login = self.login.clone();
        let address = address.to_string();
        tokio::task::spawn_blocking(move || {
            let session = login.connect(&address)?;
            op(&session)
        })
        .await
        .map_err(|e| format!("SSH task failed: {e}"))?
    }
}

#[async_trait]
impl NodeConfigurator for SshConfigurator {
    async fn is_reachable(&self, address: &str) -> bool {
        match self.with_session(address, |_| Ok(())).await {
            Ok(()) => true,
            Err(reason) => {
                debug!(address, reason = %reason, "Node not reachable yet");
                false
            }
        }
    }

    async fn run(&self, address: &str, step: &str, command: &str) -> Result<(), BootstrapError> {
        debug!(address, step, "Running bootstrap step");
        let command = command.to_string();
        let output = self
            .with_session(address, move |session| exec(session, &command))
            .await
            .map_err(|reason| connection_failure(step, reason))?;
        check_status(step.to_string(), output).map(|_| ())
    }

    async fn core_count(&self, address: &str) -> Option<u32> {
        let output = self
            .with_session(address, |session| exec(session, CORE_COUNT_COMMAND))
            .await
            .ok()?;
        if output.status != 0 {
            return None;
        }
        parse_core_count(&output.stdout)
    }

    async fn write_file(
        &self,
        address: &str,
        path: &str,
        contents: &str,
    ) -> Result<(), BootstrapError> {
        let step = format!("write {path}");
        let (target, contents) = (path.to_string(), contents.to_string());
        let output = self
            .with_session(address, move |session| upload(session, &target, &contents))
            .await
            .map_err(|reason| connection_failure(&step, reason))?;
        check_status(step, output).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use super::*;

    fn configurator(port: u16) -> SshConfigurator {
        SshConfigurator::new(&SshConfig {
            user: "ubuntu".into(),
            key_path: Some(PathBuf::from("/keys/lab.pem")),
            connect_timeout_secs: 2,
        })
        .with_port(port)
    }

    /// A local port with nothing listening on it.
    fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn parses_nproc_and_cpuinfo_counts() {
        assert_eq!(parse_core_count("8\n"), Some(8));
        assert_eq!(parse_core_count("bash: nproc: not found\n4\n"), Some(4));
        assert_eq!(parse_core_count("0\n"), None);
        assert_eq!(parse_core_count(""), None);
    }

    #[test]
    fn quoting_survives_single_quotes() {
        assert_eq!(shell_quote("/home/cluster/hostfile"), "'/home/cluster/hostfile'");
        assert_eq!(shell_quote("/srv/o'brien/hostfile"), r"'/srv/o'\''brien/hostfile'");
    }

    #[test]
    fn new_uses_the_standard_port_and_configured_timeout() {
        let configurator = SshConfigurator::new(&SshConfig {
            user: "ubuntu".into(),
            key_path: None,
            connect_timeout_secs: 7,
        });
        assert_eq!(configurator.login.port, 22);
        assert_eq!(configurator.login.connect_timeout, Duration::from_secs(7));
    }

    #[tokio::test]
    async fn refused_connection_is_unreachable() {
        let configurator = configurator(closed_port());
        assert!(!configurator.is_reachable("127.0.0.1").await);
        assert_eq!(configurator.core_count("127.0.0.1").await, None);
    }

    #[tokio::test]
    async fn refused_connection_fails_the_step() {
        let configurator = configurator(closed_port());

        let err = configurator
            .run("127.0.0.1", "runtime", "true")
            .await
            .unwrap_err();

        match err {
            BootstrapError::ScriptFailure {
                step,
                exit_code,
                stderr,
            } => {
                assert_eq!(step, "runtime");
                assert_eq!(exit_code, -1);
                assert!(stderr.contains("failed to connect"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn non_ssh_peer_fails_the_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let _ = stream.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n");
            }
        });

        let err = configurator(port)
            .write_file("127.0.0.1", "/home/cluster/hostfile", "10.0.0.2\n")
            .await
            .unwrap_err();
        server.join().unwrap();

        assert!(matches!(
            err,
            BootstrapError::ScriptFailure { ref step, exit_code: -1, .. } if step == "write /home/cluster/hostfile"
        ));
    }
}
