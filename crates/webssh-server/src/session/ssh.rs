//! SSH transport built on libssh2 (`ssh2` crate).

use super::params::{AuthSecret, ConnectParams};
use super::transport::{Connector, ReadOutcome, ShellTransport};
use ssh2::{Channel, ErrorCode, Session};
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};
use tracing::{debug, info};
use webssh_core::{TermSize, WebSshError, WebSshResult};

/// libssh2's LIBSSH2_ERROR_EAGAIN.
const LIBSSH2_ERROR_EAGAIN: i32 = -37;

/// How long a non-blocking write or resize may keep retrying.
const RETRY_BUDGET: Duration = Duration::from_secs(5);

/// Opens interactive shells over SSH.
#[derive(Debug, Default, Clone, Copy)]
pub struct SshConnector;

impl SshConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for SshConnector {
    fn connect(
        &self,
        params: &ConnectParams,
        term: &str,
        timeout: Duration,
    ) -> WebSshResult<Box<dyn ShellTransport>> {
        let tcp = connect_tcp(&params.host, params.port, timeout)?;

        let mut session = Session::new().map_err(|e| connect_failed("create session", e))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(timeout.as_millis().min(u32::MAX as u128) as u32);
        session
            .handshake()
            .map_err(|e| connect_failed("handshake", e))?;
        debug!(host = %params.host, port = params.port, "SSH handshake complete");

        match &params.auth {
            AuthSecret::Password(password) => session
                .userauth_password(&params.username, password)
                .map_err(|e| connect_failed("password authentication", e))?,
            AuthSecret::PrivateKey { pem, passphrase } => session
                .userauth_pubkey_memory(&params.username, None, pem, passphrase.as_deref())
                .map_err(|e| connect_failed("public key authentication", e))?,
        }
        if !session.authenticated() {
            return Err(WebSshError::ConnectFailed("authentication rejected".into()));
        }

        let mut channel = session
            .channel_session()
            .map_err(|e| connect_failed("open channel", e))?;
        channel
            .request_pty(
                term,
                None,
                Some((params.size.cols as u32, params.size.rows as u32, 0, 0)),
            )
            .map_err(|e| connect_failed("request PTY", e))?;
        channel.shell().map_err(|e| connect_failed("start shell", e))?;

        session.set_blocking(false);
        info!(target_host = %params.target(), size = %params.size, "SSH shell opened");

        Ok(Box::new(SshTransport { session, channel }))
    }
}

/// An interactive shell channel in non-blocking mode.
pub struct SshTransport {
    session: Session,
    channel: Channel,
}

impl ShellTransport for SshTransport {
    fn try_read(&mut self, buf: &mut [u8]) -> WebSshResult<ReadOutcome> {
        match self.channel.read(buf) {
            Ok(0) => Ok(self.idle_or_closed()),
            Ok(n) => Ok(ReadOutcome::Data(n)),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(self.idle_or_closed()),
            Err(e) => Err(WebSshError::Transport(format!("read failed: {e}"))),
        }
    }

    fn write_all(&mut self, data: &[u8]) -> WebSshResult<()> {
        let deadline = Instant::now() + RETRY_BUDGET;
        let mut written = 0;
        while written < data.len() {
            match self.channel.write(&data[written..]) {
                Ok(0) => return Err(WebSshError::Transport("channel closed during write".into())),
                Ok(n) => written += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => backoff(deadline)?,
                Err(e) => return Err(WebSshError::Transport(format!("write failed: {e}"))),
            }
        }
        loop {
            match self.channel.flush() {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == ErrorKind::WouldBlock => backoff(deadline)?,
                Err(e) => return Err(WebSshError::Transport(format!("flush failed: {e}"))),
            }
        }
    }

    fn resize(&mut self, size: TermSize) -> WebSshResult<()> {
        let deadline = Instant::now() + RETRY_BUDGET;
        loop {
            match self
                .channel
                .request_pty_size(size.cols as u32, size.rows as u32, None, None)
            {
                Ok(()) => return Ok(()),
                Err(e) if is_eagain(&e) => backoff(deadline)?,
                Err(e) => return Err(WebSshError::Transport(format!("resize failed: {e}"))),
            }
        }
    }

    fn close(&mut self) -> WebSshResult<()> {
        // Teardown runs on a blocking worker; the session timeout bounds it.
        self.session.set_blocking(true);
        let channel = self
            .channel
            .close()
            .map_err(|e| WebSshError::Transport(format!("channel close failed: {e}")));
        let session = self
            .session
            .disconnect(None, "session closed", None)
            .map_err(|e| WebSshError::Transport(format!("disconnect failed: {e}")));
        channel.and(session)
    }
}

impl SshTransport {
    fn idle_or_closed(&self) -> ReadOutcome {
        if self.channel.eof() {
            ReadOutcome::Closed
        } else {
            ReadOutcome::Idle
        }
    }
}

fn connect_tcp(host: &str, port: u16, timeout: Duration) -> WebSshResult<TcpStream> {
    let addrs = (host, port)
        .to_socket_addrs()
        .map_err(|e| WebSshError::ConnectFailed(format!("cannot resolve {host}:{port}: {e}")))?;

    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!(addr = %addr, error = %e, "TCP connect attempt failed");
                last_err = Some(e);
            }
        }
    }
    Err(WebSshError::ConnectFailed(match last_err {
        Some(e) => format!("TCP connect to {host}:{port} failed: {e}"),
        None => format!("no addresses for {host}:{port}"),
    }))
}

fn connect_failed(step: &str, e: ssh2::Error) -> WebSshError {
    WebSshError::ConnectFailed(format!("{step} failed: {e}"))
}

fn is_eagain(e: &ssh2::Error) -> bool {
    e.code() == ErrorCode::Session(LIBSSH2_ERROR_EAGAIN)
}

fn backoff(deadline: Instant) -> WebSshResult<()> {
    if Instant::now() >= deadline {
        return Err(WebSshError::Timeout);
    }
    std::thread::sleep(Duration::from_millis(1));
    Ok(())
}
