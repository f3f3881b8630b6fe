use crate::error::{LisoError, Result};
use crate::prelude::*;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ServerConfig, ServerConnection};
use std::io::BufReader;
use std::sync::Arc;

/// Outcome of one handshake attempt on a freshly readable socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handshake {
    Done,
    WouldBlock,
    Failed,
}

/// Shared server-side TLS configuration, built once at startup from the
/// PEM private key and certificate chain.
pub struct TlsContext {
    config: Arc<ServerConfig>,
}

impl TlsContext {
    pub fn from_pem(key_path: &Path, cert_path: &Path) -> Result<Self> {
        let mut rd = BufReader::new(File::open(cert_path)?);
        let certs = rustls_pemfile::certs(&mut rd)
            .collect::<io::Result<Vec<CertificateDer<'static>>>>()?;
        if certs.is_empty() {
            return Err(LisoError::TlsSetup(format!(
                "no certificate found in {}",
                cert_path.display()
            )));
        }

        let mut rd = BufReader::new(File::open(key_path)?);
        let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut rd)?.ok_or_else(|| {
            LisoError::TlsSetup(format!("no private key found in {}", key_path.display()))
        })?;

        let config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)?;
        Ok(TlsContext {
            config: Arc::new(config),
        })
    }

    pub fn new_session(&self) -> Result<TlsSession> {
        let conn = ServerConnection::new(Arc::clone(&self.config))?;
        Ok(TlsSession {
            conn,
            accepted: false,
        })
    }
}

/// Per-connection TLS session. Until `accepted` the handshake is retried on
/// every readiness; afterwards all connection I/O flows through `recv` and
/// `send`, and the rest of the state machine stays byte-stream agnostic.
pub struct TlsSession {
    conn: ServerConnection,
    pub accepted: bool,
}

impl TlsSession {
    /// Drive the handshake one round. WouldBlock leaves the session intact
    /// for the next readiness; any other error is fatal to the connection.
    pub fn accept(&mut self, sock: &mut TcpStream) -> Handshake {
        while self.conn.is_handshaking() {
            match self.conn.complete_io(sock) {
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Handshake::WouldBlock,
                Err(e) => {
                    error!("[tls] handshake failed: {e}");
                    return Handshake::Failed;
                }
            }
        }
        self.accepted = true;
        Handshake::Done
    }

    /// The handshake (or a pending close alert) still has bytes to push.
    pub fn wants_write(&self) -> bool {
        self.conn.wants_write()
    }

    /// Push buffered TLS records out; returns true once nothing is pending.
    pub fn flush(&mut self, sock: &mut TcpStream) -> io::Result<bool> {
        while self.conn.wants_write() {
            match self.conn.write_tls(sock) {
                Ok(0) => return Ok(false),
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(false),
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }

    /// Plaintext read. `Ok(0)` means the peer closed; WouldBlock means no
    /// plaintext is available yet.
    pub fn recv(&mut self, sock: &mut TcpStream, out: &mut [u8]) -> io::Result<usize> {
        let mut eof = false;
        match self.conn.read_tls(sock) {
            Ok(0) => eof = true,
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::WouldBlock => {}
            Err(e) => return Err(e),
        }

        self.conn
            .process_new_packets()
            .map_err(|e| io::Error::new(ErrorKind::InvalidData, e))?;

        // handshake tails and alerts produced by packet processing
        let _ = self.flush(sock)?;

        match self.conn.reader().read(out) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                if eof {
                    Ok(0)
                } else {
                    Err(e)
                }
            }
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// Plaintext write; the returned count is plaintext accepted by the
    /// session, with as much as possible flushed to the socket right away.
    pub fn send(&mut self, sock: &mut TcpStream, data: &[u8]) -> io::Result<usize> {
        let n = self.conn.writer().write(data)?;
        let _ = self.flush(sock)?;
        Ok(n)
    }
}
