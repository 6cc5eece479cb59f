//! Bidirectional byte pipe over TCP, Unix-domain socket, or TLS-wrapped TCP.
//!
//! TLS is initiated by sending an `SSLRequest` and reading a single-octet
//! response (`S` or `N`) before the stream is wrapped. Deadlines are
//! per-operation: a timed-out read surfaces as `WouldBlock`/`TimedOut` and
//! leaves the connection usable when the protocol position is known.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::opts::{Opts, SslMode};
use crate::protocol::frontend::write_ssl_request;

/// A connected byte pipe.
pub enum Transport {
    /// Plain TCP
    Tcp(TcpStream),
    /// Unix-domain socket
    #[cfg(unix)]
    Unix(UnixStream),
    /// TLS-wrapped TCP
    #[cfg(feature = "tls")]
    Tls(Box<native_tls::TlsStream<TcpStream>>),
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Tcp(_) => f.write_str("Transport::Tcp"),
            #[cfg(unix)]
            Transport::Unix(_) => f.write_str("Transport::Unix"),
            #[cfg(feature = "tls")]
            Transport::Tls(_) => f.write_str("Transport::Tls"),
        }
    }
}

impl Transport {
    /// Connect to the server described by `opts`, performing SSL negotiation
    /// according to `opts.ssl_mode`.
    ///
    /// `force_ssl` overrides the mode to `Require`; [`crate::Connection`]
    /// uses it on the `allow` retry path.
    pub fn connect(opts: &Opts, force_ssl: bool) -> Result<Self> {
        #[cfg(unix)]
        if let Some(path) = &opts.unix {
            let stream = UnixStream::connect(path)?;
            return Ok(Transport::Unix(stream));
        }
        #[cfg(not(unix))]
        if opts.unix.is_some() {
            return Err(Error::Unsupported(
                "unix-domain sockets are not available on this platform".into(),
            ));
        }

        let stream = Self::tcp_connect(opts)?;
        stream.set_nodelay(true)?;

        let mode = if force_ssl {
            SslMode::Require
        } else {
            opts.ssl_mode
        };

        let client_supports_tls = cfg!(feature = "tls");
        let send_ssl_request = match mode {
            SslMode::Disable | SslMode::Allow => false,
            SslMode::Prefer => client_supports_tls,
            SslMode::Require if !client_supports_tls => {
                return Err(Error::Unsupported(
                    "SSL required but the tls feature is not enabled".into(),
                ));
            }
            SslMode::Require => true,
        };

        if !send_ssl_request {
            return Ok(Transport::Tcp(stream));
        }

        Self::negotiate_tls(stream, opts, mode == SslMode::Require)
    }

    fn tcp_connect(opts: &Opts) -> Result<TcpStream> {
        let addrs: Vec<_> = (opts.host.as_str(), opts.port)
            .to_socket_addrs()
            .map_err(Error::Io)?
            .collect();
        if addrs.is_empty() {
            return Err(Error::InvalidUsage(format!(
                "host resolves to no addresses: {}",
                opts.host
            )));
        }

        let mut last_err = None;
        for addr in addrs {
            let attempt = match opts.connect_timeout {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => return Ok(stream),
                Err(e) => last_err = Some(e),
            }
        }
        Err(Error::Io(last_err.unwrap_or_else(|| {
            std::io::Error::from(std::io::ErrorKind::ConnectionRefused)
        })))
    }

    #[cfg(feature = "tls")]
    fn negotiate_tls(mut stream: TcpStream, opts: &Opts, required: bool) -> Result<Self> {
        let mut request = Vec::with_capacity(8);
        write_ssl_request(&mut request);
        stream.write_all(&request)?;
        stream.flush()?;

        let mut response = [0u8; 1];
        stream.read_exact(&mut response)?;

        match response[0] {
            b'S' => {
                let connector = Self::tls_connector(opts)?;
                let tls = connector
                    .connect(&opts.host, stream)
                    .map_err(|e| Error::Auth(format!("TLS handshake failed: {}", e)))?;
                Ok(Transport::Tls(Box::new(tls)))
            }
            b'N' => {
                if required {
                    return Err(Error::Auth("SSL required but refused by server".into()));
                }
                Ok(Transport::Tcp(stream))
            }
            other => Err(Error::Protocol(format!(
                "unexpected SSL response: {:#x}",
                other
            ))),
        }
    }

    #[cfg(not(feature = "tls"))]
    fn negotiate_tls(_stream: TcpStream, _opts: &Opts, _required: bool) -> Result<Self> {
        // Unreachable: connect() never requests SSL without the feature.
        let _ = write_ssl_request;
        Err(Error::Unsupported("tls feature not enabled".into()))
    }

    #[cfg(feature = "tls")]
    fn tls_connector(opts: &Opts) -> Result<native_tls::TlsConnector> {
        let mut builder = native_tls::TlsConnector::builder();

        match &opts.ssl_root_crt_file {
            Some(path) => {
                let pem = std::fs::read(path)?;
                let cert = native_tls::Certificate::from_pem(&pem)?;
                builder.add_root_certificate(cert);
            }
            None => {
                // Without a root cert the connection is encrypted but the
                // peer is not verified, matching libpq's non-verify modes.
                builder.danger_accept_invalid_certs(true);
                builder.danger_accept_invalid_hostnames(true);
            }
        }

        if let (Some(crt), Some(key)) = (&opts.ssl_crt_file, &opts.ssl_key_file) {
            let crt_pem = std::fs::read(crt)?;
            let key_pem = std::fs::read(key)?;
            let identity = native_tls::Identity::from_pkcs8(&crt_pem, &key_pem)?;
            builder.identity(identity);
        }

        Ok(builder.build()?)
    }

    /// Set the read deadline for subsequent `recv` calls. `None` blocks.
    pub fn set_read_deadline(&mut self, timeout: Option<Duration>) -> Result<()> {
        match self {
            Transport::Tcp(s) => s.set_read_timeout(timeout)?,
            #[cfg(unix)]
            Transport::Unix(s) => s.set_read_timeout(timeout)?,
            #[cfg(feature = "tls")]
            Transport::Tls(s) => s.get_ref().set_read_timeout(timeout)?,
        }
        Ok(())
    }

    /// Receive up to `buf.len()` bytes. Returns 0 at end-of-stream.
    pub fn recv(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Transport::Tcp(s) => s.read(buf),
            #[cfg(unix)]
            Transport::Unix(s) => s.read(buf),
            #[cfg(feature = "tls")]
            Transport::Tls(s) => s.read(buf),
        }
    }

    /// Send all bytes.
    pub fn send(&mut self, buf: &[u8]) -> Result<()> {
        match self {
            Transport::Tcp(s) => {
                s.write_all(buf)?;
                s.flush()?;
            }
            #[cfg(unix)]
            Transport::Unix(s) => {
                s.write_all(buf)?;
                s.flush()?;
            }
            #[cfg(feature = "tls")]
            Transport::Tls(s) => {
                s.write_all(buf)?;
                s.flush()?;
            }
        }
        Ok(())
    }

    /// Shut down the pipe. Best-effort.
    pub fn close(&mut self) {
        match self {
            Transport::Tcp(s) => {
                let _ = s.shutdown(std::net::Shutdown::Both);
            }
            #[cfg(unix)]
            Transport::Unix(s) => {
                let _ = s.shutdown(std::net::Shutdown::Both);
            }
            #[cfg(feature = "tls")]
            Transport::Tls(s) => {
                let _ = s.shutdown();
            }
        }
    }
}
