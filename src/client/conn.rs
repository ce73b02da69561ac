use std::fmt::Display;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// The conventional port for plaintext IRC.
pub const PORT: u16 = 6667;

/// The conventional port for IRC over TLS.
pub const TLS_PORT: u16 = 6697;

/// Whether to wrap the TCP stream in TLS.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Security {
  /// Plain TCP.
  Plain,

  /// TLS, verified against the platform's native root certificates.
  ///
  /// Requires the `tls` feature.
  #[default]
  Tls,
}

impl Security {
  /// The conventional port for this kind of connection.
  pub fn default_port(self) -> u16 {
    match self {
      Security::Plain => PORT,
      Security::Tls => TLS_PORT,
    }
  }
}

/// Any bidirectional byte stream usable as a transport.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

pub type Stream = Box<dyn AsyncStream>;

/// Open a TCP stream to `host:port`, and wrap it in TLS if requested.
pub async fn open(host: &str, port: u16, security: Security) -> Result<Stream, OpenStreamError> {
  match security {
    Security::Plain => {
      trace!(host, port, "opening tcp stream");
      Ok(Box::new(TcpStream::connect((host, port)).await?))
    }
    #[cfg(feature = "tls")]
    Security::Tls => {
      let config = tls::TlsConfig::load(host)?;
      trace!(?config, port, "opening tls stream");
      let tcp = TcpStream::connect((host, port)).await?;
      let stream = tokio_rustls::TlsConnector::from(config.client())
        .connect(config.server_name(), tcp)
        .await?;
      Ok(Box::new(stream))
    }
    #[cfg(not(feature = "tls"))]
    Security::Tls => Err(OpenStreamError::TlsUnavailable),
  }
}

/// Failed to open a stream.
#[derive(Debug)]
pub enum OpenStreamError {
  /// The underlying I/O operation failed.
  Io(io::Error),

  /// Failed to set up TLS.
  #[cfg(feature = "tls")]
  Tls(tls::TlsConfigError),

  /// TLS was requested, but the `tls` feature is disabled.
  #[cfg(not(feature = "tls"))]
  TlsUnavailable,
}

impl From<io::Error> for OpenStreamError {
  fn from(value: io::Error) -> Self {
    Self::Io(value)
  }
}

#[cfg(feature = "tls")]
impl From<tls::TlsConfigError> for OpenStreamError {
  fn from(value: tls::TlsConfigError) -> Self {
    Self::Tls(value)
  }
}

impl Display for OpenStreamError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      OpenStreamError::Io(e) => write!(f, "failed to open stream: {e}"),
      #[cfg(feature = "tls")]
      OpenStreamError::Tls(e) => write!(f, "failed to open tls stream: {e}"),
      #[cfg(not(feature = "tls"))]
      OpenStreamError::TlsUnavailable => {
        write!(f, "failed to open tls stream: the `tls` feature is disabled")
      }
    }
  }
}

impl std::error::Error for OpenStreamError {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    match self {
      OpenStreamError::Io(e) => Some(e),
      #[cfg(feature = "tls")]
      OpenStreamError::Tls(e) => Some(e),
      #[cfg(not(feature = "tls"))]
      OpenStreamError::TlsUnavailable => None,
    }
  }
}

#[cfg(feature = "tls")]
pub use tls::{TlsConfig, TlsConfigError};

#[cfg(feature = "tls")]
mod tls {
  use std::fmt::Display;
  use std::io;
  use std::sync::Arc;
  use tokio_rustls::rustls::client::InvalidDnsNameError;
  use tokio_rustls::rustls::{self, ClientConfig, RootCertStore, ServerName};

  #[derive(Debug, Clone)]
  pub struct TlsConfig {
    config: Arc<ClientConfig>,
    server_name: ServerName,
  }

  impl TlsConfig {
    /// Build a client config for `host` which trusts the native root certificates.
    pub fn load(host: &str) -> Result<Self, TlsConfigError> {
      let server_name = ServerName::try_from(host)?;

      trace!("loading native certificates");
      let mut root_store = RootCertStore::empty();
      let native_certs = rustls_native_certs::load_native_certs()?;
      for cert in native_certs {
        root_store.add(&rustls::Certificate(cert.0))?;
      }
      let config = rustls::ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(root_store)
        .with_no_client_auth();
      Ok(Self {
        config: Arc::new(config),
        server_name,
      })
    }

    pub fn client(&self) -> Arc<ClientConfig> {
      self.config.clone()
    }

    pub fn server_name(&self) -> ServerName {
      self.server_name.clone()
    }
  }

  /// Failed to load the TLS config.
  #[derive(Debug)]
  pub enum TlsConfigError {
    /// The underlying I/O operation failed.
    Io(io::Error),
    /// The host is not a valid DNS name.
    Dns(InvalidDnsNameError),
    /// Failed to load certificates.
    Tls(rustls::Error),
  }

  impl From<io::Error> for TlsConfigError {
    fn from(value: io::Error) -> Self {
      Self::Io(value)
    }
  }

  impl From<InvalidDnsNameError> for TlsConfigError {
    fn from(value: InvalidDnsNameError) -> Self {
      Self::Dns(value)
    }
  }

  impl From<rustls::Error> for TlsConfigError {
    fn from(value: rustls::Error) -> Self {
      Self::Tls(value)
    }
  }

  impl Display for TlsConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      match self {
        TlsConfigError::Io(e) => write!(f, "tls config error: {e}"),
        TlsConfigError::Dns(e) => write!(f, "tls config error: {e}"),
        TlsConfigError::Tls(e) => write!(f, "tls config error: {e}"),
      }
    }
  }

  impl std::error::Error for TlsConfigError {}
}
