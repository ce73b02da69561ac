use super::{Codec, Connection};
use std::fmt::Display;
use tokio::io::{self, AsyncWriteExt};

impl<C: Codec> Connection<C> {
  /// Send a single line, appending `\r\n` unless it already ends with one.
  ///
  /// Fails with [`SendError::NotConnected`] if the connection is not alive.
  pub async fn send(&self, line: &str) -> Result<(), SendError> {
    if line.ends_with("\r\n") {
      self.send_data(line.as_bytes()).await
    } else {
      self.send_data(format!("{line}\r\n").as_bytes()).await
    }
  }

  /// Write `data` to the transport as-is.
  ///
  /// Concurrent sends never interleave: each `data` is written in full
  /// before the next one starts.
  pub async fn send_data(&self, data: &[u8]) -> Result<(), SendError> {
    let mut writer = self.inner.writer.lock().await;
    let Some(stream) = writer.as_mut() else {
      return Err(SendError::NotConnected);
    };
    trace!(data = %String::from_utf8_lossy(data).trim_end(), "send");
    stream.write_all(data).await?;
    stream.flush().await?;
    Ok(())
  }

  /// Send several lines without letting any other send in between.
  ///
  /// Each line must not contain its `\r\n` terminator.
  pub(crate) async fn send_lines<I>(&self, lines: I) -> Result<(), SendError>
  where
    I: IntoIterator<Item = String>,
  {
    let mut writer = self.inner.writer.lock().await;
    let Some(stream) = writer.as_mut() else {
      return Err(SendError::NotConnected);
    };
    for line in lines {
      trace!(data = %line, "send");
      stream.write_all(line.as_bytes()).await?;
      stream.write_all(b"\r\n").await?;
    }
    stream.flush().await?;
    Ok(())
  }
}

/// Failed to send a message.
#[derive(Debug)]
pub enum SendError {
  /// The connection is not alive.
  NotConnected,

  /// The underlying I/O operation failed.
  Io(io::Error),
}

impl From<io::Error> for SendError {
  fn from(value: io::Error) -> Self {
    Self::Io(value)
  }
}

impl Display for SendError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      SendError::NotConnected => write!(f, "failed to send: not connected"),
      SendError::Io(e) => write!(f, "failed to send: {e}"),
    }
  }
}

impl std::error::Error for SendError {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    match self {
      SendError::Io(e) => Some(e),
      SendError::NotConnected => None,
    }
  }
}
