use super::conn::Stream;
use super::listener::ListenerError;
use super::{Codec, Connection, Inner};
use std::fmt::Display;
use std::sync::{Arc, Weak};
use tokio::io::{self, AsyncReadExt, ReadHalf};
use tokio::sync::oneshot;

/// How many bytes the receive loop reads at once.
pub const READ_BUFFER_SIZE: usize = 4096;

/// Accumulates stream bytes and yields complete `\r\n`-terminated lines.
///
/// Bytes after the last terminator stay buffered until a later read
/// completes the line. The buffer is not capped.
#[derive(Default)]
pub(crate) struct LineBuffer {
  buf: Vec<u8>,
  /// Bytes at the start of `buf` known to hold no terminator.
  scanned: usize,
}

impl LineBuffer {
  pub(crate) fn extend(&mut self, data: &[u8]) {
    self.buf.extend_from_slice(data);
  }

  /// Take the next complete line, without its terminator.
  pub(crate) fn next_line(&mut self) -> Option<Vec<u8>> {
    // the last scanned byte may be the `\r` of a split terminator
    let from = self.scanned.saturating_sub(1);
    let Some(pos) = self.buf[from..].windows(2).position(|w| w == b"\r\n") else {
      self.scanned = self.buf.len();
      return None;
    };
    let end = from + pos;
    let line = self.buf[..end].to_vec();
    self.buf.drain(..end + 2);
    self.scanned = 0;
    Some(line)
  }

  #[cfg(test)]
  fn pending(&self) -> &[u8] {
    &self.buf
  }
}

/// The receive loop. Runs until the peer closes the stream, a read fails,
/// or `shutdown` fires (or is dropped along with the connection).
pub(super) async fn run<C: Codec>(
  inner: Weak<Inner<C>>,
  generation: u64,
  mut reader: ReadHalf<Stream>,
  mut shutdown: oneshot::Receiver<()>,
) {
  let mut buf = vec![0u8; READ_BUFFER_SIZE];
  let mut lines = LineBuffer::default();

  let reason = 'recv: loop {
    let n = tokio::select! {
      biased;
      _ = &mut shutdown => break 'recv CloseReason::Requested,
      read = reader.read(&mut buf) => match read {
        Ok(0) => break 'recv CloseReason::Remote,
        Ok(n) => n,
        Err(e) => break 'recv CloseReason::Read(e),
      },
    };
    lines.extend(&buf[..n]);

    let Some(inner) = inner.upgrade() else {
      return;
    };
    let conn = Connection { inner };
    while let Some(line) = lines.next_line() {
      if !conn.inner.is_current(generation) {
        break 'recv CloseReason::Requested;
      }
      if line.is_empty() {
        continue;
      }
      trace!(line = %String::from_utf8_lossy(&line), "recv");
      match C::decode(&line) {
        Ok(message) => conn.inner.listeners.dispatch(&conn, Arc::new(message)).await,
        Err(error) => conn.emit(&Diagnostic::DecodeFailed {
          line: &line,
          error: &error,
        }),
      }
    }
  };

  drop(reader);
  let Some(inner) = inner.upgrade() else {
    return;
  };
  let conn = Connection { inner };
  if conn.close_from_loop(generation).await {
    conn.emit(&Diagnostic::Closed(&reason));
  } else {
    debug!("{reason}, superseded by a newer connection");
  }
}

impl<C: Codec> Connection<C> {
  /// Tear down the transport, unless a newer connection replaced it already.
  ///
  /// Returns `false` if it was replaced.
  async fn close_from_loop(&self, generation: u64) -> bool {
    let mut writer = self.inner.writer.lock().await;
    if self.inner.generation.load(std::sync::atomic::Ordering::SeqCst) != generation {
      return false;
    }
    if let Some(mut stream) = writer.take() {
      use tokio::io::AsyncWriteExt;
      let _ = stream.shutdown().await;
    }
    self
      .inner
      .alive
      .store(false, std::sync::atomic::Ordering::SeqCst);
    true
  }
}

/// Why the receive loop stopped.
#[derive(Debug)]
pub enum CloseReason {
  /// The peer closed the stream.
  Remote,

  /// [`Connection::disconnect`] was called, or the connection was dropped.
  Requested,

  /// Reading from the stream failed.
  Read(io::Error),
}

impl Display for CloseReason {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      CloseReason::Remote => write!(f, "connection closed by peer"),
      CloseReason::Requested => write!(f, "connection closed"),
      CloseReason::Read(e) => write!(f, "failed to read from stream: {e}"),
    }
  }
}

/// Something the receive loop observed but could not return to anyone.
///
/// See [`Connection::on_diagnostic`].
#[derive(Debug)]
pub enum Diagnostic<'a> {
  /// The receive loop stopped.
  Closed(&'a CloseReason),

  /// A line could not be decoded and was dropped.
  DecodeFailed {
    line: &'a [u8],
    error: &'a (dyn std::error::Error + Send + Sync),
  },

  /// A listener returned an error or panicked.
  ListenerFailed(&'a ListenerError),
}

impl<'a> Diagnostic<'a> {
  pub(crate) fn log(&self) {
    match self {
      Diagnostic::Closed(reason @ CloseReason::Read(_)) => warn!("{reason}"),
      Diagnostic::Closed(reason) => debug!("{reason}"),
      Diagnostic::DecodeFailed { line, error } => {
        warn!(line = %String::from_utf8_lossy(line), "{error}")
      }
      Diagnostic::ListenerFailed(error) => warn!("listener failed: {error}"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn split_across_reads() {
    let mut lines = LineBuffer::default();
    lines.extend(b"PING :abc");
    assert_eq!(lines.next_line(), None);
    lines.extend(b"de\r\n");
    assert_eq!(lines.next_line().as_deref(), Some(&b"PING :abcde"[..]));
    assert_eq!(lines.next_line(), None);
    assert!(lines.pending().is_empty());
  }

  #[test]
  fn terminator_split_across_reads() {
    let mut lines = LineBuffer::default();
    lines.extend(b"A\r");
    assert_eq!(lines.next_line(), None);
    lines.extend(b"\nB\r\n");
    assert_eq!(lines.next_line().as_deref(), Some(&b"A"[..]));
    assert_eq!(lines.next_line().as_deref(), Some(&b"B"[..]));
  }

  #[test]
  fn many_lines_in_one_read() {
    let mut lines = LineBuffer::default();
    lines.extend(b"A\r\n\r\nB\r\nC");
    assert_eq!(lines.next_line().as_deref(), Some(&b"A"[..]));
    assert_eq!(lines.next_line().as_deref(), Some(&b""[..]));
    assert_eq!(lines.next_line().as_deref(), Some(&b"B"[..]));
    assert_eq!(lines.next_line(), None);
    assert_eq!(lines.pending(), b"C");
  }

  #[test]
  fn long_line_in_many_reads() {
    let mut lines = LineBuffer::default();
    for _ in 0..100 {
      lines.extend(&[b'a'; 1000]);
      assert_eq!(lines.next_line(), None);
    }
    assert_eq!(lines.scanned, 100_000);
    lines.extend(b"\r");
    assert_eq!(lines.next_line(), None);
    lines.extend(b"\nB\r\n");
    assert_eq!(lines.next_line().map(|l| l.len()), Some(100_000));
    assert_eq!(lines.next_line().as_deref(), Some(&b"B"[..]));
    assert_eq!(lines.scanned, 0);
  }

  #[test]
  fn bare_newline_is_not_a_terminator() {
    let mut lines = LineBuffer::default();
    lines.extend(b"A\nB\r\n");
    assert_eq!(lines.next_line().as_deref(), Some(&b"A\nB"[..]));
  }
}
