//! ## IRC connection
//!
//! The entrypoint to this module is [`Connection`].
//!
//! A [`Connection`] owns one transport at a time. A successful
//! [`Connection::connect`] spawns a receive loop on the current `tokio`
//! runtime, which reads the stream in chunks, reassembles `\r\n`-terminated
//! lines, decodes each line with the connection's [`Codec`], and hands the
//! result to every registered [`Listener`].
//!
//! ⚠ Note: [`Connection`] is a fairly low-level interface! It does not:
//! - Register with the server (see [`Session`][crate::Session])
//! - Answer `PING`s
//! - Reconnect
//! - Rate limit
//!
//! What it _does_ provide is:
//! - Opening a TCP connection (optionally with TLS)
//! - Stream framing that survives lines split across reads
//! - Listener registration that is safe during dispatch
//! - Serialized sends, so lines are never interleaved

pub mod codec;
pub mod conn;
pub mod listener;
pub mod read;
mod util;
pub mod write;

pub use self::codec::{Codec, Irc, Raw};
pub use self::conn::Security;
pub use self::listener::{Listener, ListenerError, Panicked, Subscription};
pub use self::read::{CloseReason, Diagnostic};
pub use self::write::SendError;

use self::conn::{OpenStreamError, Stream};
use self::listener::Registry;
use self::util::Timeout;
use parking_lot::RwLock;
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, WriteHalf};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

/// The default timeout used when connecting.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

tokio::task_local! {
  /// Id of the connection whose receive loop is running on this task.
  static RECEIVE_LOOP: u64;
}

type DiagnosticHook = Arc<dyn Fn(&Diagnostic<'_>) + Send + Sync>;

/// A single live connection to an IRC server.
///
/// This is a cheap handle, clones refer to the same connection.
///
/// `C` decides what listeners receive: [`Raw`] hands out the line bytes,
/// [`Irc`] parses them into [`IrcMessage`][crate::IrcMessage]s.
pub struct Connection<C: Codec = Raw> {
  inner: Arc<Inner<C>>,
}

struct Inner<C: Codec> {
  id: u64,
  alive: AtomicBool,
  /// Bumped on every successful connect.
  generation: AtomicU64,
  /// Serializes `connect` and `disconnect`.
  lifecycle: Mutex<()>,
  /// The send side of the transport. Holding this lock is what keeps
  /// concurrent sends from interleaving.
  writer: Mutex<Option<WriteHalf<Stream>>>,
  task: parking_lot::Mutex<Option<ReceiveTask>>,
  listeners: Registry<C>,
  diagnostics: RwLock<Vec<DiagnosticHook>>,
}

struct ReceiveTask {
  shutdown: oneshot::Sender<()>,
  handle: JoinHandle<()>,
}

/// A closed connection whose receive loop may still be running.
pub(crate) struct Closed {
  handle: Option<JoinHandle<()>>,
}

impl<C: Codec> Connection<C> {
  /// Create a new idle connection.
  pub fn new() -> Self {
    static NEXT_ID: AtomicU64 = AtomicU64::new(0);
    Self {
      inner: Arc::new(Inner {
        id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
        alive: AtomicBool::new(false),
        generation: AtomicU64::new(0),
        lifecycle: Mutex::new(()),
        writer: Mutex::new(None),
        task: parking_lot::Mutex::new(None),
        listeners: Registry::new(),
        diagnostics: RwLock::new(Vec::new()),
      }),
    }
  }

  /// Returns `true` between a successful connect and the next
  /// disconnect, peer close, or read error.
  pub fn is_alive(&self) -> bool {
    self.inner.alive.load(Ordering::SeqCst)
  }

  /// Attempt to connect to `host:port`, waiting at most `timeout`.
  ///
  /// Returns `false` if the connection is already alive, or if the
  /// connection could not be established. Use [`Connection::try_connect`]
  /// to find out why.
  ///
  /// Must be called from within a `tokio` runtime.
  pub async fn connect(&self, host: &str, port: u16, timeout: Duration, security: Security) -> bool {
    match self.try_connect(host, port, timeout, security).await {
      Ok(()) => true,
      Err(e) => {
        warn!("{e}");
        false
      }
    }
  }

  /// Attempt to connect to `host:port`, waiting at most `timeout`.
  pub async fn try_connect(
    &self,
    host: &str,
    port: u16,
    timeout: Duration,
    security: Security,
  ) -> Result<(), ConnectError> {
    let _lifecycle = self.inner.lifecycle.lock().await;
    if self.is_alive() {
      return Err(ConnectError::AlreadyConnected);
    }

    trace!(host, port, ?security, "connecting");
    let stream = conn::open(host, port, security).timeout(timeout).await??;
    self.attach(stream).await;
    debug!(host, port, "connected");
    Ok(())
  }

  /// Use an already established stream as the transport.
  ///
  /// Returns `false` if the connection is already alive.
  pub async fn connect_stream<S>(&self, stream: S) -> bool
  where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
  {
    match self.try_connect_stream(stream).await {
      Ok(()) => true,
      Err(e) => {
        warn!("{e}");
        false
      }
    }
  }

  /// Use an already established stream as the transport.
  pub async fn try_connect_stream<S>(&self, stream: S) -> Result<(), ConnectError>
  where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
  {
    let _lifecycle = self.inner.lifecycle.lock().await;
    if self.is_alive() {
      return Err(ConnectError::AlreadyConnected);
    }

    self.attach(Box::new(stream)).await;
    debug!("connected to stream");
    Ok(())
  }

  /// Must be called with the lifecycle lock held and the connection idle.
  async fn attach(&self, stream: Stream) {
    let (reader, writer) = tokio::io::split(stream);
    let (shutdown, shutdown_rx) = oneshot::channel();

    let generation = {
      let mut slot = self.inner.writer.lock().await;
      *slot = Some(writer);
      let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
      self.inner.alive.store(true, Ordering::SeqCst);
      generation
    };

    let handle = tokio::spawn(RECEIVE_LOOP.scope(
      self.inner.id,
      read::run(Arc::downgrade(&self.inner), generation, reader, shutdown_rx),
    ));

    // A previous loop that ended on its own is either done or only
    // has cleanup left, which it skips once it sees the new generation.
    let previous = self
      .inner
      .task
      .lock()
      .replace(ReceiveTask { shutdown, handle });
    drop(previous);
  }

  /// Close the transport and stop the receive loop.
  ///
  /// Returns `false` if the connection was not alive.
  ///
  /// Waits for the receive loop to finish, unless called from one of this
  /// connection's own listeners, in which case the loop stops as soon as
  /// the current dispatch returns.
  pub async fn disconnect(&self) -> bool {
    match self.close().await {
      Some(closed) => {
        self.join(closed).await;
        true
      }
      None => false,
    }
  }

  /// The first half of [`Connection::disconnect`]: close the transport and
  /// signal the receive loop, without waiting for it.
  ///
  /// Returns `None` if the connection was not alive.
  pub(crate) async fn close(&self) -> Option<Closed> {
    let _lifecycle = self.inner.lifecycle.lock().await;
    let mut writer = self.inner.writer.lock().await;
    if !self.inner.alive.swap(false, Ordering::SeqCst) {
      return None;
    }
    if let Some(mut stream) = writer.take() {
      if let Err(e) = stream.shutdown().await {
        debug!("failed to shut down stream: {e}");
      }
    }
    let handle = self.inner.task.lock().take().map(|task| {
      let _ = task.shutdown.send(());
      task.handle
    });
    Some(Closed { handle })
  }

  /// Wait for the receive loop stopped by [`Connection::close`].
  ///
  /// Must not be called with any lock held that a listener may take.
  pub(crate) async fn join(&self, closed: Closed) {
    if let Some(handle) = closed.handle {
      if !self.on_receive_loop() {
        if let Err(e) = handle.await {
          warn!("receive loop failed: {e}");
        }
      }
    }
    debug!("disconnected");
  }

  fn on_receive_loop(&self) -> bool {
    RECEIVE_LOOP
      .try_with(|id| *id == self.inner.id)
      .unwrap_or(false)
  }

  /// Register a listener.
  ///
  /// Returns `false` if this exact listener is already registered.
  ///
  /// A listener registered during a dispatch may or may not see the
  /// message being dispatched, but sees every message after it.
  pub fn add_listener(&self, listener: &Listener<C>) -> bool {
    self.inner.listeners.add(listener)
  }

  /// Unregister a listener.
  ///
  /// Returns `false` if the listener was not registered. Once this returns,
  /// the listener is not invoked again, even by a dispatch already in flight.
  pub fn remove_listener(&self, listener: &Listener<C>) -> bool {
    self.inner.listeners.remove(listener)
  }

  /// Receive every message as a [`Stream`][futures_util::Stream].
  pub fn subscribe(&self) -> Subscription<C> {
    Subscription::new(self, None)
  }

  /// Receive the messages accepted by `filter` as a [`Stream`][futures_util::Stream].
  pub fn subscribe_filtered<P>(&self, filter: P) -> Subscription<C>
  where
    P: Fn(&Connection<C>, &C::Message) -> bool + Send + Sync + 'static,
  {
    Subscription::new(self, Some(Box::new(filter)))
  }

  /// Observe connection closes, undecodable lines and failing listeners.
  ///
  /// Hooks run on the receive loop and must not block.
  pub fn on_diagnostic<F>(&self, hook: F)
  where
    F: Fn(&Diagnostic<'_>) + Send + Sync + 'static,
  {
    self.inner.diagnostics.write().push(Arc::new(hook));
  }

  pub(crate) fn emit(&self, diagnostic: &Diagnostic<'_>) {
    diagnostic.log();
    let hooks = self.inner.diagnostics.read().clone();
    for hook in hooks {
      let hook = std::panic::AssertUnwindSafe(|| hook(diagnostic));
      if std::panic::catch_unwind(hook).is_err() {
        warn!("diagnostic hook panicked");
      }
    }
  }
}

impl<C: Codec> Inner<C> {
  fn is_current(&self, generation: u64) -> bool {
    self.alive.load(Ordering::SeqCst) && self.generation.load(Ordering::SeqCst) == generation
  }
}

impl<C: Codec> Default for Connection<C> {
  fn default() -> Self {
    Self::new()
  }
}

impl<C: Codec> Clone for Connection<C> {
  fn clone(&self) -> Self {
    Self {
      inner: self.inner.clone(),
    }
  }
}

impl<C: Codec> std::fmt::Debug for Connection<C> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Connection")
      .field("id", &self.inner.id)
      .field("alive", &self.is_alive())
      .finish_non_exhaustive()
  }
}

static_assert_send!(Connection<Raw>);
static_assert_sync!(Connection<Raw>);
static_assert_send!(Connection<Irc>);
static_assert_sync!(Connection<Irc>);

/// An error which occurred while attempting to connect.
#[derive(Debug)]
pub enum ConnectError {
  /// The connection is already alive.
  AlreadyConnected,

  /// Failed to open the stream.
  Open(OpenStreamError),

  /// Connection timed out.
  Timeout,
}

impl From<OpenStreamError> for ConnectError {
  fn from(value: OpenStreamError) -> Self {
    Self::Open(value)
  }
}

impl From<tokio::time::error::Elapsed> for ConnectError {
  fn from(_: tokio::time::error::Elapsed) -> Self {
    Self::Timeout
  }
}

impl Display for ConnectError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ConnectError::AlreadyConnected => write!(f, "failed to connect: already connected"),
      ConnectError::Open(e) => write!(f, "failed to connect: {e}"),
      ConnectError::Timeout => write!(f, "failed to connect: connection timed out"),
    }
  }
}

impl std::error::Error for ConnectError {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    match self {
      ConnectError::Open(e) => Some(e),
      _ => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use futures_util::StreamExt;
  use tokio::io::{duplex, AsyncBufReadExt, AsyncReadExt, DuplexStream};
  use tokio::sync::mpsc;

  async fn connected() -> (Connection<Raw>, DuplexStream) {
    let (client, server) = duplex(1024);
    let conn = Connection::<Raw>::new();
    assert!(conn.connect_stream(client).await);
    (conn, server)
  }

  fn closes(conn: &Connection<Raw>) -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    conn.on_diagnostic(move |d| {
      if let Diagnostic::Closed(reason) = d {
        let _ = tx.send(reason.to_string());
      }
    });
    rx
  }

  #[tokio::test]
  async fn reassembles_split_lines() {
    let (conn, mut server) = connected().await;
    let mut messages = conn.subscribe();

    server.write_all(b"PING :ab").await.unwrap();
    server.flush().await.unwrap();
    tokio::task::yield_now().await;
    server.write_all(b"c\r\n\r\nPRIVMSG #a :x\r\n").await.unwrap();

    assert_eq!(messages.next().await.unwrap().as_slice(), b"PING :abc");
    assert_eq!(messages.next().await.unwrap().as_slice(), b"PRIVMSG #a :x");
  }

  #[tokio::test]
  async fn connect_while_alive() {
    let (conn, _server) = connected().await;
    let (other, _) = duplex(16);
    assert!(!conn.connect_stream(other).await);
    assert!(matches!(
      conn.try_connect_stream(duplex(16).0).await,
      Err(ConnectError::AlreadyConnected)
    ));
    assert!(conn.is_alive());
  }

  #[tokio::test]
  async fn disconnect_is_idempotent() {
    let (conn, mut server) = connected().await;
    let mut closes = closes(&conn);

    assert!(conn.disconnect().await);
    assert!(!conn.is_alive());
    assert!(!conn.disconnect().await);
    assert_eq!(closes.recv().await.unwrap(), "connection closed");

    // the peer sees the write side shut down
    let mut buf = Vec::new();
    server.read_to_end(&mut buf).await.unwrap();
    assert!(buf.is_empty());
  }

  #[tokio::test]
  async fn peer_close() {
    let (conn, server) = connected().await;
    let mut closes = closes(&conn);

    drop(server);
    assert_eq!(closes.recv().await.unwrap(), "connection closed by peer");
    assert!(!conn.is_alive());
    assert!(!conn.disconnect().await);
    assert!(matches!(conn.send("PING :x").await, Err(SendError::NotConnected)));
  }

  #[tokio::test]
  async fn send_appends_terminator() {
    let (conn, mut server) = connected().await;
    conn.send("NICK a").await.unwrap();
    conn.send("USER a 0 * :a\r\n").await.unwrap();
    conn.send_lines(["JOIN #a".to_string(), "JOIN #b".to_string()]).await.unwrap();
    conn.disconnect().await;

    let mut buf = String::new();
    server.read_to_string(&mut buf).await.unwrap();
    assert_eq!(buf, "NICK a\r\nUSER a 0 * :a\r\nJOIN #a\r\nJOIN #b\r\n");
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn concurrent_sends_do_not_interleave() {
    const TASKS: u8 = 8;
    const SENDS: usize = 10;
    const LEN: usize = 3000;

    let (conn, server) = connected().await;
    let reader = tokio::spawn(async move {
      let mut server = tokio::io::BufReader::new(server);
      let mut lines = Vec::new();
      for _ in 0..TASKS as usize * SENDS {
        let mut line = String::new();
        server.read_line(&mut line).await.unwrap();
        lines.push(line);
      }
      lines
    });

    let senders = (0..TASKS)
      .map(|i| {
        let conn = conn.clone();
        tokio::spawn(async move {
          let text = char::from(b'a' + i).to_string().repeat(LEN);
          for _ in 0..SENDS {
            conn.send(&format!("PRIVMSG #a :{text}")).await.unwrap();
          }
        })
      })
      .collect::<Vec<_>>();
    for sender in senders {
      sender.await.unwrap();
    }

    let lines = reader.await.unwrap();
    assert_eq!(lines.len(), TASKS as usize * SENDS);
    for line in lines {
      let text = line
        .strip_prefix("PRIVMSG #a :")
        .and_then(|l| l.strip_suffix("\r\n"))
        .unwrap();
      assert_eq!(text.len(), LEN);
      assert!(text.bytes().all(|b| b == text.as_bytes()[0]));
    }
  }

  #[tokio::test]
  async fn send_when_idle() {
    let conn = Connection::<Raw>::new();
    assert!(matches!(conn.send("PING :x").await, Err(SendError::NotConnected)));
  }

  #[tokio::test]
  async fn disconnect_from_listener() {
    let (conn, mut server) = connected().await;
    let mut closes = closes(&conn);
    let (tx, mut rx) = mpsc::unbounded_channel();
    conn.add_listener(&Listener::new(move |conn: Connection<Raw>, _| {
      let tx = tx.clone();
      async move {
        let _ = tx.send(conn.disconnect().await);
        Ok(())
      }
    }));

    server.write_all(b"QUIT\r\nPING :late\r\n").await.unwrap();
    assert_eq!(rx.recv().await, Some(true));
    assert_eq!(closes.recv().await.unwrap(), "connection closed");
    assert!(!conn.is_alive());
    // the line after the one that caused the disconnect is not dispatched
    assert!(rx.try_recv().is_err());
  }

  #[tokio::test]
  async fn reconnect() {
    let (conn, _old) = connected().await;
    let mut messages = conn.subscribe();
    assert!(conn.disconnect().await);

    let (client, mut server) = duplex(1024);
    assert!(conn.connect_stream(client).await);
    server.write_all(b"PING :again\r\n").await.unwrap();
    assert_eq!(messages.next().await.unwrap().as_slice(), b"PING :again");
  }

  #[tokio::test]
  async fn undecodable_lines_are_reported() {
    let (client, mut server) = duplex(1024);
    let conn = Connection::<Irc>::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    conn.on_diagnostic(move |d| {
      if let Diagnostic::DecodeFailed { line, .. } = d {
        let _ = tx.send(line.to_vec());
      }
    });
    let mut messages = conn.subscribe();
    assert!(conn.connect_stream(client).await);

    server.write_all(b":only.prefix\r\nPING :x\r\n").await.unwrap();
    assert_eq!(rx.recv().await.unwrap(), b":only.prefix");
    assert_eq!(messages.next().await.unwrap().text(), "x");
  }

  #[tokio::test]
  async fn dropping_subscription_unregisters() {
    let conn = Connection::<Raw>::new();
    let subscription = conn.subscribe();
    assert_eq!(conn.inner.listeners.len(), 1);
    drop(subscription);
    assert_eq!(conn.inner.listeners.len(), 0);
  }
}
