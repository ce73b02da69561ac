use super::read::Diagnostic;
use super::{Codec, Connection, Inner};
use futures_util::future::BoxFuture;
use futures_util::{FutureExt, Stream, StreamExt};
use parking_lot::RwLock;
use std::any::Any;
use std::fmt::Display;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// The error a listener callback may fail with.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync + 'static>;

type Filter<C> = dyn Fn(&Connection<C>, &<C as Codec>::Message) -> bool + Send + Sync;
type Callback<C> = dyn Fn(Connection<C>, Arc<<C as Codec>::Message>) -> BoxFuture<'static, Result<(), ListenerError>>
  + Send
  + Sync;

/// A filter and a callback, invoked for every message the filter accepts.
///
/// Listeners are compared by identity: clones of a listener are the same
/// listener, two listeners built from the same closures are not.
///
/// ```rust,no_run
/// # async fn test(conn: ircline::Connection<ircline::client::Irc>) {
/// use ircline::client::Irc;
/// use ircline::{Command, Listener};
///
/// let pings = Listener::<Irc>::filtered(
///   |_, msg: &ircline::IrcMessage| msg.command() == Command::Ping,
///   |_, msg| async move {
///     println!("ping {}", msg.text());
///     Ok(())
///   },
/// );
/// conn.add_listener(&pings);
/// # }
/// ```
pub struct Listener<C: Codec> {
  inner: Arc<ListenerInner<C>>,
}

struct ListenerInner<C: Codec> {
  filter: Option<Box<Filter<C>>>,
  callback: Box<Callback<C>>,
}

impl<C: Codec> Listener<C> {
  /// A listener that accepts every message.
  pub fn new<F, Fut>(callback: F) -> Self
  where
    F: Fn(Connection<C>, Arc<C::Message>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ListenerError>> + Send + 'static,
  {
    Self::from_parts(None, callback)
  }

  /// A listener that only receives messages accepted by `filter`.
  pub fn filtered<P, F, Fut>(filter: P, callback: F) -> Self
  where
    P: Fn(&Connection<C>, &C::Message) -> bool + Send + Sync + 'static,
    F: Fn(Connection<C>, Arc<C::Message>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ListenerError>> + Send + 'static,
  {
    Self::from_parts(Some(Box::new(filter)), callback)
  }

  fn from_parts<F, Fut>(filter: Option<Box<Filter<C>>>, callback: F) -> Self
  where
    F: Fn(Connection<C>, Arc<C::Message>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ListenerError>> + Send + 'static,
  {
    Self {
      inner: Arc::new(ListenerInner {
        filter,
        callback: Box::new(move |conn, msg| callback(conn, msg).boxed()),
      }),
    }
  }

  /// Returns `true` if `self` and `other` are the same listener.
  pub fn ptr_eq(&self, other: &Listener<C>) -> bool {
    Arc::ptr_eq(&self.inner, &other.inner)
  }

  /// Run the filter and, if it accepts, the callback.
  ///
  /// Panics in either are turned into a [`Panicked`] error.
  async fn invoke(&self, conn: &Connection<C>, msg: &Arc<C::Message>) -> Result<(), ListenerError> {
    if let Some(filter) = &self.inner.filter {
      let accepted = catch_unwind(AssertUnwindSafe(|| filter(conn, msg.as_ref())))
        .map_err(Panicked::from_payload)?;
      if !accepted {
        return Ok(());
      }
    }

    let future = catch_unwind(AssertUnwindSafe(|| {
      (self.inner.callback)(conn.clone(), msg.clone())
    }))
    .map_err(Panicked::from_payload)?;

    match AssertUnwindSafe(future).catch_unwind().await {
      Ok(result) => result,
      Err(payload) => Err(Panicked::from_payload(payload).into()),
    }
  }
}

impl<C: Codec> Clone for Listener<C> {
  fn clone(&self) -> Self {
    Self {
      inner: self.inner.clone(),
    }
  }
}

impl<C: Codec> std::fmt::Debug for Listener<C> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Listener")
      .field("filtered", &self.inner.filter.is_some())
      .finish_non_exhaustive()
  }
}

/// The set of listeners attached to a connection.
pub(super) struct Registry<C: Codec> {
  listeners: RwLock<Vec<Listener<C>>>,
}

impl<C: Codec> Registry<C> {
  pub(super) fn new() -> Self {
    Self {
      listeners: RwLock::new(Vec::new()),
    }
  }

  pub(super) fn add(&self, listener: &Listener<C>) -> bool {
    let mut listeners = self.listeners.write();
    if listeners.iter().any(|l| l.ptr_eq(listener)) {
      return false;
    }
    listeners.push(listener.clone());
    true
  }

  pub(super) fn remove(&self, listener: &Listener<C>) -> bool {
    let mut listeners = self.listeners.write();
    let len = listeners.len();
    listeners.retain(|l| !l.ptr_eq(listener));
    listeners.len() != len
  }

  #[cfg(test)]
  pub(super) fn len(&self) -> usize {
    self.listeners.read().len()
  }

  fn contains(&self, listener: &Listener<C>) -> bool {
    self.listeners.read().iter().any(|l| l.ptr_eq(listener))
  }

  /// Hand `msg` to every listener registered when the dispatch started,
  /// skipping the ones removed since.
  pub(super) async fn dispatch(&self, conn: &Connection<C>, msg: Arc<C::Message>) {
    let snapshot = self.listeners.read().clone();
    for listener in snapshot {
      if !self.contains(&listener) {
        continue;
      }
      if let Err(error) = listener.invoke(conn, &msg).await {
        conn.emit(&Diagnostic::ListenerFailed(&error));
      }
    }
  }
}

/// A listener or filter panicked.
#[derive(Debug)]
pub struct Panicked {
  message: String,
}

impl Panicked {
  fn from_payload(payload: Box<dyn Any + Send>) -> Self {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
      s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
      s.clone()
    } else {
      String::from("<non-string panic payload>")
    };
    Self { message }
  }

  /// The panic message, if it was a string.
  pub fn message(&self) -> &str {
    &self.message
  }
}

impl Display for Panicked {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "listener panicked: {}", self.message)
  }
}

impl std::error::Error for Panicked {}

/// A [`Stream`] of the messages received on a connection.
///
/// Created by [`Connection::subscribe`]. Dropping it unregisters it.
/// The stream stays open across reconnects of the same connection.
pub struct Subscription<C: Codec> {
  stream: UnboundedReceiverStream<Arc<C::Message>>,
  listener: Listener<C>,
  conn: Weak<Inner<C>>,
}

impl<C: Codec> Subscription<C> {
  pub(super) fn new(conn: &Connection<C>, filter: Option<Box<Filter<C>>>) -> Self {
    let (sender, receiver) = mpsc::unbounded_channel();
    let listener = Listener::from_parts(filter, move |_, msg| {
      let _ = sender.send(msg);
      futures_util::future::ready(Ok(()))
    });
    conn.add_listener(&listener);
    Self {
      stream: UnboundedReceiverStream::new(receiver),
      listener,
      conn: Arc::downgrade(&conn.inner),
    }
  }
}

impl<C: Codec> Unpin for Subscription<C> {}

impl<C: Codec> Stream for Subscription<C> {
  type Item = Arc<C::Message>;

  fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
    self.get_mut().stream.poll_next_unpin(cx)
  }
}

impl<C: Codec> Drop for Subscription<C> {
  fn drop(&mut self) {
    if let Some(inner) = self.conn.upgrade() {
      inner.listeners.remove(&self.listener);
    }
  }
}
