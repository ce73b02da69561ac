//! ## IRC session
//!
//! The entrypoint to this module is [`Session`].
//!
//! A [`Session`] wraps a [`Connection`] which decodes lines with [`Irc`],
//! and adds the bits every IRC client needs:
//! - Registration (`NICK`/`USER`), see [`RegistrationTrigger`]
//! - Answering `PING`s
//! - Holding back commands until the server has welcomed us
//! - Typed command builders, see [`Session::join`], [`Session::privmsg`], etc.
//!
//! ```rust,no_run
//! # async fn run() {
//! use ircline::{Security, Session};
//!
//! let session = Session::builder("ircline-bot").build();
//! session.connect_to("irc.libera.chat", Security::Tls).await;
//! // sent once the server has welcomed us
//! session.join(["#ircline"]).await;
//! # }
//! ```

mod commands;

use crate::client::{
  self, Connection, Diagnostic, Irc, Listener, ListenerError, SendError, Subscription,
};
use crate::irc::{Command, IrcMessage};
use crate::Security;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;

/// A listener on a [`Session`]'s connection.
pub type IrcListener = Listener<Irc>;

/// When to send the `NICK`/`USER` pair.
///
/// Registration is sent at most once per connection, whatever the trigger.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum RegistrationTrigger {
  /// As soon as the connection is open.
  #[default]
  OnConnect,

  /// When the server sends a `NOTICE` saying it has looked up our
  /// hostname. Some networks ignore registration sent before that.
  OnHostnameNotice,

  /// Only when [`Session::register`] is called.
  Manual,
}

/// Session configuration.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Config {
  /// The nick to register with.
  pub nick: String,

  /// The user name sent in `USER`. Defaults to the nick.
  #[cfg_attr(feature = "serde", serde(default))]
  pub user: Option<String>,

  /// The real name sent in `USER`. Defaults to the nick.
  #[cfg_attr(feature = "serde", serde(default))]
  pub real_name: Option<String>,

  /// Ask for user mode `+i`.
  #[cfg_attr(feature = "serde", serde(default))]
  pub invisible: bool,

  #[cfg_attr(feature = "serde", serde(default))]
  pub registration: RegistrationTrigger,

  /// Used by [`Session::connect_to`].
  #[cfg_attr(feature = "serde", serde(default = "default_timeout"))]
  pub timeout: Duration,
}

#[cfg(feature = "serde")]
fn default_timeout() -> Duration {
  client::DEFAULT_TIMEOUT
}

impl Config {
  pub fn new(nick: impl ToString) -> Self {
    Self {
      nick: nick.to_string(),
      user: None,
      real_name: None,
      invisible: false,
      registration: RegistrationTrigger::default(),
      timeout: client::DEFAULT_TIMEOUT,
    }
  }

  pub fn user(&self) -> &str {
    self.user.as_deref().unwrap_or(&self.nick)
  }

  pub fn real_name(&self) -> &str {
    self.real_name.as_deref().unwrap_or(&self.nick)
  }
}

/// Builder for a [`Session`].
pub struct SessionBuilder {
  config: Config,
}

impl SessionBuilder {
  /// Set the user name sent in `USER`.
  pub fn user(mut self, user: impl ToString) -> Self {
    self.config.user = Some(user.to_string());
    self
  }

  /// Set the real name sent in `USER`.
  pub fn real_name(mut self, real_name: impl ToString) -> Self {
    self.config.real_name = Some(real_name.to_string());
    self
  }

  pub fn invisible(mut self, invisible: bool) -> Self {
    self.config.invisible = invisible;
    self
  }

  /// Set when registration is sent.
  pub fn registration(mut self, trigger: RegistrationTrigger) -> Self {
    self.config.registration = trigger;
    self
  }

  /// Set the timeout used by [`Session::connect_to`].
  pub fn timeout(mut self, timeout: Duration) -> Self {
    self.config.timeout = timeout;
    self
  }

  pub fn build(self) -> Session {
    Session::new(self.config)
  }
}

/// Whether a command went out immediately or is waiting for the welcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
  Sent,
  Queued,
}

/// An IRC client session.
///
/// This is a cheap handle, clones refer to the same session.
#[derive(Clone)]
pub struct Session {
  conn: Connection<Irc>,
  state: Arc<State>,
}

struct State {
  config: Config,
  welcomed: AtomicBool,
  /// `NICK`/`USER` went out on the current connection.
  registered: AtomicBool,
  /// Holding this lock is what orders queued commands before later ones.
  queue: Mutex<VecDeque<QueuedCommand>>,
  requested_nick: RwLock<String>,
  accepted_nick: RwLock<Option<String>>,
  lifecycle: Mutex<()>,
}

#[derive(Debug)]
struct QueuedCommand {
  command: String,
  prefix: String,
  params: String,
}

impl QueuedCommand {
  fn line(&self) -> String {
    format_line(&self.command, &self.prefix, &self.params)
  }
}

/// `[":" prefix " "] command [" " params]`
fn format_line(command: &str, prefix: &str, params: &str) -> String {
  let mut line = String::with_capacity(prefix.len() + command.len() + params.len() + 3);
  if !prefix.is_empty() {
    if !prefix.starts_with(':') {
      line.push(':');
    }
    line.push_str(prefix);
    line.push(' ');
  }
  line.push_str(command);
  if !params.is_empty() {
    line.push(' ');
    line.push_str(params);
  }
  line
}

impl Session {
  pub fn new(config: Config) -> Self {
    let state = Arc::new(State {
      requested_nick: RwLock::new(config.nick.clone()),
      accepted_nick: RwLock::new(None),
      config,
      welcomed: AtomicBool::new(false),
      registered: AtomicBool::new(false),
      queue: Mutex::new(VecDeque::new()),
      lifecycle: Mutex::new(()),
    });

    let conn = Connection::new();
    conn.add_listener(&Self::builtin_listener(&state));
    conn.on_diagnostic({
      let state = state.clone();
      move |diagnostic| {
        if let Diagnostic::Closed(_) = diagnostic {
          state.welcomed.store(false, Ordering::SeqCst);
          state.registered.store(false, Ordering::SeqCst);
        }
      }
    });

    Self { conn, state }
  }

  /// The [`SessionBuilder`] provides a builder for setting up the session configuration.
  pub fn builder(nick: impl ToString) -> SessionBuilder {
    SessionBuilder {
      config: Config::new(nick),
    }
  }

  pub fn config(&self) -> &Config {
    &self.state.config
  }

  /// The underlying connection, for registering listeners or sending raw lines.
  pub fn connection(&self) -> &Connection<Irc> {
    &self.conn
  }

  pub fn is_alive(&self) -> bool {
    self.conn.is_alive()
  }

  /// See [`Connection::add_listener`].
  pub fn add_listener(&self, listener: &IrcListener) -> bool {
    self.conn.add_listener(listener)
  }

  /// See [`Connection::remove_listener`].
  pub fn remove_listener(&self, listener: &IrcListener) -> bool {
    self.conn.remove_listener(listener)
  }

  /// See [`Connection::subscribe`].
  pub fn subscribe(&self) -> Subscription<Irc> {
    self.conn.subscribe()
  }

  /// Returns `true` once the server has sent one of the welcome numerics
  /// on the current connection.
  pub fn is_welcomed(&self) -> bool {
    self.state.welcomed.load(Ordering::SeqCst)
  }

  /// The nick we last asked for.
  ///
  /// The server may not have accepted it (yet), see [`Session::accepted_nick`].
  pub fn requested_nick(&self) -> String {
    self.state.requested_nick.read().clone()
  }

  /// The nick the server knows us by, if it has told us.
  pub fn accepted_nick(&self) -> Option<String> {
    self.state.accepted_nick.read().clone()
  }

  /// Connect to `host` on the conventional port for `security`,
  /// waiting at most [`Config::timeout`].
  pub async fn connect_to(&self, host: &str, security: Security) -> bool {
    self
      .connect(host, security.default_port(), self.state.config.timeout, security)
      .await
  }

  /// Connect to `host:port`, waiting at most `timeout`.
  ///
  /// Returns `false` if the session is already connected, if the
  /// connection could not be established, or if registration is sent on
  /// connect and that send failed. In the last case the transport is left
  /// open, check [`Session::is_alive`].
  pub async fn connect(&self, host: &str, port: u16, timeout: Duration, security: Security) -> bool {
    let _lifecycle = self.state.lifecycle.lock().await;
    if self.conn.is_alive() {
      return false;
    }
    self.state.reset().await;
    if !self.conn.connect(host, port, timeout, security).await {
      return false;
    }
    self.on_connected().await
  }

  /// Use an already established stream as the transport.
  ///
  /// Returns `false` in the same cases as [`Session::connect`].
  pub async fn connect_stream<S>(&self, stream: S) -> bool
  where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
  {
    let _lifecycle = self.state.lifecycle.lock().await;
    if self.conn.is_alive() {
      return false;
    }
    self.state.reset().await;
    if !self.conn.connect_stream(stream).await {
      return false;
    }
    self.on_connected().await
  }

  /// Returns `false` if registration was due and could not be sent.
  async fn on_connected(&self) -> bool {
    if self.state.config.registration != RegistrationTrigger::OnConnect {
      return true;
    }
    match self.register().await {
      Ok(_) => true,
      Err(e) => {
        warn!("failed to register: {e}");
        false
      }
    }
  }

  /// Close the connection and forget any queued commands.
  ///
  /// Returns `false` if the session was not connected.
  pub async fn disconnect(&self) -> bool {
    let closed = {
      let _lifecycle = self.state.lifecycle.lock().await;
      let closed = self.conn.close().await;
      self.state.reset().await;
      closed
    };
    // a listener may be waiting on the lifecycle lock, which the receive
    // loop needs to finish
    match closed {
      Some(closed) => {
        self.conn.join(closed).await;
        true
      }
      None => false,
    }
  }

  /// Send `NICK` and `USER`, unless they were already sent on this connection.
  ///
  /// Returns `Ok(false)` if they were.
  pub async fn register(&self) -> Result<bool, SendError> {
    if self.state.registered.swap(true, Ordering::SeqCst) {
      return Ok(false);
    }

    let nick = self.requested_nick();
    let config = &self.state.config;
    let result = async {
      self.try_send_command("NICK", "", &nick, false).await?;
      let user = user_params(config.user(), config.invisible, config.real_name());
      self.try_send_command("USER", "", &user, false).await
    }
    .await;

    match result {
      Ok(_) => {
        debug!(%nick, "sent registration");
        Ok(true)
      }
      Err(e) => {
        self.state.registered.store(false, Ordering::SeqCst);
        Err(e)
      }
    }
  }

  /// Send a command, see [`Session::try_send_command`].
  ///
  /// Returns `false` if the command could not be sent or queued.
  pub async fn send_command(&self, command: &str, prefix: &str, params: &str, wait_for_welcome: bool) -> bool {
    match self.try_send_command(command, prefix, params, wait_for_welcome).await {
      Ok(_) => true,
      Err(e) => {
        debug!(command, "{e}");
        false
      }
    }
  }

  /// Send `[":" prefix " "] command [" " params]`.
  ///
  /// If `wait_for_welcome` is set and the server has not welcomed us yet,
  /// the command is queued instead, and sent along with the rest of the
  /// queue (in the order they were queued) as soon as the welcome arrives.
  ///
  /// Fails with [`SendError::NotConnected`] if the session is not
  /// connected, in which case nothing is queued.
  pub async fn try_send_command(
    &self,
    command: &str,
    prefix: &str,
    params: &str,
    wait_for_welcome: bool,
  ) -> Result<Delivery, SendError> {
    if !self.conn.is_alive() {
      self.state.welcomed.store(false, Ordering::SeqCst);
      return Err(SendError::NotConnected);
    }

    if !wait_for_welcome {
      self.conn.send(&format_line(command, prefix, params)).await?;
      return Ok(Delivery::Sent);
    }

    let mut queue = self.state.queue.lock().await;
    if self.state.welcomed.load(Ordering::SeqCst) {
      self.conn.send(&format_line(command, prefix, params)).await?;
      Ok(Delivery::Sent)
    } else {
      trace!(command, params, "queued until welcome");
      queue.push_back(QueuedCommand {
        command: command.to_string(),
        prefix: prefix.to_string(),
        params: params.to_string(),
      });
      Ok(Delivery::Queued)
    }
  }

  fn builtin_listener(state: &Arc<State>) -> IrcListener {
    let state = state.clone();
    IrcListener::new(move |conn, msg| {
      let session = Session {
        conn,
        state: state.clone(),
      };
      async move { session.handle(&msg).await }
    })
  }

  async fn handle(&self, msg: &IrcMessage) -> Result<(), ListenerError> {
    match msg.command() {
      Command::Ping => {
        self
          .try_send_command("PONG", "", &format!(":{}", msg.target()), false)
          .await?;
      }
      Command::Notice
        if self.state.config.registration == RegistrationTrigger::OnHostnameNotice
          && is_hostname_notice(msg) =>
      {
        self.register().await?;
      }
      Command::Nick => {
        let mut accepted = self.state.accepted_nick.write();
        if accepted.is_some() && accepted.as_deref() == msg.nick() {
          debug!(from = msg.nick(), to = msg.target(), "nick changed");
          *accepted = Some(msg.target().to_string());
        }
      }
      command if command.is_welcome() => {
        if command == Command::RplWelcome && !msg.target().is_empty() {
          *self.state.accepted_nick.write() = Some(msg.target().to_string());
        }
        self.welcome().await?;
      }
      _ => {}
    }
    Ok(())
  }

  /// Mark the session as welcomed and flush the queue.
  async fn welcome(&self) -> Result<(), SendError> {
    let mut queue = self.state.queue.lock().await;
    if self.state.welcomed.swap(true, Ordering::SeqCst) {
      return Ok(());
    }
    debug!(queued = queue.len(), "welcomed");
    if queue.is_empty() {
      return Ok(());
    }
    let lines = queue.drain(..).map(|cmd| cmd.line()).collect::<Vec<_>>();
    self.conn.send_lines(lines).await
  }
}

impl State {
  async fn reset(&self) {
    self.queue.lock().await.clear();
    self.welcomed.store(false, Ordering::SeqCst);
    self.registered.store(false, Ordering::SeqCst);
    *self.accepted_nick.write() = None;
  }
}

fn user_params(user: &str, invisible: bool, real_name: &str) -> String {
  format!("{user} {} * :{real_name}", if invisible { 8 } else { 0 })
}

const HOSTNAME_NOTICES: &[&str] = &[
  "*** Found your hostname",
  "*** Couldn't resolve your hostname",
];

fn is_hostname_notice(msg: &IrcMessage) -> bool {
  msg
    .args()
    .any(|arg| HOSTNAME_NOTICES.iter().any(|notice| arg.contains(notice)))
}

impl std::fmt::Debug for Session {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Session")
      .field("conn", &self.conn)
      .field("nick", &self.requested_nick())
      .field("welcomed", &self.is_welcomed())
      .finish_non_exhaustive()
  }
}

impl Display for Delivery {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Delivery::Sent => f.write_str("sent"),
      Delivery::Queued => f.write_str("queued"),
    }
  }
}

static_assert_send!(Session);
static_assert_sync!(Session);
