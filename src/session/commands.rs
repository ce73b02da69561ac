//! Typed builders on top of [`Session::send_command`].
//!
//! Registration and keepalive verbs (`NICK`, `USER`, `PASS`, `PONG`, `QUIT`)
//! are sent right away, everything else waits for the welcome.

use super::{user_params, Session};
use std::sync::atomic::Ordering;

/// Prepend `#` to channel names that do not have a channel prefix.
fn channel(name: &str) -> String {
  if name.starts_with(['#', '&', '+', '!']) {
    name.to_string()
  } else {
    format!("#{name}")
  }
}

fn channels<I>(channels: I) -> String
where
  I: IntoIterator,
  I::Item: AsRef<str>,
{
  channels
    .into_iter()
    .map(|name| channel(name.as_ref()))
    .collect::<Vec<_>>()
    .join(",")
}

/// `head`, followed by ` :text` if `text` is not empty.
fn with_trailing(head: String, text: &str) -> String {
  if text.is_empty() {
    head
  } else {
    format!("{head} :{text}")
  }
}

/// `:text`, or nothing if `text` is empty.
fn trailing(text: &str) -> String {
  if text.is_empty() {
    String::new()
  } else {
    format!(":{text}")
  }
}

/// The non-empty `parts`, separated by spaces.
fn words<const N: usize>(parts: [&str; N]) -> String {
  parts
    .into_iter()
    .filter(|p| !p.is_empty())
    .collect::<Vec<_>>()
    .join(" ")
}

impl Session {
  /// Ask about the administrators of `target`, a server or a nick, or of
  /// the current server if empty.
  pub async fn admin(&self, target: &str) -> bool {
    self.send_command("ADMIN", "", target, true).await
  }

  /// Mark yourself as away. An empty `message` marks you as back.
  pub async fn away(&self, message: &str) -> bool {
    self.send_command("AWAY", "", &trailing(message), true).await
  }

  /// `NOTICE` `nick` through `channel`, bypassing the target limit.
  /// Needs channel operator status.
  pub async fn cnotice(&self, nick: &str, channel: &str, text: &str) -> bool {
    let params = format!("{nick} {} :{text}", self::channel(channel));
    self.send_command("CNOTICE", "", &params, true).await
  }

  /// `PRIVMSG` `nick` through `channel`, bypassing the target limit.
  /// Needs channel operator status.
  pub async fn cprivmsg(&self, nick: &str, channel: &str, text: &str) -> bool {
    let params = format!("{nick} {} :{text}", self::channel(channel));
    self.send_command("CPRIVMSG", "", &params, true).await
  }

  /// Ask `remote_server` (or the current server if empty) to link to
  /// `target_server`. Operators only.
  pub async fn connect_server(&self, target_server: &str, port: u16, remote_server: &str) -> bool {
    let port = port.to_string();
    let params = words([target_server, port.as_str(), remote_server]);
    self.send_command("CONNECT", "", &params, true).await
  }

  /// Shut the server down. Operators only.
  pub async fn die(&self) -> bool {
    self.send_command("DIE", "", "", true).await
  }

  pub async fn encap(&self, destination: &str, subcommand: &str, params: &str) -> bool {
    let params = words([destination, subcommand, params]);
    self.send_command("ENCAP", "", &params, true).await
  }

  pub async fn error(&self, message: &str) -> bool {
    self.send_command("ERROR", "", &trailing(message), true).await
  }

  pub async fn help(&self) -> bool {
    self.send_command("HELP", "", "", true).await
  }

  /// Ask about the `target` server, or the current server if empty.
  pub async fn info(&self, target: &str) -> bool {
    self.send_command("INFO", "", target, true).await
  }

  /// Invite `nick` to `channel`.
  pub async fn invite(&self, nick: &str, channel: &str) -> bool {
    let params = format!("{nick} {}", self::channel(channel));
    self.send_command("INVITE", "", &params, true).await
  }

  /// Ask which of `nicks` are online.
  pub async fn ison<I>(&self, nicks: I) -> bool
  where
    I: IntoIterator,
    I::Item: AsRef<str>,
  {
    let params = nicks
      .into_iter()
      .map(|n| n.as_ref().to_string())
      .collect::<Vec<_>>()
      .join(" ");
    self.send_command("ISON", "", &params, true).await
  }

  /// Join `channels`. Names without a channel prefix get a `#`.
  pub async fn join<I>(&self, channels: I) -> bool
  where
    I: IntoIterator,
    I::Item: AsRef<str>,
  {
    self.send_command("JOIN", "", &self::channels(channels), true).await
  }

  /// Kick `nick` from `channel`, with an optional `reason`.
  pub async fn kick(&self, channel: &str, nick: &str, reason: &str) -> bool {
    let params = with_trailing(format!("{} {nick}", self::channel(channel)), reason);
    self.send_command("KICK", "", &params, true).await
  }

  /// Remove `nick` from the network. Operators only.
  pub async fn kill(&self, nick: &str, reason: &str) -> bool {
    let params = with_trailing(nick.to_string(), reason);
    self.send_command("KILL", "", &params, true).await
  }

  /// Ask for an invite to an invite-only `channel`.
  pub async fn knock(&self, channel: &str, message: &str) -> bool {
    let params = with_trailing(self::channel(channel), message);
    self.send_command("KNOCK", "", &params, true).await
  }

  /// List the server links matching `server_mask` (all if empty), as seen
  /// by `remote_server` (the current server if empty).
  pub async fn links(&self, remote_server: &str, server_mask: &str) -> bool {
    let params = words([remote_server, server_mask]);
    self.send_command("LINKS", "", &params, true).await
  }

  /// List channels, or only `channels` if not empty.
  pub async fn list<I>(&self, channels: I, server: &str) -> bool
  where
    I: IntoIterator,
    I::Item: AsRef<str>,
  {
    let params = words([self::channels(channels).as_str(), server]);
    self.send_command("LIST", "", &params, true).await
  }

  /// Ask for network size statistics, limited to the servers matching
  /// `mask` and answered by `target` when given.
  pub async fn lusers(&self, mask: &str, target: &str) -> bool {
    let params = words([mask, target]);
    self.send_command("LUSERS", "", &params, true).await
  }

  /// Set `flags` (e.g. `+o`) on `target`, a channel or a nick.
  pub async fn mode(&self, target: &str, flags: &str, params: &str) -> bool {
    let params = words([target, flags, params]);
    self.send_command("MODE", "", &params, true).await
  }

  /// Request the message of the day of `server`, or the current server if empty.
  pub async fn motd(&self, server: &str) -> bool {
    self.send_command("MOTD", "", server, true).await
  }

  /// List the nicks in `channels`.
  pub async fn names<I>(&self, channels: I, server: &str) -> bool
  where
    I: IntoIterator,
    I::Item: AsRef<str>,
  {
    let params = words([self::channels(channels).as_str(), server]);
    self.send_command("NAMES", "", &params, true).await
  }

  /// Ask for a new nick.
  ///
  /// This only changes [`Session::requested_nick`], the accepted nick
  /// follows once the server confirms the change.
  pub async fn nick(&self, nick: &str) -> bool {
    *self.state.requested_nick.write() = nick.to_string();
    self.send_command("NICK", "", nick, false).await
  }

  pub async fn notice(&self, target: &str, text: &str) -> bool {
    self
      .send_command("NOTICE", "", &format!("{target} :{text}"), true)
      .await
  }

  /// Leave `channels`, with an optional `reason`.
  pub async fn part<I>(&self, channels: I, reason: &str) -> bool
  where
    I: IntoIterator,
    I::Item: AsRef<str>,
  {
    let params = with_trailing(self::channels(channels), reason);
    self.send_command("PART", "", &params, true).await
  }

  /// Send the connection password. Must happen before registration.
  pub async fn pass(&self, password: &str) -> bool {
    self.send_command("PASS", "", password, false).await
  }

  pub async fn ping(&self, token: &str) -> bool {
    self.send_command("PING", "", &format!(":{token}"), true).await
  }

  pub async fn pong(&self, token: &str) -> bool {
    self.send_command("PONG", "", &format!(":{token}"), false).await
  }

  pub async fn privmsg(&self, target: &str, text: &str) -> bool {
    self
      .send_command("PRIVMSG", "", &format!("{target} :{text}"), true)
      .await
  }

  /// Leave the network. The session counts as not welcomed afterwards.
  pub async fn quit(&self, reason: &str) -> bool {
    let sent = self.send_command("QUIT", "", &trailing(reason), false).await;
    self.state.welcomed.store(false, Ordering::SeqCst);
    sent
  }

  /// Get the topic of `channel`, or set it if `topic` is given.
  pub async fn topic(&self, channel: &str, topic: Option<&str>) -> bool {
    let channel = self::channel(channel);
    let params = match topic {
      Some(topic) => format!("{channel} :{topic}"),
      None => channel,
    };
    self.send_command("TOPIC", "", &params, true).await
  }

  /// Send `USER`. Registration does this already, see [`Session::register`].
  pub async fn user(&self, user: &str, invisible: bool, real_name: &str) -> bool {
    let params = user_params(user, invisible, real_name);
    self.send_command("USER", "", &params, false).await
  }

  pub async fn who(&self, mask: &str) -> bool {
    self.send_command("WHO", "", mask, true).await
  }

  pub async fn whois(&self, nick: &str) -> bool {
    self.send_command("WHOIS", "", nick, true).await
  }
}
