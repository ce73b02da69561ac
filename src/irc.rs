//! ## IRC message parser
//!
//! The entrypoint to this module is [`IrcMessage`].
//!
//! ```rust
//! let msg = ircline::IrcMessage::parse(":nick!user@host PRIVMSG #chan :hello world").unwrap();
//! assert_eq!(msg.nick(), Some("nick"));
//! assert_eq!(msg.text(), "hello world");
//! ```
//!
//! The grammar is deliberately small: an optional `:prefix`, a command,
//! whitespace-separated arguments, and an optional trailing argument
//! introduced by `" :"`. IRCv3 tags are not understood.

mod command;
mod params;
mod prefix;
mod span;

pub use command::Command;

use self::span::Span;
use std::fmt::{Debug, Display};

/// A parsed IRC message.
///
/// This owns the line it was parsed from, every accessor borrows from it.
#[derive(Clone)]
pub struct IrcMessage {
  src: String,
  parts: IrcMessageParts,
}

#[derive(Clone)]
struct IrcMessageParts {
  host: Option<Span>,
  nick: Option<Span>,
  command: Span,
  args: Vec<Span>,
}

impl IrcMessage {
  /// Parse a single IRC line.
  ///
  /// `src` must not contain the `\r\n` terminator.
  pub fn parse(src: impl Into<String>) -> Result<Self, ParseError> {
    let src = src.into();
    let parts = Self::parse_inner(&src)?;
    Ok(IrcMessage { src, parts })
  }

  #[inline(always)]
  fn parse_inner(src: &str) -> Result<IrcMessageParts, ParseError> {
    if src.is_empty() {
      return Err(ParseError::Empty);
    }
    if !Span::fits(src.len()) {
      return Err(ParseError::TooLong);
    }

    let mut pos = 0usize;
    let prefix = prefix::parse(src, &mut pos)?;
    let mut args = params::parse(src, pos);
    if args.is_empty() {
      return Err(ParseError::MissingCommand);
    }
    let command = args.remove(0);

    Ok(IrcMessageParts {
      host: prefix.map(|p| p.host),
      nick: prefix.and_then(|p| p.nick),
      command,
      args,
    })
  }

  /// Get the string from which this message was parsed.
  pub fn raw(&self) -> &str {
    &self.src
  }

  /// Get the message prefix (`nick!user@host` or a server name),
  /// without the leading `:`.
  pub fn host(&self) -> Option<&str> {
    self.parts.host.map(|span| span.get(&self.src))
  }

  /// Get the nick of the sender.
  ///
  /// Only present if the prefix has the `nick!user@host` form.
  pub fn nick(&self) -> Option<&str> {
    self.parts.nick.map(|span| span.get(&self.src))
  }

  /// Get the message [`Command`].
  pub fn command(&self) -> Command<'_> {
    Command::from(self.command_str())
  }

  /// Get the command exactly as it appeared on the wire.
  pub fn command_str(&self) -> &str {
    self.parts.command.get(&self.src)
  }

  /// Get an iterator over the arguments.
  ///
  /// The trailing argument, if any, is the last item, spaces included.
  pub fn args(&self) -> impl ExactSizeIterator<Item = &str> + '_ {
    self.parts.args.iter().map(|span| span.get(&self.src))
  }

  /// Get the argument at `index`.
  pub fn arg(&self, index: usize) -> Option<&str> {
    self.parts.args.get(index).map(|span| span.get(&self.src))
  }

  /// The first argument, usually a channel or a nick.
  ///
  /// Returns an empty string if there are no arguments.
  pub fn target(&self) -> &str {
    self.arg(0).unwrap_or("")
  }

  /// The last argument, usually the message text.
  ///
  /// Returns an empty string if there are no arguments.
  pub fn text(&self) -> &str {
    self
      .parts
      .args
      .last()
      .map(|span| span.get(&self.src))
      .unwrap_or("")
  }
}

impl Debug for IrcMessage {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("IrcMessage")
      .field("host", &self.host())
      .field("nick", &self.nick())
      .field("command", &self.command_str())
      .field("args", &self.args().collect::<Vec<_>>())
      .finish()
  }
}

impl Display for IrcMessage {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.src)
  }
}

impl std::str::FromStr for IrcMessage {
  type Err = ParseError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    IrcMessage::parse(s)
  }
}

static_assert_send!(IrcMessage);
static_assert_sync!(IrcMessage);

/// Failed to parse a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParseError {
  /// The line was empty.
  Empty,

  /// The line had no command, e.g. it only had a prefix.
  MissingCommand,

  /// The line is longer than 4 GiB.
  TooLong,
}

impl Display for ParseError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ParseError::Empty => f.write_str("failed to parse message: empty line"),
      ParseError::MissingCommand => f.write_str("failed to parse message: missing command"),
      ParseError::TooLong => f.write_str("failed to parse message: line too long"),
    }
  }
}

impl std::error::Error for ParseError {}

#[cfg(test)]
mod tests {
  use super::*;

  mod parse {
    use super::*;

    #[test]
    fn welcome() {
      let msg = IrcMessage::parse(":irc.example.net 001 bob :Welcome").unwrap();
      assert_eq!(msg.host(), Some("irc.example.net"));
      assert_eq!(msg.nick(), None);
      assert_eq!(msg.command(), Command::RplWelcome);
      assert_eq!(msg.args().collect::<Vec<_>>(), ["bob", "Welcome"]);
      assert_eq!(msg.target(), "bob");
      assert_eq!(msg.text(), "Welcome");
    }

    #[test]
    fn privmsg() {
      let msg = IrcMessage::parse(":nick!user@host PRIVMSG #chan :hello world").unwrap();
      insta::assert_debug_snapshot!(msg, @r###"
      IrcMessage {
          host: Some(
              "nick!user@host",
          ),
          nick: Some(
              "nick",
          ),
          command: "PRIVMSG",
          args: [
              "#chan",
              "hello world",
          ],
      }
      "###);
      assert_eq!(msg.command(), Command::Privmsg);
      assert_eq!(msg.target(), "#chan");
      assert_eq!(msg.text(), "hello world");
    }

    #[test]
    fn ping_without_prefix() {
      let msg = IrcMessage::parse("PING :irc.example.net").unwrap();
      insta::assert_debug_snapshot!(msg, @r###"
      IrcMessage {
          host: None,
          nick: None,
          command: "PING",
          args: [
              "irc.example.net",
          ],
      }
      "###);
      assert_eq!(msg.target(), msg.text());
    }

    #[test]
    fn no_args() {
      let msg = IrcMessage::parse("QUIT").unwrap();
      assert_eq!(msg.command(), Command::Quit);
      assert_eq!(msg.args().len(), 0);
      assert_eq!(msg.target(), "");
      assert_eq!(msg.text(), "");
    }

    #[test]
    fn trailing_keeps_inner_separators() {
      let msg = IrcMessage::parse(":a!b@c NOTICE me :*** Found your hostname :)").unwrap();
      assert_eq!(msg.text(), "*** Found your hostname :)");
    }

    #[test]
    fn empty_trailing() {
      let msg = IrcMessage::parse("TOPIC #chan :").unwrap();
      assert_eq!(msg.args().collect::<Vec<_>>(), ["#chan", ""]);
      assert_eq!(msg.text(), "");
    }

    #[test]
    fn nick_only_from_bang() {
      let msg = IrcMessage::parse(":nick@host JOIN #chan").unwrap();
      assert_eq!(msg.host(), Some("nick@host"));
      assert_eq!(msg.nick(), None);
    }

    #[test]
    fn roundtrip_trailing() {
      let args = ["#chan", "a  b :c "];
      let line = format!(":srv PRIVMSG {} :{}", args[0], args[1]);
      let msg = IrcMessage::parse(line).unwrap();
      assert_eq!(msg.args().collect::<Vec<_>>(), args);
    }

    #[test]
    fn errors() {
      assert_eq!(IrcMessage::parse("").unwrap_err(), ParseError::Empty);
      assert_eq!(
        IrcMessage::parse(":only.a.prefix").unwrap_err(),
        ParseError::MissingCommand
      );
      assert_eq!(
        IrcMessage::parse(":prefix    ").unwrap_err(),
        ParseError::MissingCommand
      );
      assert_eq!(IrcMessage::parse("   ").unwrap_err(), ParseError::MissingCommand);
    }

    #[test]
    fn trailing_becomes_command() {
      // `" :"` right after the prefix separator leaves no regular tokens
      let msg = IrcMessage::parse(":srv  :text here").unwrap();
      assert_eq!(msg.command_str(), "text here");
      assert_eq!(msg.args().len(), 0);
    }
  }
}
