use std::fmt::Display;

/// An IRC command.
///
/// Only the verbs the client core reacts to get their own variant,
/// everything else is [`Command::Other`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Command<'src> {
  /// Ping the peer
  Ping,
  /// The peer's response to a [`Command::Ping`]
  Pong,
  /// Send a message to a channel or user
  Privmsg,
  /// General notices, also used by servers during the handshake
  Notice,
  /// Nick change
  Nick,
  /// Join a channel
  Join,
  /// Leave a channel
  Part,
  /// Leave the network
  Quit,
  // Numeric commands
  /// `001`
  RplWelcome,
  /// `002`
  RplYourHost,
  /// `003`
  RplCreated,
  /// `004`
  RplMyInfo,
  /// Unknown command
  Other(&'src str),
}

impl<'src> Display for Command<'src> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

impl<'src> Command<'src> {
  /// Get the string value of the [`Command`].
  pub fn as_str(&self) -> &'src str {
    use Command::*;
    match self {
      Ping => "PING",
      Pong => "PONG",
      Privmsg => "PRIVMSG",
      Notice => "NOTICE",
      Nick => "NICK",
      Join => "JOIN",
      Part => "PART",
      Quit => "QUIT",
      RplWelcome => "001",
      RplYourHost => "002",
      RplCreated => "003",
      RplMyInfo => "004",
      Other(cmd) => cmd,
    }
  }

  /// Returns `true` for the numerics a server sends once registration
  /// has completed (`001` through `004`).
  pub fn is_welcome(&self) -> bool {
    matches!(
      self,
      Command::RplWelcome | Command::RplYourHost | Command::RplCreated | Command::RplMyInfo
    )
  }
}

impl<'src> From<&'src str> for Command<'src> {
  fn from(value: &'src str) -> Self {
    use Command as C;
    match value {
      "PING" => C::Ping,
      "PONG" => C::Pong,
      "PRIVMSG" => C::Privmsg,
      "NOTICE" => C::Notice,
      "NICK" => C::Nick,
      "JOIN" => C::Join,
      "PART" => C::Part,
      "QUIT" => C::Quit,
      "001" => C::RplWelcome,
      "002" => C::RplYourHost,
      "003" => C::RplCreated,
      "004" => C::RplMyInfo,
      other => C::Other(other),
    }
  }
}
