//! What the receive loop turns lines into.

use crate::irc::{IrcMessage, ParseError};
use std::convert::Infallible;

/// Decodes a single line, without its `\r\n` terminator.
///
/// A line that fails to decode is reported through
/// [`Connection::on_diagnostic`][super::Connection::on_diagnostic] and dropped,
/// it does not stop the connection.
pub trait Codec: Send + Sync + 'static {
  type Message: Send + Sync + 'static;
  type Error: std::error::Error + Send + Sync + 'static;

  fn decode(line: &[u8]) -> Result<Self::Message, Self::Error>;
}

/// Hands out the line bytes as they were received.
#[derive(Clone, Copy, Debug, Default)]
pub struct Raw;

impl Codec for Raw {
  type Message = Vec<u8>;
  type Error = Infallible;

  fn decode(line: &[u8]) -> Result<Self::Message, Self::Error> {
    Ok(line.to_vec())
  }
}

/// Parses lines into [`IrcMessage`]s.
///
/// Invalid UTF-8 is replaced with `U+FFFD`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Irc;

impl Codec for Irc {
  type Message = IrcMessage;
  type Error = ParseError;

  fn decode(line: &[u8]) -> Result<Self::Message, Self::Error> {
    IrcMessage::parse(String::from_utf8_lossy(line))
  }
}
