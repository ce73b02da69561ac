use super::ParseError;
use super::span::Span;

#[derive(Debug, Clone, Copy)]
pub(super) struct RawPrefix {
  pub(super) host: Span,
  pub(super) nick: Option<Span>,
}

/// `:nick!user@host <rest>`
///
/// Everything up to the first space is the host. The nick is the part of the
/// host before the first `!`, and is only present if the host contains one.
///
/// A prefix that is not followed by anything has no command.
#[inline(always)]
pub(super) fn parse(src: &str, pos: &mut usize) -> Result<Option<RawPrefix>, ParseError> {
  if !src[*pos..].starts_with(':') {
    return Ok(None);
  }

  let start = *pos + 1;
  let Some(end) = src[start..].find(' ') else {
    return Err(ParseError::MissingCommand);
  };
  let end = start + end;

  let host = Span::from(start..end);
  let nick = src[start..end]
    .find('!')
    .map(|bang| Span::from(start..start + bang));

  *pos = end + 1;
  Ok(Some(RawPrefix { host, nick }))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn user_prefix() {
    let data = ":nick!user@host PRIVMSG #chan :hi";
    let mut pos = 0;

    let prefix = parse(data, &mut pos).unwrap().unwrap();
    assert_eq!(prefix.host.get(data), "nick!user@host");
    assert_eq!(prefix.nick.map(|s| s.get(data)), Some("nick"));
    assert_eq!(&data[pos..], "PRIVMSG #chan :hi");
  }

  #[test]
  fn server_prefix() {
    let data = ":irc.example.net 001 bob :Welcome";
    let mut pos = 0;

    let prefix = parse(data, &mut pos).unwrap().unwrap();
    assert_eq!(prefix.host.get(data), "irc.example.net");
    assert!(prefix.nick.is_none());
    assert_eq!(&data[pos..], "001 bob :Welcome");
  }

  #[test]
  fn no_prefix() {
    let mut pos = 0;
    assert!(parse("PING :abc", &mut pos).unwrap().is_none());
    assert_eq!(pos, 0);
  }

  #[test]
  fn dangling_prefix() {
    let mut pos = 0;
    assert_eq!(
      parse(":irc.example.net", &mut pos).unwrap_err(),
      ParseError::MissingCommand
    );
  }
}
