use super::span::Span;

/// `arg arg arg :trailing arg with spaces`
///
/// The first occurrence of `" :"` starts the trailing argument, which runs
/// to the end of the line. Everything before it is split on whitespace.
/// A lone `:` that is not preceded by a space is part of a regular token.
#[inline(always)]
pub(super) fn parse(src: &str, pos: usize) -> Vec<Span> {
  let mut args = Vec::new();
  match src[pos..].find(" :") {
    Some(sep) => {
      let sep = pos + sep;
      split_whitespace(src, pos, sep, &mut args);
      args.push(Span::from(sep + 2..src.len()));
    }
    None => split_whitespace(src, pos, src.len(), &mut args),
  }
  args
}

fn split_whitespace(src: &str, start: usize, end: usize, out: &mut Vec<Span>) {
  let mut token_start = None;
  for (i, c) in src[start..end].char_indices() {
    let i = start + i;
    if c.is_whitespace() {
      if let Some(token_start) = token_start.take() {
        out.push(Span::from(token_start..i));
      }
    } else if token_start.is_none() {
      token_start = Some(i);
    }
  }
  if let Some(token_start) = token_start {
    out.push(Span::from(token_start..end));
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn get(data: &str, pos: usize) -> Vec<&str> {
    parse(data, pos).into_iter().map(|s| s.get(data)).collect()
  }

  #[test]
  fn trailing() {
    assert_eq!(
      get("PRIVMSG #chan :hello  world ", 0),
      ["PRIVMSG", "#chan", "hello  world "]
    );
  }

  #[test]
  fn no_trailing() {
    assert_eq!(get("MODE  #chan   +o bob", 0), ["MODE", "#chan", "+o", "bob"]);
  }

  #[test]
  fn colon_inside_token() {
    assert_eq!(get("CMD a:b c", 0), ["CMD", "a:b", "c"]);
  }

  #[test]
  fn only_first_separator_counts() {
    assert_eq!(get("CMD x :a :b", 0), ["CMD", "x", "a :b"]);
  }

  #[test]
  fn empty_trailing() {
    assert_eq!(get("CMD x :", 0), ["CMD", "x", ""]);
  }

  #[test]
  fn from_offset() {
    assert_eq!(get(":srv PING :abc", 5), ["PING", "abc"]);
  }
}
