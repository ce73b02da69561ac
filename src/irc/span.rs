use std::ops::Range;

/// A byte range into the line a message was parsed from.
///
/// Messages store these instead of `&str`s, so that they can own their line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Span {
  start: u32,
  end: u32,
}

impl Span {
  /// Whether every range into a line of `len` bytes fits in a `Span`.
  #[inline]
  pub(crate) fn fits(len: usize) -> bool {
    u32::try_from(len).is_ok()
  }

  #[inline]
  pub(crate) fn get<'src>(&self, src: &'src str) -> &'src str {
    &src[self.start as usize..self.end as usize]
  }
}

/// `value` must end within a line for which [`Span::fits`] holds.
impl From<Range<usize>> for Span {
  #[inline]
  fn from(value: Range<usize>) -> Self {
    debug_assert!(Span::fits(value.end));
    Span {
      start: value.start as u32,
      end: value.end as u32,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn get() {
    let src = "PRIVMSG #chan :hi";
    assert_eq!(Span::from(8..13).get(src), "#chan");
    assert_eq!(Span::from(17..17).get(src), "");
  }

  #[test]
  fn fits() {
    assert!(Span::fits(0));
    assert!(Span::fits(u32::MAX as usize));
    #[cfg(target_pointer_width = "64")]
    assert!(!Span::fits(u32::MAX as usize + 1));
  }
}
