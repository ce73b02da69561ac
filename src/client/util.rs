use std::future::Future;
use std::time::Duration;

/// `fut.timeout(d)` instead of `tokio::time::timeout(d, fut)`.
pub(crate) trait Timeout: Future + Sized {
  fn timeout(self, duration: Duration) -> tokio::time::Timeout<Self> {
    tokio::time::timeout(duration, self)
  }
}

impl<F: Future> Timeout for F {}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn elapses() {
    let pending = std::future::pending::<()>();
    assert!(pending.timeout(Duration::from_millis(10)).await.is_err());
    assert_eq!(async { 1 }.timeout(Duration::from_secs(1)).await.unwrap(), 1);
  }
}
