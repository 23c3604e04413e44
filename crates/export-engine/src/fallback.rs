//! Ordered fallback chains.
//!
//! Proxy tiers and the combiner's stream-copy/re-encode pair are both lists
//! of strategies tried in order until one succeeds.

use async_trait::async_trait;

use framecast_common::error::{FramecastError, FramecastResult};

use crate::session::CancelToken;

/// One strategy in a fallback chain.
#[async_trait]
pub trait Attempt: Send + Sync {
    type Output: Send;

    /// Short name used in logs.
    fn name(&self) -> &str;

    async fn attempt(&self) -> FramecastResult<Self::Output>;
}

/// Run `attempts` in order and return the first success.
///
/// Stops as soon as `cancel` trips or an attempt reports cancellation.
/// When every attempt fails, the last error is returned.
pub async fn first_success<T: Send>(
    attempts: &[&dyn Attempt<Output = T>],
    cancel: &CancelToken,
) -> FramecastResult<T> {
    let mut last_error = None;

    for (position, attempt) in attempts.iter().enumerate() {
        cancel.ensure_active()?;

        match attempt.attempt().await {
            Ok(output) => {
                if position > 0 {
                    tracing::info!(strategy = attempt.name(), position, "Fallback strategy succeeded");
                }
                return Ok(output);
            }
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                tracing::warn!(strategy = attempt.name(), error = %e, "Strategy failed");
                if let Some(stderr) = e.stderr() {
                    tracing::debug!(strategy = attempt.name(), stderr, "Strategy stderr");
                }
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| FramecastError::config("fallback chain has no strategies")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        name: &'static str,
        outcome: Option<u32>,
        calls: AtomicUsize,
        cancel_on_call: Option<CancelToken>,
    }

    impl Scripted {
        fn new(name: &'static str, outcome: Option<u32>) -> Self {
            Self {
                name,
                outcome,
                calls: AtomicUsize::new(0),
                cancel_on_call: None,
            }
        }
    }

    #[async_trait]
    impl Attempt for Scripted {
        type Output = u32;

        fn name(&self) -> &str {
            self.name
        }

        async fn attempt(&self) -> FramecastResult<u32> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(token) = &self.cancel_on_call {
                token.cancel();
            }
            self.outcome
                .ok_or_else(|| FramecastError::transcode(format!("{} failed", self.name), ""))
        }
    }

    #[tokio::test]
    async fn test_first_success_stops_at_winner() {
        let a = Scripted::new("hw", None);
        let b = Scripted::new("hybrid", Some(2));
        let c = Scripted::new("software", Some(3));
        let out = first_success::<u32>(&[&a, &b, &c], &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(out, 2);
        assert_eq!(c.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_all_failures_return_last_error() {
        let a = Scripted::new("hw", None);
        let b = Scripted::new("software", None);
        let err = first_success::<u32>(&[&a, &b], &CancelToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("software failed"));
        assert_eq!(a.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_skips_remaining() {
        let token = CancelToken::new();
        let mut a = Scripted::new("hw", None);
        a.cancel_on_call = Some(token.clone());
        let b = Scripted::new("software", Some(1));
        let err = first_success::<u32>(&[&a, &b], &token).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(b.calls.load(Ordering::SeqCst), 0);
    }
}
