//! Outcome of a judgment delegated to an external collaborator.

use std::fmt;
use std::future::Future;
use std::time::Duration;

/// Result of asking a collaborator for a judgment.
///
/// Degraded and invalid outcomes are expected operating conditions, not
/// faults: callers collapse them to a role-specific safe default with
/// [`Verdict::into_safe`] instead of propagating an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict<T> {
    /// The collaborator answered and the answer was understood.
    Ok(T),
    /// The collaborator could not be reached, timed out or errored.
    Degraded(String),
    /// The collaborator answered with a shape we do not recognise.
    Invalid(String),
}

impl<T> Verdict<T> {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    /// Collapse to a value, building the fallback from the failure reason.
    pub fn into_safe(self, fallback: impl FnOnce(String) -> T) -> T {
        match self {
            Self::Ok(value) => value,
            Self::Degraded(reason) | Self::Invalid(reason) => fallback(reason),
        }
    }

    /// Degraded verdict from a collaborator error, keeping the full context chain.
    pub fn degraded(prefix: &str, err: &anyhow::Error) -> Self {
        Self::Degraded(format!("{prefix}: {err:#}"))
    }
}

impl<T> fmt::Display for Verdict<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok(_) => write!(f, "ok"),
            Self::Degraded(reason) => write!(f, "degraded: {reason}"),
            Self::Invalid(reason) => write!(f, "invalid: {reason}"),
        }
    }
}

/// Run one external call under its own deadline.
///
/// # Errors
///
/// Returns the call's own error, or a timeout error naming `what`.
pub async fn within<T, F>(limit: Duration, what: &str, call: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| anyhow::anyhow!("{what} timed out after {}s", limit.as_secs()))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_safe() {
        assert_eq!(Verdict::Ok(1).into_safe(|_| 0), 1);
        assert_eq!(
            Verdict::<String>::Degraded("down".into()).into_safe(|r| r),
            "down"
        );
        assert_eq!(
            Verdict::<String>::Invalid("bad".into()).into_safe(|r| r),
            "bad"
        );
    }

    #[tokio::test]
    async fn test_within_times_out() {
        let result: anyhow::Result<()> = within(Duration::from_millis(10), "slow call", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        let err = result.unwrap_err();
        assert!(err.to_string().contains("slow call timed out"));

        let fast = within(Duration::from_secs(1), "fast call", async { Ok(7) }).await;
        assert_eq!(fast.unwrap(), 7);
    }

    #[test]
    fn test_degraded_keeps_context() {
        let err = anyhow::anyhow!("connection refused").context("Failed to call model");
        let verdict = Verdict::<()>::degraded("Error in check", &err);
        assert_eq!(
            verdict,
            Verdict::Degraded("Error in check: Failed to call model: connection refused".into())
        );
        assert!(!verdict.is_ok());
    }
}
