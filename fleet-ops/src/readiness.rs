use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Duration, Instant};

use crate::{
    cancel::Cancellation,
    errors::{Error, Result},
    provider::{Ec2Provider, InstanceState},
};

/// Bounded, fixed-interval backoff for instance readiness checks.
#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone)]
#[serde(rename_all = "snake_case")]
pub struct PollPolicy {
    /// Number of status checks before giving up.
    pub attempts: u32,
    /// Wait between two checks.
    pub interval: Duration,
    /// Random extra wait in [0, jitter) added to each interval.
    #[serde(default)]
    pub jitter: Duration,
    /// Upper bound on the whole wait, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

pub const DEFAULT_POLL_ATTEMPTS: u32 = 6;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_POLL_ATTEMPTS,
            interval: DEFAULT_POLL_INTERVAL,
            jitter: Duration::ZERO,
            timeout: None,
        }
    }
}

impl PollPolicy {
    fn next_wait(&self) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.interval;
        }
        self.interval + Duration::from_millis(random_manager::u64() % jitter_ms)
    }
}

/// Polls the instance state until "running" or until the attempt budget
/// runs out. Returns false in the latter case, which callers treat as
/// advisory. Status errors count as a failed attempt.
/// Fails with "Error::Timeout" if the policy deadline passes first,
/// and with "Error::Cancelled" if the run is cancelled while waiting.
pub async fn await_running<P: Ec2Provider + ?Sized>(
    provider: &P,
    instance_id: &str,
    policy: &PollPolicy,
    cancel: &Cancellation,
) -> Result<bool> {
    let deadline = policy.timeout.map(|t| Instant::now() + t);

    for attempt in 1..=policy.attempts {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        match provider.describe_instance_state(instance_id).await {
            Ok(Some(InstanceState::Running)) => {
                log::info!(
                    "instance '{}' is running (attempt {}/{})",
                    instance_id,
                    attempt,
                    policy.attempts
                );
                return Ok(true);
            }
            Ok(Some(state)) => log::info!(
                "instance '{}' is '{}' (attempt {}/{})",
                instance_id,
                state.as_str(),
                attempt,
                policy.attempts
            ),
            Ok(None) => log::info!(
                "instance '{}' has no status yet (attempt {}/{})",
                instance_id,
                attempt,
                policy.attempts
            ),
            Err(e) => log::warn!(
                "failed to describe instance '{}' (attempt {}/{}): {}",
                instance_id,
                attempt,
                policy.attempts,
                e
            ),
        }

        if attempt == policy.attempts {
            break;
        }

        let wait = policy.next_wait();
        if let Some(deadline) = deadline {
            if Instant::now() + wait > deadline {
                return Err(Error::Timeout {
                    message: format!(
                        "instance '{}' not running within {:?}",
                        instance_id, policy.timeout
                    ),
                });
            }
        }
        tokio::select! {
            _ = sleep(wait) => {}
            _ = cancel.cancelled() => return Err(Error::Cancelled),
        }
    }

    log::warn!(
        "instance '{}' not running after {} attempt(s), proceeding anyway",
        instance_id,
        policy.attempts
    );
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, MockProvider};

    fn fast_policy(attempts: u32) -> PollPolicy {
        PollPolicy {
            attempts,
            interval: Duration::from_millis(1),
            jitter: Duration::from_millis(2),
            timeout: None,
        }
    }

    /// RUST_LOG=debug cargo test --package fleet-ops --lib -- readiness::tests::test_await_running --exact --show-output
    #[tokio::test]
    async fn test_await_running() {
        let _ = env_logger::builder().is_test(true).try_init();

        let cancel = Cancellation::new();

        let provider = MockProvider::new();
        assert!(await_running(&provider, "i-1", &fast_policy(6), &cancel)
            .await
            .unwrap());
        assert_eq!(provider.calls(), vec![Call::DescribeInstance(String::from("i-1"))]);

        // running on the third check
        let provider = MockProvider::new().with_pending_polls(2);
        assert!(await_running(&provider, "i-1", &fast_policy(6), &cancel)
            .await
            .unwrap());
        assert_eq!(provider.calls().len(), 3);

        // budget exhausted, advisory false
        let provider = MockProvider::new().with_pending_polls(10);
        assert!(!await_running(&provider, "i-1", &fast_policy(6), &cancel)
            .await
            .unwrap());
        assert_eq!(provider.calls().len(), 6);
    }

    /// RUST_LOG=debug cargo test --package fleet-ops --lib -- readiness::tests::test_timeout_and_cancel --exact --show-output
    #[tokio::test]
    async fn test_timeout_and_cancel() {
        let _ = env_logger::builder().is_test(true).try_init();

        let provider = MockProvider::new().with_pending_polls(10);
        let policy = PollPolicy {
            attempts: 6,
            interval: Duration::from_secs(30),
            jitter: Duration::ZERO,
            timeout: Some(Duration::from_secs(1)),
        };
        let ret = await_running(&provider, "i-1", &policy, &Cancellation::new()).await;
        assert!(matches!(ret, Err(Error::Timeout { .. })));
        assert_eq!(provider.calls().len(), 1);

        let policy = PollPolicy {
            timeout: None,
            ..policy
        };
        let cancel = Cancellation::new();
        let cloned = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(20)).await;
            cloned.cancel();
        });
        let ret = await_running(&provider, "i-1", &policy, &cancel).await;
        assert_eq!(ret, Err(Error::Cancelled));
    }
}
