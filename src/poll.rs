//! Bounded poll-until-ready primitive.
//!
//! Repeatedly issues a probe and inspects the reply for a ready condition,
//! giving up with [`ScanError::PollTimeout`] once the attempt ceiling is
//! exceeded. Bounding by attempts rather than wall clock keeps the behavior
//! deterministic under mock transports; actual wall time is
//! `attempts * (probe round-trip + interval)`.
//!
//! Only the ready predicate controls the outcome: a garbled or NAK-bearing
//! probe reply is simply "not ready yet" and is retried, never fatal.

use crate::error::{AppResult, ScanError};
use log::trace;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;

/// Attempt ceiling and inter-attempt delay for one poll loop.
///
/// Defaults match the observed device behavior: 500 attempts at 100 ms,
/// roughly ten seconds. Different probe types have different expected
/// latencies, so both knobs come from configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PollConfig {
    pub max_attempts: u32,
    #[serde(rename = "interval_ms", with = "duration_ms")]
    pub interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_attempts: 500,
            interval: Duration::from_millis(100),
        }
    }
}

pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

/// Probe until `is_ready` accepts a reply, or the attempt ceiling is hit.
///
/// Issues exactly `max_attempts + 1` probes in the worst case: the failure
/// counter increments after each miss and the loop aborts once it exceeds
/// the ceiling. `context` labels the resulting [`ScanError::PollTimeout`]
/// with the profile or operation being waited on.
pub async fn poll_until_ready<F, Fut>(
    mut probe: F,
    is_ready: impl Fn(&str) -> bool,
    config: &PollConfig,
    context: &str,
) -> AppResult<String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<String>>,
{
    let mut attempts: u32 = 0;
    loop {
        let response = probe().await?;
        trace!("Poll ({context}): received {response:?}");
        if is_ready(&response) {
            return Ok(response);
        }
        attempts += 1;
        if attempts > config.max_attempts {
            return Err(ScanError::PollTimeout {
                context: context.to_string(),
                attempts,
            });
        }
        tokio::time::sleep(config.interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config(max_attempts: u32) -> PollConfig {
        PollConfig {
            max_attempts,
            interval: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn immediate_ready_takes_one_probe() {
        let probes = AtomicU32::new(0);
        let result = poll_until_ready(
            || {
                probes.fetch_add(1, Ordering::SeqCst);
                async { Ok("F".to_string()) }
            },
            |r| r == "F",
            &fast_config(3),
            "test",
        )
        .await;

        assert_eq!(result.unwrap(), "F");
        assert_eq!(probes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn never_ready_probes_ceiling_plus_one_times() {
        let probes = AtomicU32::new(0);
        let result = poll_until_ready(
            || {
                probes.fetch_add(1, Ordering::SeqCst);
                async { Ok("B".to_string()) }
            },
            |r| r == "F",
            &fast_config(3),
            "X axis",
        )
        .await;

        match result {
            Err(ScanError::PollTimeout { context, attempts }) => {
                assert_eq!(context, "X axis");
                assert_eq!(attempts, 4);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(probes.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn nak_bearing_reply_does_not_short_circuit() {
        let probes = AtomicU32::new(0);
        let result = poll_until_ready(
            || {
                let n = probes.fetch_add(1, Ordering::SeqCst);
                async move {
                    Ok(match n {
                        0 => "<NAK>garbled<ETX>".to_string(),
                        1 => String::new(),
                        _ => "F".to_string(),
                    })
                }
            },
            |r| r == "F",
            &fast_config(10),
            "test",
        )
        .await;

        assert_eq!(result.unwrap(), "F");
        assert_eq!(probes.load(Ordering::SeqCst), 3);
    }
}
