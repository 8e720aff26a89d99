//! Bounded concurrent fan-out of independent oracle requests.
//!
//! Requests run with at most `max_in_flight` outstanding, each under the
//! retry policy. Completion order is arbitrary; results are tagged with their
//! origin index and re-sorted. A request that fails for good becomes `None`
//! and never aborts the others.

use std::future::Future;

use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use crate::error::OracleResult;
use crate::oracle::retry::with_retry;
use crate::types::config::FanOutConfig;

/// Size of a request input, used to scale its timeout.
pub trait InputSize {
    fn input_chars(&self) -> usize;
}

impl InputSize for str {
    fn input_chars(&self) -> usize {
        self.chars().count()
    }
}

impl InputSize for String {
    fn input_chars(&self) -> usize {
        self.as_str().input_chars()
    }
}

impl<T: InputSize + ?Sized> InputSize for &T {
    fn input_chars(&self) -> usize {
        (**self).input_chars()
    }
}

/// Run `op(index, input)` for every input with bounded concurrency.
///
/// The output has one slot per input, in input order.
pub async fn fan_out<I, T, F, Fut>(inputs: &[I], config: &FanOutConfig, op: F) -> Vec<Option<T>>
where
    I: InputSize,
    F: Fn(usize, &I) -> Fut,
    Fut: Future<Output = OracleResult<T>>,
{
    let op = &op;
    let max_in_flight = config.max_in_flight.max(1);

    debug!(requests = inputs.len(), max_in_flight, "Fanning out requests");

    let mut tagged: Vec<(usize, Option<T>)> = stream::iter(inputs.iter().enumerate())
        .map(|(index, input)| async move {
            match with_retry(&config.retry, input.input_chars(), || op(index, input)).await {
                Ok(value) => (index, Some(value)),
                Err(e) => {
                    warn!(index, error = %e, "Request failed, leaving its result empty");
                    (index, None)
                }
            }
        })
        .buffer_unordered(max_in_flight)
        .collect()
        .await;

    tagged.sort_by_key(|(index, _)| *index);
    tagged.into_iter().map(|(_, value)| value).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OracleError;
    use crate::types::config::RetryPolicy;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn config(max_in_flight: usize) -> FanOutConfig {
        FanOutConfig::new().with_max_in_flight(max_in_flight).with_retry(
            RetryPolicy::new()
                .with_max_attempts(2)
                .with_retry_delay_ms(1)
                .with_fixed_timeout_ms(1_000),
        )
    }

    #[tokio::test]
    async fn test_results_restored_to_input_order() {
        let inputs: Vec<String> = (0..6).map(|i| format!("item-{}", i)).collect();

        // Later inputs finish first
        let results = fan_out(&inputs, &config(6), |index, input| {
            let text = input.clone();
            async move {
                tokio::time::sleep(Duration::from_millis((6 - index as u64) * 5)).await;
                Ok(text.to_uppercase())
            }
        })
        .await;

        let expected: Vec<Option<String>> =
            (0..6).map(|i| Some(format!("ITEM-{}", i))).collect();
        assert_eq!(results, expected);
    }

    #[tokio::test]
    async fn test_failed_items_become_none() {
        let inputs = vec!["ok", "bad", "ok"];

        let results = fan_out(&inputs, &config(2), |_, input| {
            let input = *input;
            async move {
                if input == "bad" {
                    Err(OracleError::Api("rejected".into()))
                } else {
                    Ok(input.len())
                }
            }
        })
        .await;

        assert_eq!(results, vec![Some(2), None, Some(2)]);
    }

    #[tokio::test]
    async fn test_in_flight_bound_respected() {
        let inputs: Vec<String> = (0..10).map(|i| i.to_string()).collect();
        let in_flight = &AtomicUsize::new(0);
        let peak = &AtomicUsize::new(0);

        let results = fan_out(&inputs, &config(3), move |_, _| {
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;

        assert_eq!(results.len(), 10);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_transient_failure_retried() {
        let attempts = &AtomicUsize::new(0);
        let inputs = vec!["x"];

        let results = fan_out(&inputs, &config(1), move |_, _| {
            async move {
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(OracleError::Transport("reset".into()))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(results, vec![Some(7)]);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
