//! Bounded retries of transient failures.

use backon::BackoffBuilder;
use hrss_api::*;
use std::time::Duration;

/// Bounds for [retry].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryOpts {
    /// Maximum number of attempts, including the first.
    pub attempts: usize,
    /// Maximum total elapsed time.
    pub timeout: Duration,
    /// Wait between attempts.
    pub interval: Duration,
}

impl Default for RetryOpts {
    fn default() -> Self {
        Self {
            attempts: 200,
            timeout: Duration::from_secs(20),
            interval: Duration::from_millis(100),
        }
    }
}

/// Run `op` until it succeeds, fails with an error that is not
/// [HrssError::is_transient], or the attempts or time run out.
/// Running out of time yields [HrssError::Timeout], running out of
/// attempts yields the last error.
pub async fn retry<T, F, Fut>(opts: RetryOpts, mut op: F) -> HrssResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = HrssResult<T>>,
{
    let mut back_off = backon::ConstantBuilder::default()
        .with_delay(opts.interval)
        .with_max_times(opts.attempts.saturating_sub(1))
        .build();

    let run = async move {
        let mut attempt = 1;
        loop {
            let err = match op().await {
                Ok(r) => return Ok(r),
                Err(err) if !err.is_transient() => return Err(err),
                Err(err) => err,
            };
            match back_off.next() {
                None => return Err(err),
                Some(delay) => {
                    tracing::debug!(?err, attempt, "retrying");
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                }
            }
        }
    };

    match tokio::time::timeout(opts.timeout, run).await {
        Ok(r) => r,
        Err(_) => Err(HrssError::timeout(format!(
            "gave up after {:?}",
            opts.timeout
        ))),
    }
}
