use crate::error::RetryError;
use crate::policy::BackoffPolicy;
use std::future::Future;

/// Succeeded は成功した操作の戻り値と、成功までに呼び出した回数を保持する。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Succeeded<T> {
    pub value: T,
    pub attempts: u32,
}

/// with_retry は operation を 1 回無条件に実行し、失敗した場合は
/// 最大 max_retry 回まで `policy.compute_delay(retries)` だけ待ってから再実行する。
///
/// operation には 0 始まりの試行番号が渡される。
/// 全試行が失敗した場合、呼び出し回数は `max_retry + 1` となる。
pub async fn with_retry<F, Fut, T, E>(
    policy: &BackoffPolicy,
    max_retry: u32,
    mut operation: F,
) -> Result<Succeeded<T>, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut result = operation(0).await;
    let mut retries = 0u32;

    while let Err(e) = &result {
        if retries >= max_retry {
            break;
        }
        let delay = policy.compute_delay(retries);
        tracing::info!(
            retry = retries + 1,
            max_retry,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %e,
            "retrying"
        );
        tokio::time::sleep(delay).await;
        retries += 1;
        result = operation(retries).await;
    }

    match result {
        Ok(value) => Ok(Succeeded {
            value,
            attempts: retries + 1,
        }),
        Err(last_error) => Err(RetryError::ExhaustedRetries {
            attempts: retries + 1,
            last_error,
        }),
    }
}
