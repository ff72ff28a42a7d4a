use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::jitter::{JitterSource, ThreadRngJitter};

/// 最初のリトライ前の待機時間の下限。
pub const DEFAULT_MIN_OFFSET: Duration = Duration::from_millis(400);
/// ジッター加算前の待機時間の上限。
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(12);
/// ジッターの最大値（この値未満）。
pub const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(800);

/// BackoffPolicy は試行番号から待機時間を求める指数バックオフ。
///
/// `compute_delay(n) = min(min_offset * 2^n, max_backoff) + jitter`
/// で、jitter は `[0, max_jitter)` の一様乱数。試行番号は 0 始まりで、
/// `compute_delay(0)` は 1 回目の失敗の後、最初のリトライ前に待つ時間。
#[derive(Clone)]
pub struct BackoffPolicy {
    min_offset: Duration,
    max_backoff: Duration,
    max_jitter: Duration,
    jitter: Arc<dyn JitterSource>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            min_offset: DEFAULT_MIN_OFFSET,
            max_backoff: DEFAULT_MAX_BACKOFF,
            max_jitter: DEFAULT_MAX_JITTER,
            jitter: Arc::new(ThreadRngJitter),
        }
    }
}

impl fmt::Debug for BackoffPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackoffPolicy")
            .field("min_offset", &self.min_offset)
            .field("max_backoff", &self.max_backoff)
            .field("max_jitter", &self.max_jitter)
            .finish_non_exhaustive()
    }
}

impl BackoffPolicy {
    pub fn new(min_offset: Duration, max_backoff: Duration, max_jitter: Duration) -> Self {
        Self {
            min_offset,
            max_backoff,
            max_jitter,
            ..Default::default()
        }
    }

    pub fn with_min_offset(mut self, offset: Duration) -> Self {
        self.min_offset = offset;
        self
    }

    pub fn with_max_backoff(mut self, cap: Duration) -> Self {
        self.max_backoff = cap;
        self
    }

    pub fn with_max_jitter(mut self, jitter: Duration) -> Self {
        self.max_jitter = jitter;
        self
    }

    /// ジッターの乱数源を差し替える（テストではシード固定のものを渡す）。
    pub fn with_jitter_source(mut self, source: Arc<dyn JitterSource>) -> Self {
        self.jitter = source;
        self
    }

    pub fn min_offset(&self) -> Duration {
        self.min_offset
    }

    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    pub fn max_jitter(&self) -> Duration {
        self.max_jitter
    }

    /// ジッターを含まない待機時間 `min(min_offset * 2^attempt, max_backoff)` を返す。
    /// 乗算がオーバーフローする場合は上限に達したものとみなす。
    pub fn capped_base(&self, attempt: u32) -> Duration {
        let base = 2u32
            .checked_pow(attempt)
            .and_then(|factor| self.min_offset.checked_mul(factor));
        match base {
            Some(b) if b < self.max_backoff => b,
            _ => self.max_backoff,
        }
    }

    /// attempt 回目のリトライ前に待つ時間を返す。
    pub fn compute_delay(&self, attempt: u32) -> Duration {
        self.capped_base(attempt) + self.jitter.jitter(self.max_jitter)
    }
}
