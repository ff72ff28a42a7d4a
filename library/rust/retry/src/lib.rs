//! k1s0-retry: 指数バックオフ + ジッター付きリトライライブラリ。
//!
//! 失敗した操作を最大リトライ回数まで再実行し、試行ごとの待機時間を
//! `floor * 2^attempt`（上限あり）にランダムなジッターを加えて決定する。

pub mod error;
pub mod jitter;
pub mod policy;
pub mod retry;

pub use error::RetryError;
pub use jitter::{FixedJitter, JitterSource, SeededJitter, ThreadRngJitter};
pub use policy::BackoffPolicy;
pub use retry::{with_retry, Succeeded};
