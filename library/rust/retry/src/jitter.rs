use std::sync::Mutex;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// JitterSource はバックオフに加算するランダムな待機時間を供給する。
///
/// 戻り値は `[0, max)` の範囲（ミリ秒単位）でなければならない。
/// `max` が 1ms 未満の場合は常に `Duration::ZERO` を返す。
pub trait JitterSource: Send + Sync {
    fn jitter(&self, max: Duration) -> Duration;
}

fn max_millis(max: Duration) -> u64 {
    u64::try_from(max.as_millis()).unwrap_or(u64::MAX)
}

/// ThreadRngJitter はスレッドローカルな乱数生成器を使う既定のジッター。
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRngJitter;

impl JitterSource for ThreadRngJitter {
    fn jitter(&self, max: Duration) -> Duration {
        let ms = max_millis(max);
        if ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..ms))
    }
}

/// SeededJitter はシードを固定した乱数生成器を使うジッター。
/// 同じシードからは同じ系列が得られるため、テストで使用する。
#[derive(Debug)]
pub struct SeededJitter {
    rng: Mutex<StdRng>,
}

impl SeededJitter {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl JitterSource for SeededJitter {
    fn jitter(&self, max: Duration) -> Duration {
        let ms = max_millis(max);
        if ms == 0 {
            return Duration::ZERO;
        }
        // ロック獲得に失敗した（poison された）場合も乱数状態はそのまま使える
        let mut rng = match self.rng.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Duration::from_millis(rng.gen_range(0..ms))
    }
}

/// FixedJitter は常に同じ値を返すジッター。`max` を超える場合は `max` 未満に丸める。
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter(pub Duration);

impl FixedJitter {
    pub const ZERO: Self = Self(Duration::ZERO);
}

impl JitterSource for FixedJitter {
    fn jitter(&self, max: Duration) -> Duration {
        let ms = max_millis(max);
        if ms == 0 {
            return Duration::ZERO;
        }
        self.0.min(Duration::from_millis(ms - 1))
    }
}
