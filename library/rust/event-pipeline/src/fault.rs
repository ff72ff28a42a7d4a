//! 1 メッセージ分の処理を panic から隔離する境界。

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::future::Future;
use std::panic::{AssertUnwindSafe, PanicHookInfo};
use std::sync::Once;

use futures::FutureExt;

use crate::error::PipelineError;

/// Fault は隔離境界で捕捉した panic の内容。
#[derive(Debug)]
pub struct Fault {
    /// panic のペイロードを文字列化したもの
    pub message: String,
    /// panic 発生地点で取得したスタックトレース
    pub stacktrace: String,
}

impl From<Fault> for PipelineError {
    fn from(fault: Fault) -> Self {
        PipelineError::Fault(fault.message)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

static HOOK: Once = Once::new();

thread_local! {
    // 巻き戻し前に panic したスレッド上で記録したトレース
    static LAST_PANIC_TRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// 既存の panic hook を保持したまま、panic 地点のトレースを記録する hook を一度だけ追加する。
fn install_trace_hook() {
    HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info: &PanicHookInfo<'_>| {
            record_panic_trace(info);
            previous(info);
        }));
    });
}

fn record_panic_trace(info: &PanicHookInfo<'_>) {
    let location = info
        .location()
        .map_or_else(|| "unknown location".to_string(), ToString::to_string);
    let trace = format!("panicked at {location}\n{}", Backtrace::force_capture());
    // スレッド終了処理中は記録できないため捨てる
    let _ = LAST_PANIC_TRACE.try_with(|slot| *slot.borrow_mut() = Some(trace));
}

fn take_panic_trace() -> String {
    LAST_PANIC_TRACE
        .with(|slot| slot.borrow_mut().take())
        .unwrap_or_else(|| Backtrace::force_capture().to_string())
}

/// isolate は future を実行し、その中で発生した panic を Fault に変換して返す。
/// panic は呼び出し元には伝播しない。
///
/// スタックトレースは panic hook が巻き戻し前に取得したものを使うため、
/// panic したフレームまで含まれる。
pub async fn isolate<F, T>(fut: F) -> Result<T, Fault>
where
    F: Future<Output = T>,
{
    install_trace_hook();
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(value) => Ok(value),
        Err(payload) => Err(Fault {
            message: panic_message(payload.as_ref()),
            stacktrace: take_panic_trace(),
        }),
    }
}
