use k1s0_retry::{with_retry, BackoffPolicy};

use crate::handler::{DecodedMessage, HandlerBinding, MessageContext};

/// DispatchOutcome は 1 メッセージをハンドラーに渡した最終結果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// attempts 回目の呼び出しで成功した。
    Succeeded { attempts: u32 },
    /// max_retry + 1 回呼び出しても失敗し続けた。
    Exhausted { attempts: u32, last_error: String },
}

/// dispatch_with_retry はメッセージをハンドラーに渡し、失敗時はバックオフを挟んで
/// 最大 max_retry 回まで再実行する。
///
/// バックオフ中はこのメッセージの処理だけが止まり、次の読み取りは結果が確定してから行われる。
pub async fn dispatch_with_retry(
    binding: &HandlerBinding,
    ctx: &MessageContext,
    message: &DecodedMessage,
    policy: &BackoffPolicy,
    max_retry: u32,
) -> DispatchOutcome {
    match with_retry(policy, max_retry, move |_| binding.invoke(ctx, message)).await {
        Ok(succeeded) => DispatchOutcome::Succeeded {
            attempts: succeeded.attempts,
        },
        Err(e) => {
            let attempts = e.attempts();
            DispatchOutcome::Exhausted {
                attempts,
                last_error: format!("{:#}", e.into_last_error()),
            }
        }
    }
}
