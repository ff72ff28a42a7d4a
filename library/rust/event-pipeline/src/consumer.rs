use std::sync::Arc;

use k1s0_retry::BackoffPolicy;
use tokio_util::sync::CancellationToken;

use crate::config::ConsumerConfig;
use crate::dispatch::{dispatch_with_retry, DispatchOutcome};
use crate::error::PipelineError;
use crate::fault;
use crate::handler::{HandlerBinding, MessageContext};
use crate::sink::{MessageSink, OutboundRecord};
use crate::source::{ConsumedMessage, MessageSource};

/// デッドレターに付与する元メッセージの由来ヘッダー。
pub const HEADER_ORIGINAL_TOPIC: &str = "x-original-topic";
pub const HEADER_ORIGINAL_PARTITION: &str = "x-original-partition";
pub const HEADER_ORIGINAL_OFFSET: &str = "x-original-offset";
pub const HEADER_DEAD_LETTER_REASON: &str = "x-dead-letter-reason";
pub const HEADER_ERROR: &str = "x-error";

/// IterationOutcome はコンシューマーループ 1 回分の結果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationOutcome {
    /// ハンドラーが attempts 回目の呼び出しで成功した。
    Handled { attempts: u32 },
    /// リトライ上限まで失敗した。メッセージは再キューされない。
    Exhausted { attempts: u32 },
    /// デコードできなかったため破棄した。
    Dropped,
    /// 読み取りに失敗した。次の反復で再度読み取る。
    ReadFailed,
    /// デコードまたはハンドラー実行中に panic が発生した。
    Faulted,
    /// 停止要求を受けた。
    Cancelled,
}

/// EventConsumer は 1 つの購読からメッセージを 1 件ずつ読み取り、
/// 登録されたハンドラーにリトライ付きで渡してからオフセットをコミットする。
///
/// メッセージは常に 1 件ずつ逐次処理されるため、パーティション内の順序は保たれる。
/// コミットは処理が確定した後（成功・リトライ上限到達・デコード失敗・panic）に行う。
pub struct EventConsumer {
    source: Arc<dyn MessageSource>,
    handler: Option<HandlerBinding>,
    backoff: BackoffPolicy,
    max_retry: u32,
    dead_letter: Option<Arc<dyn MessageSink>>,
}

impl EventConsumer {
    pub fn new(source: Arc<dyn MessageSource>, backoff: BackoffPolicy, max_retry: u32) -> Self {
        Self {
            source,
            handler: None,
            backoff,
            max_retry,
            dead_letter: None,
        }
    }

    /// ConsumerConfig のリトライ・バックオフ設定で EventConsumer を生成する。
    pub fn from_config(config: &ConsumerConfig, source: Arc<dyn MessageSource>) -> Self {
        Self::new(source, config.backoff_policy(), config.max_retry)
    }

    /// デコード不能・リトライ上限到達・panic したメッセージの転送先を設定する。
    /// 転送時は元のキーを保ち、由来（トピック・パーティション・オフセット・理由）をヘッダーに付ける。
    pub fn with_dead_letter(mut self, sink: Arc<dyn MessageSink>) -> Self {
        self.dead_letter = Some(sink);
        self
    }

    /// ハンドラーを登録する。start より前に呼ぶこと。再登録すると置き換わる。
    pub fn register_handler(&mut self, handler: HandlerBinding) {
        tracing::info!(handler = handler.name(), "event handler registered");
        self.handler = Some(handler);
    }

    /// cancel が発火するまでメッセージの消費を続ける。
    ///
    /// 個々の反復で発生したエラーはログに記録して吸収するため、
    /// ハンドラー未登録の場合を除き、停止要求以外で戻ることはない。
    pub async fn start(&self, cancel: CancellationToken) -> Result<(), PipelineError> {
        let handler = self.registered_handler()?;
        tracing::info!(handler = handler.name(), "event consumer started");

        while self.iterate(handler, &cancel).await != IterationOutcome::Cancelled {}

        tracing::info!(handler = handler.name(), "event consumer stopped");
        Ok(())
    }

    /// 1 メッセージ分の読み取り・処理・コミットを行う。
    pub async fn consume_once(
        &self,
        cancel: &CancellationToken,
    ) -> Result<IterationOutcome, PipelineError> {
        let handler = self.registered_handler()?;
        Ok(self.iterate(handler, cancel).await)
    }

    /// 読み取り側の接続を解放する。
    pub async fn close(&self) -> Result<(), PipelineError> {
        self.source.close().await
    }

    fn registered_handler(&self) -> Result<&HandlerBinding, PipelineError> {
        self.handler.as_ref().ok_or_else(|| {
            PipelineError::ConfigurationError("no event handler registered".to_string())
        })
    }

    async fn iterate(&self, handler: &HandlerBinding, cancel: &CancellationToken) -> IterationOutcome {
        // 停止要求後は新しい読み取りを開始しない
        if cancel.is_cancelled() {
            return IterationOutcome::Cancelled;
        }
        let message = tokio::select! {
            biased;
            () = cancel.cancelled() => return IterationOutcome::Cancelled,
            received = self.source.receive() => match received {
                Ok(message) => message,
                Err(e) => {
                    tracing::error!(error = %e, "error while reading message");
                    return IterationOutcome::ReadFailed;
                }
            },
        };

        let outcome = match fault::isolate(self.process(handler, &message, cancel)).await {
            Ok(outcome) => outcome,
            Err(fault) => {
                tracing::error!(
                    error = %fault.message,
                    stacktrace = %fault.stacktrace,
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    "error while consuming event"
                );
                self.forward_to_dead_letter(&message, "faulted", &fault.message).await;
                IterationOutcome::Faulted
            }
        };

        if let Err(e) = self.source.commit(&message).await {
            tracing::error!(
                error = %e,
                topic = %message.topic,
                partition = message.partition,
                offset = message.offset,
                "error while committing offset"
            );
        }

        outcome
    }

    async fn process(
        &self,
        handler: &HandlerBinding,
        message: &ConsumedMessage,
        cancel: &CancellationToken,
    ) -> IterationOutcome {
        let decoded = match handler.decode(&message.payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    event = %String::from_utf8_lossy(&message.payload),
                    offset = message.offset,
                    "error while unmarshalling event"
                );
                self.forward_to_dead_letter(message, "decode_failed", &e.to_string()).await;
                return IterationOutcome::Dropped;
            }
        };

        let ctx = MessageContext::from_message(message, cancel.clone());
        match dispatch_with_retry(handler, &ctx, &decoded, &self.backoff, self.max_retry).await {
            DispatchOutcome::Succeeded { attempts } => {
                if attempts > 1 {
                    tracing::info!(event_id = %decoded.id(), attempts, "event processed after retry");
                }
                IterationOutcome::Handled { attempts }
            }
            DispatchOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                let err = PipelineError::Exhausted {
                    event_id: decoded.id(),
                    attempts,
                    last_error,
                };
                tracing::error!(
                    event_id = %decoded.id(),
                    handler = handler.name(),
                    error = %err,
                    "processing of event failed"
                );
                self.forward_to_dead_letter(message, "retry_exhausted", &err.to_string()).await;
                IterationOutcome::Exhausted { attempts }
            }
        }
    }

    async fn forward_to_dead_letter(&self, message: &ConsumedMessage, reason: &str, error: &str) {
        let Some(sink) = &self.dead_letter else {
            return;
        };
        let record = OutboundRecord::new(message.payload.clone())
            .with_key(message.key.clone())
            .with_header(HEADER_ORIGINAL_TOPIC, message.topic.as_str())
            .with_header(HEADER_ORIGINAL_PARTITION, message.partition.to_string())
            .with_header(HEADER_ORIGINAL_OFFSET, message.offset.to_string())
            .with_header(HEADER_DEAD_LETTER_REASON, reason)
            .with_header(HEADER_ERROR, error);
        match sink.send_record(record).await {
            Ok(()) => tracing::info!(
                topic = %message.topic,
                offset = message.offset,
                reason,
                "message forwarded to dead letter topic"
            ),
            Err(e) => tracing::error!(
                error = %e,
                topic = %message.topic,
                offset = message.offset,
                "failed to forward message to dead letter topic"
            ),
        }
    }
}
