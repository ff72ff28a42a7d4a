use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use serde::Serialize;
use tokio::sync::oneshot;

use crate::error::PipelineError;
use crate::sink::MessageSink;

/// EventProducer はペイロードを JSON にエンコードして 1 件ずつ発行する。
///
/// 書き込みは別タスクで実行され、呼び出し側はワンショットチャネルで完了を待つ。
/// ブローカーへの再送はブローカークライアント側の試行回数に委ね、ここでは行わない。
pub struct EventProducer {
    sink: Arc<dyn MessageSink>,
    topic: String,
    closed: AtomicBool,
}

impl EventProducer {
    pub fn new(topic: impl Into<String>, sink: Arc<dyn MessageSink>) -> Self {
        Self {
            sink,
            topic: topic.into(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// ペイロードをエンコードして書き込みタスクを起動し、完了を待つハンドルを返す。
    ///
    /// エンコードに失敗した場合は送信を行わずに即座にエラーを返す。
    pub fn publish_async<T>(&self, payload: &T) -> Result<PublishHandle, PipelineError>
    where
        T: Serialize + ?Sized,
    {
        if self.is_closed() {
            return Err(PipelineError::Closed(format!("producer for {}", self.topic)));
        }

        let bytes = serde_json::to_vec(payload)
            .map_err(|e| PipelineError::SerializationError(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        let sink = Arc::clone(&self.sink);
        let topic = self.topic.clone();
        tokio::spawn(async move {
            let result = sink.send(bytes).await;
            if let Err(e) = &result {
                tracing::error!(topic = %topic, error = %e, "failed to publish event");
            }
            // 受信側が先にドロップされていても送信結果は既にログに残っている
            let _ = tx.send(result);
        });

        Ok(PublishHandle { rx })
    }

    /// ペイロードを発行し、ブローカーへの書き込みが完了するまで待つ。
    pub async fn publish<T>(&self, payload: &T) -> Result<(), PipelineError>
    where
        T: Serialize + ?Sized,
    {
        self.publish_async(payload)?.await
    }

    /// 書き込み側の接続を解放する。2 回目以降の呼び出しはエラーを返す。
    pub async fn close(&self) -> Result<(), PipelineError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(PipelineError::Closed(format!("producer for {}", self.topic)));
        }
        tracing::info!(topic = %self.topic, "event producer closing");
        self.sink.close().await
    }
}

/// PublishHandle は起動済みの書き込みの完了を表す Future。
#[derive(Debug)]
#[must_use = "the write has already been started; await the handle to observe its result"]
pub struct PublishHandle {
    rx: oneshot::Receiver<Result<(), PipelineError>>,
}

impl Future for PublishHandle {
    type Output = Result<(), PipelineError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| {
            received.unwrap_or_else(|_| {
                Err(PipelineError::PublishError(
                    "publish task ended without reporting a result".to_string(),
                ))
            })
        })
    }
}
