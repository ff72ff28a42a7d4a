use async_trait::async_trait;

use crate::error::PipelineError;

/// OutboundRecord はキー・ヘッダー付きで書き込む 1 メッセージ。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundRecord {
    /// メッセージキー（None の場合はキーなし）
    pub key: Option<Vec<u8>>,
    /// メッセージペイロード
    pub payload: Vec<u8>,
    /// メッセージヘッダー（書き込み順）
    pub headers: Vec<(String, String)>,
}

impl OutboundRecord {
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            payload,
            ..Self::default()
        }
    }

    pub fn with_key(mut self, key: Option<Vec<u8>>) -> Self {
        self.key = key;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// 指定した名前のヘッダー値を返す。
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// MessageSink はブローカーの書き込み側の抽象。
///
/// 1 回の send は 1 メッセージを 1 回の物理送信で書き込み（バッチングなし）、
/// ブローカークライアント自身のリトライを使い切った後の最終結果を返す。
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// エンコード済みのペイロードを 1 件書き込む。
    async fn send(&self, payload: Vec<u8>) -> Result<(), PipelineError>;

    /// キーとヘッダーを保ったまま 1 件書き込む。既定ではペイロードのみを send する。
    async fn send_record(&self, record: OutboundRecord) -> Result<(), PipelineError> {
        self.send(record.payload).await
    }

    /// 書き込み側の接続を解放する（未送信分はフラッシュする）。
    async fn close(&self) -> Result<(), PipelineError>;
}

#[cfg(any(test, feature = "testing"))]
pub use in_memory::InMemoryMessageSink;

#[cfg(any(test, feature = "testing"))]
mod in_memory {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::{MessageSink, OutboundRecord};
    use crate::error::PipelineError;

    /// InMemoryMessageSink はテスト・スタブ用に送信内容をメモリに保持する実装。
    #[derive(Default)]
    pub struct InMemoryMessageSink {
        sent: Mutex<Vec<OutboundRecord>>,
        closed: AtomicBool,
    }

    impl InMemoryMessageSink {
        pub fn new() -> Self {
            Self::default()
        }

        /// 送信されたペイロードを送信順に返す。
        pub fn sent(&self) -> Vec<Vec<u8>> {
            self.records().into_iter().map(|r| r.payload).collect()
        }

        /// 送信されたメッセージをキー・ヘッダーごと送信順に返す。
        pub fn records(&self) -> Vec<OutboundRecord> {
            match self.sent.lock() {
                Ok(guard) => guard.clone(),
                Err(poisoned) => poisoned.into_inner().clone(),
            }
        }

        fn push(&self, record: OutboundRecord) {
            match self.sent.lock() {
                Ok(mut guard) => guard.push(record),
                Err(poisoned) => poisoned.into_inner().push(record),
            }
        }

        pub fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MessageSink for InMemoryMessageSink {
        async fn send(&self, payload: Vec<u8>) -> Result<(), PipelineError> {
            self.push(OutboundRecord::new(payload));
            Ok(())
        }

        async fn send_record(&self, record: OutboundRecord) -> Result<(), PipelineError> {
            self.push(record);
            Ok(())
        }

        async fn close(&self) -> Result<(), PipelineError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_sink_records_payloads() {
        let sink = InMemoryMessageSink::new();
        sink.send(b"payload 1".to_vec()).await.unwrap();
        sink.send(b"payload 2".to_vec()).await.unwrap();
        assert_eq!(sink.sent(), vec![b"payload 1".to_vec(), b"payload 2".to_vec()]);
    }

    #[tokio::test]
    async fn test_in_memory_sink_keeps_key_and_headers() {
        let sink = InMemoryMessageSink::new();
        let record = OutboundRecord::new(b"body".to_vec())
            .with_key(Some(b"order-1".to_vec()))
            .with_header("origin", "billing");
        sink.send_record(record.clone()).await.unwrap();
        assert_eq!(sink.records(), vec![record]);
        assert_eq!(sink.records()[0].header("origin"), Some("billing"));
        assert_eq!(sink.records()[0].header("missing"), None);
    }

    /// PayloadOnlySink は send_record を実装しないシンク。
    #[derive(Default)]
    struct PayloadOnlySink {
        sent: std::sync::Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl MessageSink for PayloadOnlySink {
        async fn send(&self, payload: Vec<u8>) -> Result<(), PipelineError> {
            self.sent.lock().unwrap().push(payload);
            Ok(())
        }

        async fn close(&self) -> Result<(), PipelineError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_default_send_record_forwards_payload() {
        let sink = PayloadOnlySink::default();
        let record = OutboundRecord::new(b"body".to_vec()).with_header("origin", "billing");
        sink.send_record(record).await.unwrap();
        assert_eq!(*sink.sent.lock().unwrap(), vec![b"body".to_vec()]);
    }

    #[tokio::test]
    async fn test_mock_sink_error() {
        let mut mock = MockMessageSink::new();
        mock.expect_send()
            .returning(|_| Err(PipelineError::PublishError("broker unavailable".to_string())));

        let result = mock.send(b"{}".to_vec()).await;
        assert!(matches!(result, Err(PipelineError::PublishError(_))));
    }
}
