use crate::error::PipelineError;

/// ConsumedMessage はブローカーから読み取った生のメッセージを表す。
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumedMessage {
    /// トピック名
    pub topic: String,
    /// パーティション番号
    pub partition: i32,
    /// オフセット
    pub offset: i64,
    /// メッセージキー
    pub key: Option<Vec<u8>>,
    /// メッセージペイロード
    pub payload: Vec<u8>,
}

impl ConsumedMessage {
    pub fn new(
        topic: impl Into<String>,
        partition: i32,
        offset: i64,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            key: None,
            payload: payload.into(),
        }
    }
}

/// MessageSource はブローカーの読み取り側の抽象。
///
/// receive はキャンセル安全でなければならない（`tokio::select!` で
/// 中断されてもメッセージを失わないこと）。
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait::async_trait]
pub trait MessageSource: Send + Sync {
    /// 次のメッセージを受信するまで待機する。
    async fn receive(&self) -> Result<ConsumedMessage, PipelineError>;

    /// メッセージの処理が完了したことを記録し、読み取り位置を進める。
    async fn commit(&self, message: &ConsumedMessage) -> Result<(), PipelineError>;

    /// 読み取り側の接続を解放する。
    async fn close(&self) -> Result<(), PipelineError>;
}

#[cfg(any(test, feature = "testing"))]
pub use in_memory::InMemoryMessageSource;

#[cfg(any(test, feature = "testing"))]
mod in_memory {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use tokio::sync::Notify;

    use super::{ConsumedMessage, MessageSource};
    use crate::error::PipelineError;

    /// InMemoryMessageSource はテスト用のキューベースの MessageSource。
    /// キューが空の間 receive は次の push まで待機する。
    #[derive(Default)]
    pub struct InMemoryMessageSource {
        queue: Mutex<VecDeque<Result<ConsumedMessage, PipelineError>>>,
        notify: Notify,
        committed: Mutex<Vec<ConsumedMessage>>,
        closed: AtomicBool,
        next_offset: Mutex<i64>,
    }

    impl InMemoryMessageSource {
        pub fn new() -> Self {
            Self::default()
        }

        /// メッセージをキューに積む。
        pub fn push(&self, message: ConsumedMessage) {
            self.enqueue(Ok(message));
        }

        /// ペイロードから連番オフセットのメッセージを作ってキューに積み、そのオフセットを返す。
        pub fn push_payload(&self, topic: &str, payload: impl Into<Vec<u8>>) -> i64 {
            let offset = {
                let mut next = lock(&self.next_offset);
                let offset = *next;
                *next += 1;
                offset
            };
            self.push(ConsumedMessage::new(topic, 0, offset, payload));
            offset
        }

        /// 読み取りエラーをキューに積む。
        pub fn push_error(&self, err: PipelineError) {
            self.enqueue(Err(err));
        }

        /// コミット済みメッセージのオフセットをコミット順に返す。
        pub fn committed_offsets(&self) -> Vec<i64> {
            lock(&self.committed).iter().map(|m| m.offset).collect()
        }

        pub fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }

        fn enqueue(&self, item: Result<ConsumedMessage, PipelineError>) {
            lock(&self.queue).push_back(item);
            self.notify.notify_one();
        }
    }

    fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
        match m.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    #[async_trait::async_trait]
    impl MessageSource for InMemoryMessageSource {
        async fn receive(&self) -> Result<ConsumedMessage, PipelineError> {
            loop {
                let next = lock(&self.queue).pop_front();
                if let Some(item) = next {
                    return item;
                }
                self.notify.notified().await;
            }
        }

        async fn commit(&self, message: &ConsumedMessage) -> Result<(), PipelineError> {
            lock(&self.committed).push(message.clone());
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
    use std::time::Duration;

    #[tokio::test]
    async fn test_in_memory_source_preserves_order() {
        let source = InMemoryMessageSource::new();
        source.push_payload("k1s0.test.v1", b"m1".to_vec());
        source.push_payload("k1s0.test.v1", b"m2".to_vec());

        let first = source.receive().await.unwrap();
        let second = source.receive().await.unwrap();
        assert_eq!(first.payload, b"m1");
        assert_eq!(first.offset, 0);
        assert_eq!(second.payload, b"m2");
        assert_eq!(second.offset, 1);
    }

    #[tokio::test]
    async fn test_in_memory_source_waits_for_push() {
        let source = std::sync::Arc::new(InMemoryMessageSource::new());
        let s = source.clone();
        let reader = tokio::spawn(async move { s.receive().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        source.push(ConsumedMessage::new("k1s0.test.v1", 2, 7, b"late".to_vec()));

        let msg = reader.await.unwrap().unwrap();
        assert_eq!(msg.partition, 2);
        assert_eq!(msg.offset, 7);
    }

    #[tokio::test]
    async fn test_in_memory_source_records_commits() {
        let source = InMemoryMessageSource::new();
        let msg = ConsumedMessage::new("k1s0.test.v1", 0, 3, b"x".to_vec());
        source.commit(&msg).await.unwrap();
        assert_eq!(source.committed_offsets(), vec![3]);
        source.close().await.unwrap();
        assert!(source.is_closed());
    }
}
