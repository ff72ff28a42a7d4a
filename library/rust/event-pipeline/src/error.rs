/// PipelineError はイベントの受信・処理・発行に関するエラーを表す。
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// ブローカーからの読み取りに失敗した（到達不能・タイムアウト等）。
    #[error("read error: {0}")]
    ReadError(String),

    /// メッセージ本文をエンベロープとしてデコードできなかった。
    #[error("decode error: {0}")]
    DecodeError(String),

    /// ハンドラーがリトライ上限まで失敗し続けた。
    #[error("processing of event {event_id} failed after {attempts} attempts: {last_error}")]
    Exhausted {
        event_id: String,
        attempts: u32,
        last_error: String,
    },

    /// デコードまたはハンドラー実行中に panic が発生した。
    #[error("fault while consuming event: {0}")]
    Fault(String),

    #[error("commit error: {0}")]
    CommitError(String),

    /// 発行ペイロードのシリアライズに失敗した（送信は行われない）。
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// ブローカーへの書き込みが失敗した。
    #[error("publish error: {0}")]
    PublishError(String),

    /// close 済みのクライアントを使用した。
    #[error("client already closed: {0}")]
    Closed(String),

    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("configuration error: {0}")]
    ConfigurationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_error_display() {
        let err = PipelineError::PublishError("kafka broker unreachable".to_string());
        assert!(err.to_string().contains("kafka broker unreachable"));
    }

    #[test]
    fn test_exhausted_display_carries_event_id() {
        let err = PipelineError::Exhausted {
            event_id: "0f8fad5b-d9cb-469f-a165-70867728950e".to_string(),
            attempts: 4,
            last_error: "db down".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("0f8fad5b-d9cb-469f-a165-70867728950e"));
        assert!(msg.contains("4 attempts"));
        assert!(msg.contains("db down"));
    }
}
