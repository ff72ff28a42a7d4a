use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PipelineError;

/// Event はブローカーから受信した 1 メッセージをデコードしたエンベロープ。
///
/// ワイヤ形式は JSON オブジェクト `{id, party_id, type, publisher, payload}`。
/// 欠落したフィールドはゼロ値（nil UUID・空文字列・null）として扱う。
/// デコード後は不変で、ハンドラーには共有参照でのみ渡される。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Event {
    /// イベント ID（イベントごとに一意）
    pub id: Uuid,
    /// イベントに紐づくテナント・所有者の ID
    pub party_id: Uuid,
    /// ハンドラーが解釈に使う種別（例: "order.created"）
    #[serde(rename = "type")]
    pub event_type: String,
    /// 発行元サービス名
    pub publisher: String,
    /// 任意の構造化データ
    pub payload: serde_json::Value,
}

impl Event {
    /// 新しい ID を採番して Event を生成する。
    pub fn new(
        party_id: Uuid,
        event_type: impl Into<String>,
        publisher: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            party_id,
            event_type: event_type.into(),
            publisher: publisher.into(),
            payload,
        }
    }

    /// JSON バイト列から Event をデコードする。本文が `null` の場合はゼロ値の Event になる。
    pub fn decode(bytes: &[u8]) -> Result<Self, PipelineError> {
        serde_json::from_slice::<Option<Self>>(bytes)
            .map(Option::unwrap_or_default)
            .map_err(|e| PipelineError::DecodeError(e.to_string()))
    }
}

/// decode_raw はメッセージ本文を型なしのキー・バリューマップとしてデコードする。
/// 本文が `null` の場合は空のマップになる。
pub fn decode_raw(
    bytes: &[u8],
) -> Result<serde_json::Map<String, serde_json::Value>, PipelineError> {
    serde_json::from_slice::<Option<serde_json::Map<String, serde_json::Value>>>(bytes)
        .map(Option::unwrap_or_default)
        .map_err(|e| PipelineError::DecodeError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_full_envelope() {
        let bytes = br#"{
            "id": "0f8fad5b-d9cb-469f-a165-70867728950e",
            "party_id": "7c9e6679-7425-40de-944b-e07fc1f90ae7",
            "type": "order.created",
            "publisher": "order-server",
            "payload": {"order_id": 42, "items": ["a", "b"]}
        }"#;
        let event = Event::decode(bytes).unwrap();
        assert_eq!(
            event.id.to_string(),
            "0f8fad5b-d9cb-469f-a165-70867728950e"
        );
        assert_eq!(event.event_type, "order.created");
        assert_eq!(event.publisher, "order-server");
        assert_eq!(event.payload["order_id"], 42);
    }

    #[test]
    fn test_decode_missing_fields_default_to_zero_values() {
        let event = Event::decode(br#"{"type": "ping"}"#).unwrap();
        assert!(event.id.is_nil());
        assert!(event.party_id.is_nil());
        assert_eq!(event.event_type, "ping");
        assert!(event.payload.is_null());
    }

    #[test]
    fn test_decode_null_body_yields_zero_value_event() {
        assert_eq!(Event::decode(b"null").unwrap(), Event::default());
        assert_eq!(Event::decode(b" null\n").unwrap(), Event::default());
    }

    #[test]
    fn test_decode_raw_null_body_yields_empty_map() {
        assert!(decode_raw(b"null").unwrap().is_empty());
    }

    #[test]
    fn test_decode_malformed_json() {
        let err = Event::decode(b"{not json").unwrap_err();
        assert!(matches!(err, PipelineError::DecodeError(_)));
    }

    #[test]
    fn test_decode_invalid_uuid() {
        let err = Event::decode(br#"{"id": "not-a-uuid"}"#).unwrap_err();
        assert!(matches!(err, PipelineError::DecodeError(_)));
    }

    #[test]
    fn test_serialize_uses_wire_field_names() {
        let event = Event::new(Uuid::nil(), "user.login", "auth-server", serde_json::json!({}));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "user.login");
        assert!(value.get("party_id").is_some());
        assert!(value.get("event_type").is_none());
    }

    #[test]
    fn test_decode_raw_object() {
        let map = decode_raw(br#"{"user_id": "user-1", "count": 3}"#).unwrap();
        assert_eq!(map["user_id"], "user-1");
        assert_eq!(map["count"], 3);
    }

    #[test]
    fn test_decode_raw_rejects_non_object() {
        let err = decode_raw(b"[1, 2, 3]").unwrap_err();
        assert!(matches!(err, PipelineError::DecodeError(_)));
    }
}
