use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::envelope::{decode_raw, Event};
use crate::error::PipelineError;
use crate::source::ConsumedMessage;

/// MessageContext はハンドラーに渡される、処理中メッセージの付帯情報。
#[derive(Debug, Clone)]
pub struct MessageContext {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    /// コンシューマーループの停止要求。長時間の処理はこれを監視して早期終了してよい。
    pub cancellation: CancellationToken,
}

impl MessageContext {
    pub fn from_message(message: &ConsumedMessage, cancellation: CancellationToken) -> Self {
        Self {
            topic: message.topic.clone(),
            partition: message.partition,
            offset: message.offset,
            key: message.key.clone(),
            cancellation,
        }
    }
}

/// EventHandler はデコード済みの Event を処理する。
///
/// 同一イベントはプロセス再起動をまたいで再配信されうるため、
/// 実装は冪等でなければならない。
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// 診断・登録用の名前。
    fn name(&self) -> &str;

    async fn handle(&self, ctx: &MessageContext, event: &Event) -> anyhow::Result<()>;
}

/// RawEventHandler はメッセージ本文を型なしの JSON オブジェクトとして処理する。
#[async_trait]
pub trait RawEventHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(
        &self,
        ctx: &MessageContext,
        body: &serde_json::Map<String, serde_json::Value>,
    ) -> anyhow::Result<()>;
}

/// DecodedMessage はハンドラーの種類に応じてデコードされたメッセージ本文。
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedMessage {
    Event(Event),
    Raw(serde_json::Map<String, serde_json::Value>),
}

impl DecodedMessage {
    /// ログ用の識別子。Raw の場合は "id" キーがあればその値を使う。
    pub fn id(&self) -> String {
        match self {
            Self::Event(event) => event.id.to_string(),
            Self::Raw(map) => match map.get("id") {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            },
        }
    }
}

/// HandlerBinding はコンシューマーに登録される処理能力。
/// 登録時にどちらのデコード形式を使うかが決まる。
#[derive(Clone)]
pub enum HandlerBinding {
    Typed(Arc<dyn EventHandler>),
    Raw(Arc<dyn RawEventHandler>),
}

impl std::fmt::Debug for HandlerBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Typed(h) => f.debug_tuple("Typed").field(&h.name()).finish(),
            Self::Raw(h) => f.debug_tuple("Raw").field(&h.name()).finish(),
        }
    }
}

impl HandlerBinding {
    pub fn typed(handler: impl EventHandler + 'static) -> Self {
        Self::Typed(Arc::new(handler))
    }

    pub fn raw(handler: impl RawEventHandler + 'static) -> Self {
        Self::Raw(Arc::new(handler))
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Typed(h) => h.name(),
            Self::Raw(h) => h.name(),
        }
    }

    /// バインディングの種類に合わせてメッセージ本文をデコードする。
    pub fn decode(&self, payload: &[u8]) -> Result<DecodedMessage, PipelineError> {
        match self {
            Self::Typed(_) => Event::decode(payload).map(DecodedMessage::Event),
            Self::Raw(_) => decode_raw(payload).map(DecodedMessage::Raw),
        }
    }

    /// デコード済みメッセージをハンドラーに 1 回渡す。
    pub async fn invoke(&self, ctx: &MessageContext, message: &DecodedMessage) -> anyhow::Result<()> {
        match (self, message) {
            (Self::Typed(h), DecodedMessage::Event(event)) => h.handle(ctx, event).await,
            (Self::Raw(h), DecodedMessage::Raw(body)) => h.handle(ctx, body).await,
            (binding, _) => Err(anyhow::anyhow!(
                "handler {} cannot process this message kind",
                binding.name()
            )),
        }
    }
}
