//! KafkaMessageSource: rdkafka を使用した MessageSource 実装。
//! feature = "kafka" で有効化される。

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::{Offset, TopicPartitionList};
use secrecy::ExposeSecret;

use crate::config::ConsumerConfig;
use crate::error::PipelineError;
use crate::source::{ConsumedMessage, MessageSource};

/// librdkafka の message.max.bytes の既定値。fetch.max.bytes はこれ以上でなければならない。
const DEFAULT_MESSAGE_MAX_BYTES: usize = 1_000_000;

/// consumer_client_config は ConsumerConfig から rdkafka のクライアント設定を組み立てる。
///
/// オートコミットは無効化し、オフセットは処理完了後に commit で進める。
/// 新しいコンシューマーグループは最新オフセットから読み始める。
/// max_bytes が message.max.bytes の既定値より小さい場合は message.max.bytes も合わせて下げる。
pub fn consumer_client_config(config: &ConsumerConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", config.bootstrap_servers())
        .set("group.id", &config.group_id)
        .set("security.protocol", config.effective_security_protocol())
        .set("enable.auto.commit", "false")
        .set("enable.auto.offset.store", "false")
        .set("auto.offset.reset", "latest")
        .set("fetch.min.bytes", config.min_bytes.to_string())
        .set("fetch.max.bytes", config.max_bytes.to_string());
    if config.max_bytes < DEFAULT_MESSAGE_MAX_BYTES {
        client_config.set("message.max.bytes", config.max_bytes.to_string());
    }

    if let Some(sasl) = &config.sasl {
        client_config
            .set("sasl.mechanism", &sasl.mechanism)
            .set("sasl.username", &sasl.username)
            .set("sasl.password", sasl.password.expose_secret());
    }
    client_config
}

/// KafkaMessageSource は rdkafka の StreamConsumer を使った実装。
pub struct KafkaMessageSource {
    consumer: StreamConsumer,
}

impl KafkaMessageSource {
    /// ConsumerConfig のトピックを購読する KafkaMessageSource を生成する。
    pub fn new(config: &ConsumerConfig) -> Result<Self, PipelineError> {
        config.validate()?;

        let consumer: StreamConsumer = consumer_client_config(config)
            .create()
            .map_err(|e| PipelineError::ConnectionError(e.to_string()))?;

        consumer
            .subscribe(&[&config.topic])
            .map_err(|e| PipelineError::ConnectionError(e.to_string()))?;

        tracing::info!(
            topic = %config.topic,
            group = %config.group_id,
            "kafka consumer subscribed"
        );

        Ok(Self { consumer })
    }
}

#[async_trait]
impl MessageSource for KafkaMessageSource {
    async fn receive(&self) -> Result<ConsumedMessage, PipelineError> {
        let msg = self
            .consumer
            .recv()
            .await
            .map_err(|e| PipelineError::ReadError(e.to_string()))?;

        Ok(ConsumedMessage {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            key: msg.key().map(<[u8]>::to_vec),
            payload: msg.payload().unwrap_or_default().to_vec(),
        })
    }

    async fn commit(&self, message: &ConsumedMessage) -> Result<(), PipelineError> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(
            &message.topic,
            message.partition,
            Offset::Offset(message.offset + 1),
        )
        .map_err(|e| PipelineError::CommitError(e.to_string()))?;

        self.consumer
            .commit(&tpl, CommitMode::Sync)
            .map_err(|e| PipelineError::CommitError(e.to_string()))
    }

    async fn close(&self) -> Result<(), PipelineError> {
        self.consumer.unsubscribe();
        tracing::info!("kafka consumer unsubscribed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SaslConfig;

    #[test]
    fn test_client_config_disables_auto_commit() {
        let cfg = ConsumerConfig::new("kafka-0:9092, kafka-1:9092", "billing.default", "k1s0.test.v1")
            .with_fetch_bytes(10, 1_000_000);
        let client = consumer_client_config(&cfg);
        assert_eq!(client.get("bootstrap.servers"), Some("kafka-0:9092,kafka-1:9092"));
        assert_eq!(client.get("enable.auto.commit"), Some("false"));
        assert_eq!(client.get("auto.offset.reset"), Some("latest"));
        assert_eq!(client.get("fetch.min.bytes"), Some("10"));
        assert_eq!(client.get("fetch.max.bytes"), Some("1000000"));
        assert_eq!(client.get("security.protocol"), Some("PLAINTEXT"));
        assert_eq!(client.get("sasl.username"), None);
        assert_eq!(client.get("message.max.bytes"), None);
    }

    #[test]
    fn test_small_fetch_max_bytes_lowers_message_max_bytes() {
        let cfg = ConsumerConfig::new("kafka:9092", "g", "t").with_fetch_bytes(1, 512 * 1024);
        let client = consumer_client_config(&cfg);
        assert_eq!(client.get("fetch.max.bytes"), Some("524288"));
        assert_eq!(client.get("message.max.bytes"), Some("524288"));
    }

    #[test]
    fn test_client_config_with_sasl() {
        let cfg = ConsumerConfig::new("kafka:9092", "g", "t").with_sasl(SaslConfig::plain("svc", "pw"));
        let client = consumer_client_config(&cfg);
        assert_eq!(client.get("security.protocol"), Some("SASL_PLAINTEXT"));
        assert_eq!(client.get("sasl.mechanism"), Some("PLAIN"));
        assert_eq!(client.get("sasl.username"), Some("svc"));
        assert_eq!(client.get("sasl.password"), Some("pw"));
    }
}
