//! KafkaMessageSink: rdkafka を使用した MessageSink 実装。
//! feature = "kafka" で有効化される。

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use secrecy::ExposeSecret;

use crate::config::ProducerConfig;
use crate::error::PipelineError;
use crate::sink::{MessageSink, OutboundRecord};

/// close 時に未送信メッセージのフラッシュを待つ上限。
const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// producer_client_config は ProducerConfig から rdkafka のクライアント設定を組み立てる。
///
/// 1 メッセージ 1 送信とするためバッチングを無効化し、
/// 送信リトライは max_attempts - 1 回までブローカークライアントに任せる。
pub fn producer_client_config(config: &ProducerConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", config.bootstrap_servers())
        .set("security.protocol", config.effective_security_protocol())
        .set("batch.num.messages", "1")
        .set("linger.ms", "0")
        .set(
            "message.send.max.retries",
            config.max_attempts.saturating_sub(1).to_string(),
        )
        .set("message.timeout.ms", config.send_timeout_ms.to_string());

    if let Some(sasl) = &config.sasl {
        client_config
            .set("sasl.mechanism", &sasl.mechanism)
            .set("sasl.username", &sasl.username)
            .set("sasl.password", sasl.password.expose_secret());
    }
    client_config
}

/// KafkaMessageSink は rdkafka の FutureProducer を使った実装。
pub struct KafkaMessageSink {
    producer: FutureProducer,
    topic: String,
    send_timeout: Duration,
}

impl KafkaMessageSink {
    pub fn new(config: &ProducerConfig) -> Result<Self, PipelineError> {
        config.validate()?;

        let producer: FutureProducer = producer_client_config(config)
            .create()
            .map_err(|e| PipelineError::ConnectionError(e.to_string()))?;

        Ok(Self {
            producer,
            topic: config.topic.clone(),
            send_timeout: config.send_timeout(),
        })
    }

    /// コンシューマー設定の dead_letter_topic に書き込む KafkaMessageSink を生成する。
    /// dead_letter_topic が未設定の場合は None を返す。
    pub fn dead_letter(
        config: &crate::config::ConsumerConfig,
    ) -> Result<Option<Self>, PipelineError> {
        let Some(topic) = &config.dead_letter_topic else {
            return Ok(None);
        };
        let mut producer_config = ProducerConfig::new(config.brokers.clone(), topic.clone());
        producer_config.security_protocol = config.security_protocol.clone();
        producer_config.sasl = config.sasl.clone();
        Self::new(&producer_config).map(Some)
    }
}

#[async_trait]
impl MessageSink for KafkaMessageSink {
    async fn send(&self, payload: Vec<u8>) -> Result<(), PipelineError> {
        let record = FutureRecord::<(), [u8]>::to(&self.topic).payload(payload.as_slice());

        self.producer
            .send(record, self.send_timeout)
            .await
            .map_err(|(err, _)| PipelineError::PublishError(err.to_string()))?;

        Ok(())
    }

    async fn send_record(&self, record: OutboundRecord) -> Result<(), PipelineError> {
        let headers = record
            .headers
            .iter()
            .fold(OwnedHeaders::new(), |headers, (name, value)| {
                headers.insert(Header {
                    key: name,
                    value: Some(value.as_str()),
                })
            });
        let mut future_record = FutureRecord::<[u8], [u8]>::to(&self.topic)
            .payload(record.payload.as_slice())
            .headers(headers);
        if let Some(key) = &record.key {
            future_record = future_record.key(key.as_slice());
        }

        self.producer
            .send(future_record, self.send_timeout)
            .await
            .map_err(|(err, _)| PipelineError::PublishError(err.to_string()))?;

        Ok(())
    }

    async fn close(&self) -> Result<(), PipelineError> {
        self.producer
            .flush(FLUSH_TIMEOUT)
            .map_err(|e| PipelineError::PublishError(e.to_string()))?;
        tracing::info!(topic = %self.topic, "kafka producer flushed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SaslConfig;

    #[test]
    fn test_client_config_disables_batching() {
        let cfg = ProducerConfig::new("kafka:9092", "k1s0.test.v1").with_max_attempts(5);
        let client = producer_client_config(&cfg);
        assert_eq!(client.get("batch.num.messages"), Some("1"));
        assert_eq!(client.get("linger.ms"), Some("0"));
        assert_eq!(client.get("message.send.max.retries"), Some("4"));
        assert_eq!(client.get("message.timeout.ms"), Some("10000"));
    }

    #[test]
    fn test_client_config_with_scram() {
        let cfg = ProducerConfig::new("kafka:9093", "k1s0.test.v1")
            .with_sasl(SaslConfig::plain("svc", "pw").with_mechanism("SCRAM-SHA-512"));
        let client = producer_client_config(&cfg);
        assert_eq!(client.get("security.protocol"), Some("SASL_PLAINTEXT"));
        assert_eq!(client.get("sasl.mechanism"), Some("SCRAM-SHA-512"));
    }
}
