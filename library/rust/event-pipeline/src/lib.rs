//! k1s0-event-pipeline: Kafka イベントの at-least-once 消費と同期的な発行を提供するライブラリ。
//!
//! - [`EventConsumer`]: 1 件ずつ読み取り、登録ハンドラーに指数バックオフ付きリトライで渡し、
//!   処理確定後にオフセットをコミットする。ハンドラーの panic は 1 メッセージ単位で隔離する。
//! - [`EventProducer`]: ペイロードを JSON にエンコードし、別タスクでの書き込み完了を待つ。
//!
//! ブローカーとの接続は [`MessageSource`] / [`MessageSink`] で抽象化しており、
//! rdkafka による実装は `kafka` フィーチャーで有効になる。

pub mod config;
pub mod consumer;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod fault;
pub mod handler;
pub mod logging;
pub mod producer;
pub mod sink;
pub mod source;

#[cfg(feature = "kafka")]
pub mod kafka_consumer;
#[cfg(feature = "kafka")]
pub mod kafka_producer;

pub use config::{ConfigError, ConsumerConfig, LoggingConfig, PipelineConfig, ProducerConfig, SaslConfig};
pub use consumer::{EventConsumer, IterationOutcome};
pub use dispatch::DispatchOutcome;
pub use envelope::Event;
pub use error::PipelineError;
pub use handler::{DecodedMessage, EventHandler, HandlerBinding, MessageContext, RawEventHandler};
pub use k1s0_retry::BackoffPolicy;
pub use producer::{EventProducer, PublishHandle};
pub use sink::{MessageSink, OutboundRecord};
pub use source::{ConsumedMessage, MessageSource};

#[cfg(feature = "kafka")]
pub use kafka_consumer::KafkaMessageSource;
#[cfg(feature = "kafka")]
pub use kafka_producer::KafkaMessageSink;

#[cfg(feature = "mock")]
pub use sink::MockMessageSink;
#[cfg(feature = "mock")]
pub use source::MockMessageSource;

#[cfg(feature = "testing")]
pub use sink::InMemoryMessageSink;
#[cfg(feature = "testing")]
pub use source::InMemoryMessageSource;
