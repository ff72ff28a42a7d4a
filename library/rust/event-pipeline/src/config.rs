use std::time::Duration;

use k1s0_retry::BackoffPolicy;
use secrecy::SecretString;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read file: {0}")]
    ReadFile(#[from] std::io::Error),
    #[error("failed to parse YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),
    #[error("validation error: {0}")]
    Validation(String),
}

impl From<ConfigError> for crate::error::PipelineError {
    fn from(err: ConfigError) -> Self {
        crate::error::PipelineError::ConfigurationError(err.to_string())
    }
}

/// SaslConfig は認証付きトランスポートの資格情報。
/// 内容はブローカークライアントにそのまま渡され、このライブラリはハンドシェイクを行わない。
#[derive(Debug, Clone, Deserialize)]
pub struct SaslConfig {
    pub username: String,
    /// Debug 出力では [REDACTED] と表示される
    pub password: SecretString,
    /// SASL メカニズム（PLAIN / SCRAM-SHA-256 / SCRAM-SHA-512）
    #[serde(default = "default_sasl_mechanism")]
    pub mechanism: String,
}

impl SaslConfig {
    pub fn plain(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::new(password.into()),
            mechanism: default_sasl_mechanism(),
        }
    }

    pub fn with_mechanism(mut self, mechanism: impl Into<String>) -> Self {
        self.mechanism = mechanism.into();
        self
    }
}

fn default_sasl_mechanism() -> String {
    "PLAIN".to_string()
}

fn default_security_protocol() -> String {
    "PLAINTEXT".to_string()
}

fn default_min_bytes() -> usize {
    1
}

fn default_max_bytes() -> usize {
    10 * 1024 * 1024
}

/// librdkafka が受け付ける message.max.bytes の下限。max_bytes はこれ未満にできない。
pub const MIN_FETCH_MAX_BYTES: usize = 1000;

fn default_max_retry() -> u32 {
    3
}

fn default_min_backoff_ms() -> u64 {
    400
}

fn default_max_backoff_ms() -> u64 {
    12_000
}

fn default_max_jitter_ms() -> u64 {
    800
}

fn default_max_attempts() -> u32 {
    3
}

fn default_send_timeout_ms() -> u64 {
    10_000
}

/// カンマ区切りのブローカーアドレスを分割する（空要素は除く）。
fn split_brokers(brokers: &str) -> Vec<String> {
    brokers
        .split(',')
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// SASL 資格情報がある場合はセキュリティプロトコルを SASL 付きに昇格する。
fn effective_security_protocol(protocol: &str, sasl: Option<&SaslConfig>) -> String {
    match (protocol, sasl) {
        ("PLAINTEXT", Some(_)) => "SASL_PLAINTEXT".to_string(),
        ("SSL", Some(_)) => "SASL_SSL".to_string(),
        (p, _) => p.to_string(),
    }
}

fn validate_brokers(brokers: &str) -> Result<(), ConfigError> {
    if split_brokers(brokers).is_empty() {
        return Err(ConfigError::Validation(
            "at least one broker must be specified".into(),
        ));
    }
    Ok(())
}

/// ConsumerConfig はコンシューマーの購読設定。構築後は変更しない。
#[derive(Debug, Clone, Deserialize)]
pub struct ConsumerConfig {
    /// ブローカーアドレス（カンマ区切り、例: "kafka-0:9092,kafka-1:9092"）
    pub brokers: String,
    /// コンシューマーグループ ID
    pub group_id: String,
    /// 購読するトピック
    pub topic: String,
    /// フェッチ応答の最小バイト数
    #[serde(default = "default_min_bytes")]
    pub min_bytes: usize,
    /// フェッチ応答の最大バイト数
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
    /// ハンドラー失敗時の最大リトライ回数
    #[serde(default = "default_max_retry")]
    pub max_retry: u32,
    #[serde(default = "default_min_backoff_ms")]
    pub min_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_max_jitter_ms")]
    pub max_jitter_ms: u64,
    /// セキュリティプロトコル（PLAINTEXT / SSL / SASL_PLAINTEXT / SASL_SSL）
    #[serde(default = "default_security_protocol")]
    pub security_protocol: String,
    #[serde(default)]
    pub sasl: Option<SaslConfig>,
    /// デコード不能・リトライ上限到達メッセージの転送先。未設定の場合はログ出力のみで破棄する。
    #[serde(default)]
    pub dead_letter_topic: Option<String>,
}

impl ConsumerConfig {
    pub fn new(
        brokers: impl Into<String>,
        group_id: impl Into<String>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            brokers: brokers.into(),
            group_id: group_id.into(),
            topic: topic.into(),
            min_bytes: default_min_bytes(),
            max_bytes: default_max_bytes(),
            max_retry: default_max_retry(),
            min_backoff_ms: default_min_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_jitter_ms: default_max_jitter_ms(),
            security_protocol: default_security_protocol(),
            sasl: None,
            dead_letter_topic: None,
        }
    }

    pub fn with_max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = max_retry;
        self
    }

    pub fn with_fetch_bytes(mut self, min_bytes: usize, max_bytes: usize) -> Self {
        self.min_bytes = min_bytes;
        self.max_bytes = max_bytes;
        self
    }

    pub fn with_backoff_ms(mut self, min_ms: u64, max_ms: u64, jitter_ms: u64) -> Self {
        self.min_backoff_ms = min_ms;
        self.max_backoff_ms = max_ms;
        self.max_jitter_ms = jitter_ms;
        self
    }

    pub fn with_sasl(mut self, sasl: SaslConfig) -> Self {
        self.sasl = Some(sasl);
        self
    }

    pub fn with_dead_letter_topic(mut self, topic: impl Into<String>) -> Self {
        self.dead_letter_topic = Some(topic.into());
        self
    }

    pub fn broker_list(&self) -> Vec<String> {
        split_brokers(&self.brokers)
    }

    /// ブローカーアドレスをカンマ区切り文字列で返す（rdkafka の bootstrap.servers 用）。
    pub fn bootstrap_servers(&self) -> String {
        self.broker_list().join(",")
    }

    pub fn effective_security_protocol(&self) -> String {
        effective_security_protocol(&self.security_protocol, self.sasl.as_ref())
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.min_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
            Duration::from_millis(self.max_jitter_ms),
        )
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_brokers(&self.brokers)?;
        if self.group_id.is_empty() {
            return Err(ConfigError::Validation("consumer.group_id is required".into()));
        }
        if self.topic.is_empty() {
            return Err(ConfigError::Validation("consumer.topic is required".into()));
        }
        if self.min_bytes > self.max_bytes {
            return Err(ConfigError::Validation(
                "consumer.min_bytes must be <= consumer.max_bytes".into(),
            ));
        }
        if self.max_bytes < MIN_FETCH_MAX_BYTES {
            return Err(ConfigError::Validation(format!(
                "consumer.max_bytes must be >= {MIN_FETCH_MAX_BYTES}"
            )));
        }
        if self.min_backoff_ms > self.max_backoff_ms {
            return Err(ConfigError::Validation(
                "consumer.min_backoff_ms must be <= consumer.max_backoff_ms".into(),
            ));
        }
        if matches!(self.dead_letter_topic.as_deref(), Some(t) if t == self.topic) {
            return Err(ConfigError::Validation(
                "consumer.dead_letter_topic must differ from consumer.topic".into(),
            ));
        }
        Ok(())
    }
}

/// ProducerConfig はプロデューサーの発行設定。構築後は変更しない。
#[derive(Debug, Clone, Deserialize)]
pub struct ProducerConfig {
    /// ブローカーアドレス（カンマ区切り）
    pub brokers: String,
    /// 発行先トピック
    pub topic: String,
    /// ブローカークライアントに委ねる送信試行回数（初回を含む）
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// 1 回の publish が完了を待つ上限（ミリ秒）
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    #[serde(default = "default_security_protocol")]
    pub security_protocol: String,
    #[serde(default)]
    pub sasl: Option<SaslConfig>,
}

impl ProducerConfig {
    pub fn new(brokers: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            brokers: brokers.into(),
            topic: topic.into(),
            max_attempts: default_max_attempts(),
            send_timeout_ms: default_send_timeout_ms(),
            security_protocol: default_security_protocol(),
            sasl: None,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_sasl(mut self, sasl: SaslConfig) -> Self {
        self.sasl = Some(sasl);
        self
    }

    pub fn bootstrap_servers(&self) -> String {
        split_brokers(&self.brokers).join(",")
    }

    pub fn effective_security_protocol(&self) -> String {
        effective_security_protocol(&self.security_protocol, self.sasl.as_ref())
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_brokers(&self.brokers)?;
        if self.topic.is_empty() {
            return Err(ConfigError::Validation("producer.topic is required".into()));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Validation(
                "producer.max_attempts must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// LoggingConfig はログ出力の設定。
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// EnvFilter 形式のフィルター（例: "info", "k1s0_event_pipeline=debug"）
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "json" または "text"
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// PipelineConfig は YAML 設定ファイル全体。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub consumer: Option<ConsumerConfig>,
    #[serde(default)]
    pub producer: Option<ProducerConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(consumer) = &self.consumer {
            consumer.validate()?;
        }
        if let Some(producer) = &self.producer {
            producer.validate()?;
        }
        if !["json", "text"].contains(&self.logging.format.as_str()) {
            return Err(ConfigError::Validation(
                "logging.format must be json or text".into(),
            ));
        }
        Ok(())
    }
}

/// YAML を読み込み、バリデーション済みの PipelineConfig を返す。
pub fn load(path: impl AsRef<std::path::Path>) -> Result<PipelineConfig, ConfigError> {
    let data = std::fs::read_to_string(path)?;
    let config: PipelineConfig = serde_yaml::from_str(&data)?;
    config.validate()?;
    Ok(config)
}
