//! 構造化ログの初期化。
//! パイプラインは tracing のイベントとしてログを出力し、出力先はアプリケーション側で選ぶ。
//!
//! # 使用例
//!
//! ```ignore
//! let config = k1s0_event_pipeline::config::load("config/pipeline.yaml")?;
//! k1s0_event_pipeline::logging::init_logger(&config.logging)?;
//! ```

use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::PipelineError;

/// build_subscriber は LoggingConfig に従った subscriber を組み立てる。グローバルには登録しない。
///
/// format が "text" の場合はプレーンテキスト出力、それ以外は JSON 出力。
pub fn build_subscriber<W>(
    config: &LoggingConfig,
    writer: W,
) -> Result<Box<dyn Subscriber + Send + Sync>, PipelineError>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let filter = EnvFilter::try_new(&config.level)
        .map_err(|e| PipelineError::ConfigurationError(format!("invalid log level: {e}")))?;
    let registry = tracing_subscriber::registry().with(filter);

    if config.format == "text" {
        Ok(Box::new(
            registry.with(fmt::layer().with_target(true).with_writer(writer)),
        ))
    } else {
        Ok(Box::new(registry.with(
            fmt::layer().json().with_target(true).with_writer(writer),
        )))
    }
}

/// init_logger は標準出力に書き出すグローバルな tracing-subscriber を初期化する。
/// 既に初期化済みの場合はエラーを返す。
pub fn init_logger(config: &LoggingConfig) -> Result<(), PipelineError> {
    build_subscriber(config, std::io::stdout)?
        .try_init()
        .map_err(|e| PipelineError::ConfigurationError(format!("logger init failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    /// SharedBuffer は subscriber の出力を受け取るテスト用ライター。
    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl io::Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn capture(config: &LoggingConfig, emit: impl FnOnce()) -> String {
        let buffer = SharedBuffer::default();
        let writer = buffer.clone();
        let subscriber = build_subscriber(config, move || writer.clone()).unwrap();
        tracing::subscriber::with_default(subscriber, emit);
        buffer.contents()
    }

    #[test]
    fn test_invalid_level_is_rejected() {
        let config = LoggingConfig {
            level: "k1s0=notalevel".to_string(),
            format: "json".to_string(),
        };
        assert!(matches!(
            build_subscriber(&config, io::sink),
            Err(PipelineError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_json_format_emits_structured_fields() {
        let output = capture(&LoggingConfig::default(), || {
            tracing::info!(event_id = "e-1", attempts = 2, "event processed after retry");
            tracing::debug!("below the configured level");
        });

        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 1, "{output}");
        let line: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(line["level"], "INFO");
        assert_eq!(line["fields"]["message"], "event processed after retry");
        assert_eq!(line["fields"]["event_id"], "e-1");
        assert_eq!(line["fields"]["attempts"], 2);
    }

    #[test]
    fn test_text_format_respects_level() {
        let config = LoggingConfig {
            level: "warn".to_string(),
            format: "text".to_string(),
        };
        let output = capture(&config, || {
            tracing::info!("consumer started");
            tracing::warn!(topic = "k1s0.test.v1", "commit lagging");
        });

        assert!(!output.contains("consumer started"));
        assert!(output.contains("commit lagging"));
        assert!(output.contains("WARN"));
        assert!(!output.trim_start().starts_with('{'));
    }
}
