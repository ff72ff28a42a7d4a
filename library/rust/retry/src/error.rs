use thiserror::Error;

#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("すべてのリトライが失敗しました ({attempts} 回): {last_error}")]
    ExhaustedRetries { attempts: u32, last_error: E },
}

impl<E> RetryError<E> {
    /// 操作を呼び出した総回数を返す。
    pub fn attempts(&self) -> u32 {
        match self {
            Self::ExhaustedRetries { attempts, .. } => *attempts,
        }
    }

    /// 最後の試行で返されたエラーを取り出す。
    pub fn into_last_error(self) -> E {
        match self {
            Self::ExhaustedRetries { last_error, .. } => last_error,
        }
    }
}
