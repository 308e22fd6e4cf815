//! LogSink port - 人間向けの進捗テキスト
//!
//! 構造化ログは `tracing` に出します。こちらは GUI のログ欄や
//! CLI のトランスクリプトのような「追記するだけのテキスト」です。

/// Plain text-appendable sink for human-readable progress and error lines.
pub trait LogSink: Send + Sync {
    fn log(&self, message: &str);
}

impl<S: LogSink + ?Sized> LogSink for std::sync::Arc<S> {
    fn log(&self, message: &str) {
        (**self).log(message)
    }
}
