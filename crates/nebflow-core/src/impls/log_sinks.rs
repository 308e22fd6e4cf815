//! LogSink 実装
//!
//! - **TracingLogSink**: `tracing::info!` に流す
//! - **BufferLogSink**: メモリに貯める（テスト・CLI のトランスクリプト用）

use std::sync::{Mutex, PoisonError};

use crate::ports::LogSink;

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn log(&self, message: &str) {
        tracing::info!(target: "nebflow::progress", "{message}");
    }
}

#[derive(Debug, Default)]
pub struct BufferLogSink {
    lines: Mutex<Vec<String>>,
}

impl BufferLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|line| line.contains(needle))
    }
}

impl LogSink for BufferLogSink {
    fn log(&self, message: &str) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.to_string());
    }
}
