//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **ChannelSink**: bounded mpsc による ObserverSink
//! - **TracingLogSink / BufferLogSink**: LogSink
//! - **ProcessJob / ThreadJob / FinishedJob**: JobHandle
//! - **CommandStage / SpawnedCommandStage**: 外部プログラムの stage

pub mod channel_sink;
pub mod command_stage;
pub mod log_sinks;
pub mod process_job;
pub mod thread_job;

// 主要な型を再エクスポート
pub use self::channel_sink::{ChannelSink, EventReceiver, event_channel};
pub use self::command_stage::{CommandSpec, CommandStage, FinishedJob, SpawnedCommandStage};
pub use self::log_sinks::{BufferLogSink, TracingLogSink};
pub use self::process_job::ProcessJob;
pub use self::thread_job::{CancelFlag, ThreadJob};
