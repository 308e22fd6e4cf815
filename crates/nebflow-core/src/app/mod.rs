//! App - アプリケーション層
//!
//! ports を組み合わせてパイプラインを動かします。
//!
//! # 主要コンポーネント
//! - **Supervisor**: PipelineRun を専用タスクで終了まで駆動
//! - **Controller**: プロジェクト状態の所有者。run の起動・キャンセル・イベント適用

pub mod controller;
pub mod supervisor;

// 主要な型を再エクスポート
pub use self::controller::{Controller, ProjectState, StatusSnapshot};
pub use self::supervisor::{RunHandle, RunReport, Supervisor, SupervisorConfig};
