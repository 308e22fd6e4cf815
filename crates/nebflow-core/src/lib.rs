//! nebflow-core
//!
//! 外部で実行される長い計算 stage（構造の読み込み・経路の補間・NEB 最適化）を
//! 順番に駆動し、進捗の観測とキャンセルを可能にするコアです。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, status, stage, run, events, outcome, cancel, errors）
//! - **ports**: 抽象化レイヤー（JobHandle, SyncWork, PollableWork, ObserverSink, LogSink, Clock, IdGenerator）
//! - **impls**: 実装（ChannelSink, ProcessJob, ThreadJob, CommandStage など）
//! - **app**: アプリケーションロジック（Supervisor, Controller）
//! - **project**: プロジェクト設定と成果物ファイルの配置

pub mod app;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod project;

#[cfg(test)]
mod testing;
