//! IdGenerator port - ID 生成の抽象化
//!
//! # 実装
//! - **UlidGenerator**: Clock の時刻 + 乱数で ULID を作る

use crate::domain::{JobId, RunId};
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator は run と job の ID を生成
///
/// `Send + Sync` なので supervisor のタスクからも使えます。
pub trait IdGenerator: Send + Sync {
    fn generate_run_id(&self) -> RunId;

    fn generate_job_id(&self) -> JobId;
}

/// UlidGenerator は ULID ベースの ID 生成器
///
/// timestamp 部分は Clock から取るので、FixedClock を使えば
/// テストでも timestamp が決定的になります。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_run_id(&self) -> RunId {
        RunId::from(self.next_ulid())
    }

    fn generate_job_id(&self) -> JobId {
        JobId::from(self.next_ulid())
    }
}
