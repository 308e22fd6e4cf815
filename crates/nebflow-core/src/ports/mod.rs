//! Ports - 抽象化レイヤー
//!
//! supervisor が外部とやり取りする境界をすべて trait で定義します。
//! - 外部で動く仕事: `JobHandle`, `SyncWork`, `PollableWork`
//! - 通知: `ObserverSink`（イベント）, `LogSink`（人間向けテキスト）
//! - テスト容易性: `Clock`, `IdGenerator`

pub mod clock;
pub mod id_generator;
pub mod job_handle;
pub mod log_sink;
pub mod observer_sink;
pub mod stage_work;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::job_handle::JobHandle;
pub use self::log_sink::LogSink;
pub use self::observer_sink::ObserverSink;
pub use self::stage_work::{PollableWork, SyncWork};
