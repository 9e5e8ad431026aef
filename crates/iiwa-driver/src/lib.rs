//! 驱动层模块
//!
//! KUKA LBR iiwa JAVA 指令桥的驱动部分，包括：
//! - 参数表（`ParamTable`，可从 TOML 加载）
//! - 线程安全的指令状态存储（`StateStore`）
//! - 传输层生命周期（启动、保活、停止、有限时间 join）
//! - 每周期的指令封包与提交（`Driver::run_one`）
//! - 通信健康计数器
//!
//! # 线程模型
//!
//! 任意调用线程通过 `set()` 写入指令；控制循环线程周期性调用 `run_one()`；
//! 实际发送由传输层的 IO 线程完成。状态锁只在拷贝期间持有，从不跨越 IO。

mod driver;
mod error;
pub mod metrics;
pub mod params;
pub mod state;

pub use driver::{Driver, LifecycleState};
pub use error::DriverError;
pub use iiwa_link::LinkConfig;
pub use metrics::{DriverMetrics, DriverMetricsSnapshot};
pub use params::{ParamIndex, ParamTable};
pub use state::{ArmState, CommandKind, StateStore};
