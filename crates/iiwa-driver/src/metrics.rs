//! 通信健康计数器
//!
//! 由 `run_one()` 更新，任意线程可读取快照。

use std::sync::atomic::{AtomicU64, Ordering};

/// 驱动通信指标
#[derive(Debug, Default)]
pub struct DriverMetrics {
    /// 尝试发送的次数（已有传输时每次 `run_one()` 计一次）
    pub attempted: AtomicU64,

    /// 成功提交到传输层的次数
    pub succeeded: AtomicU64,

    /// 构建或提交失败的次数
    pub failed: AtomicU64,

    /// 连续失败次数（成功一次即清零）
    ///
    /// 持续增长说明链路已经不可用（事件循环退出或队列一直满）。
    pub consecutive_failures: AtomicU64,
}

impl DriverMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_attempt(&self) {
        self.attempted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_success(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    /// 记录一次失败，返回当前连续失败次数
    pub(crate) fn record_failure(&self) -> u64 {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn snapshot(&self) -> DriverMetricsSnapshot {
        DriverMetricsSnapshot {
            attempted: self.attempted.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
        }
    }

    /// 重置所有计数器
    pub fn reset(&self) {
        self.attempted.store(0, Ordering::Relaxed);
        self.succeeded.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }
}

/// 指标快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverMetricsSnapshot {
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub consecutive_failures: u64,
}

impl DriverMetricsSnapshot {
    /// 成功率（百分比），没有尝试时返回 0.0
    pub fn success_rate(&self) -> f64 {
        if self.attempted == 0 {
            return 0.0;
        }
        (self.succeeded as f64 / self.attempted as f64) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consecutive_failures_reset_on_success() {
        let metrics = DriverMetrics::new();
        metrics.record_attempt();
        assert_eq!(metrics.record_failure(), 1);
        metrics.record_attempt();
        assert_eq!(metrics.record_failure(), 2);
        metrics.record_attempt();
        metrics.record_success();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.attempted, 3);
        assert_eq!(snapshot.failed, 2);
        assert_eq!(snapshot.succeeded, 1);
        assert_eq!(snapshot.consecutive_failures, 0);
    }

    #[test]
    fn test_success_rate() {
        assert_eq!(DriverMetricsSnapshot::default().success_rate(), 0.0);
        let snapshot = DriverMetricsSnapshot {
            attempted: 4,
            succeeded: 3,
            failed: 1,
            consecutive_failures: 1,
        };
        assert!((snapshot.success_rate() - 75.0).abs() < 1e-9);
    }

    #[test]
    fn test_reset() {
        let metrics = DriverMetrics::new();
        metrics.record_attempt();
        metrics.record_failure();
        metrics.reset();
        assert_eq!(metrics.snapshot(), DriverMetricsSnapshot::default());
    }
}
