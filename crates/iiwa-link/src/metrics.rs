//! 链路计数器
//!
//! 由调用线程（提交）和 IO 线程（发送）共同更新，任意线程可读取快照。

use std::sync::atomic::{AtomicU64, Ordering};

/// 链路实时指标
///
/// ```rust
/// use iiwa_link::LinkMetrics;
/// use std::sync::atomic::Ordering;
///
/// let metrics = LinkMetrics::new();
/// metrics.messages_sent.fetch_add(1, Ordering::Relaxed);
/// assert_eq!(metrics.snapshot().messages_sent, 1);
/// ```
#[derive(Debug, Default)]
pub struct LinkMetrics {
    /// 调用方成功入队的消息数
    pub messages_submitted: AtomicU64,

    /// 完整写出到 socket 的消息数
    pub messages_sent: AtomicU64,

    /// 写出的字节数（TCP 含帧头）
    pub bytes_sent: AtomicU64,

    /// 被丢弃的消息数（队列满、超过高水位、对端断开时未写完）
    pub messages_dropped: AtomicU64,

    /// socket 写错误次数
    pub send_errors: AtomicU64,

    /// 出站连接重连次数
    pub reconnects: AtomicU64,

    /// 接受的入站连接数
    pub peers_accepted: AtomicU64,

    /// 读取并丢弃的入站字节数
    pub bytes_received: AtomicU64,
}

impl LinkMetrics {
    /// 创建新的指标实例（所有计数器为 0）
    pub fn new() -> Self {
        Self::default()
    }

    /// 读取快照
    pub fn snapshot(&self) -> LinkMetricsSnapshot {
        LinkMetricsSnapshot {
            messages_submitted: self.messages_submitted.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            peers_accepted: self.peers_accepted.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }

    /// 重置所有计数器
    pub fn reset(&self) {
        self.messages_submitted.store(0, Ordering::Relaxed);
        self.messages_sent.store(0, Ordering::Relaxed);
        self.bytes_sent.store(0, Ordering::Relaxed);
        self.messages_dropped.store(0, Ordering::Relaxed);
        self.send_errors.store(0, Ordering::Relaxed);
        self.reconnects.store(0, Ordering::Relaxed);
        self.peers_accepted.store(0, Ordering::Relaxed);
        self.bytes_received.store(0, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}

/// 链路指标快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkMetricsSnapshot {
    pub messages_submitted: u64,
    pub messages_sent: u64,
    pub bytes_sent: u64,
    pub messages_dropped: u64,
    pub send_errors: u64,
    pub reconnects: u64,
    pub peers_accepted: u64,
    pub bytes_received: u64,
}

impl LinkMetricsSnapshot {
    /// 已入队但尚未写出（也未丢弃）的消息数
    pub fn in_flight(&self) -> u64 {
        self.messages_submitted
            .saturating_sub(self.messages_sent)
            .saturating_sub(self.messages_dropped)
    }
}
