//! # iiwa Link
//!
//! 传输层：把已封包的消息通过双工通道异步发送出去。
//!
//! - `endpoint`: `tcp://host:port` / `udp://host:port` 地址解析
//! - `channel`: 绑定本地地址 + 连接远端地址的双工通道
//! - `frame`: TCP 流上的长度前缀分帧
//! - `transport`: 对外句柄（获取构建器、提交消息）
//! - `event_loop`: 单线程事件循环（mio），由专用线程驱动
//! - `metrics`: 链路计数器
//!
//! # 线程模型
//!
//! ```text
//! 调用线程                        IO 线程
//!   acquire_builder()
//!   push_f64_vector() ...
//!   finish()
//!   submit() ── crossbeam ──▶  EventLoop::run()
//!            ── Waker ──────▶    ├─ 分发到已连接对端（轮询）
//!                                ├─ 写 socket（非阻塞）
//!                                └─ 构建器归还到池
//! ```
//!
//! `submit()` 从不等待网络完成，也不提供送达确认。

mod channel;
mod endpoint;
pub mod event_loop;
pub mod frame;
pub mod metrics;
mod pool;
mod transport;

pub use channel::DuplexChannel;
pub use endpoint::{Endpoint, Scheme};
pub use event_loop::{EventLoop, LoopHandle, WorkGuard};
pub use iiwa_protocol::{FieldId, MessageBuilder, MessageType};
pub use metrics::{LinkMetrics, LinkMetricsSnapshot};
pub use transport::{LinkConfig, Transport};

use iiwa_protocol::ProtocolError;
use std::net::SocketAddr;
use thiserror::Error;

/// 传输层统一错误类型
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("Endpoint scheme mismatch: local {local}, remote {remote}")]
    SchemeMismatch { local: Scheme, remote: Scheme },

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to connect {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),

    /// 提交队列已满（无背压，消息被丢弃）
    #[error("Submit queue full (capacity: {0})")]
    QueueFull(usize),

    /// 事件循环已停止（IO 线程退出）
    #[error("Event loop stopped")]
    LoopStopped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_error_display() {
        let err = LinkError::QueueFull(1000);
        assert_eq!(format!("{}", err), "Submit queue full (capacity: 1000)");

        let err = LinkError::SchemeMismatch {
            local: Scheme::Tcp,
            remote: Scheme::Udp,
        };
        assert_eq!(
            format!("{}", err),
            "Endpoint scheme mismatch: local tcp, remote udp"
        );

        let err = LinkError::Bind {
            addr: "127.0.0.1:30010".parse().unwrap(),
            source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
        };
        assert!(format!("{}", err).contains("127.0.0.1:30010"));
    }

    #[test]
    fn test_from_protocol_error() {
        let err: LinkError = ProtocolError::NotFinished.into();
        assert!(matches!(err, LinkError::Protocol(ProtocolError::NotFinished)));
    }
}
