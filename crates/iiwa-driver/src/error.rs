//! 驱动层错误类型定义

use iiwa_link::LinkError;
use iiwa_protocol::ProtocolError;
use thiserror::Error;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// 无法建立传输连接（绑定本地地址或连接远端地址失败）
    ///
    /// 同步返回，不重试；驱动保持未初始化状态。
    #[error("Failed to establish transport {local} <-> {remote}: {source}")]
    Connection {
        local: String,
        remote: String,
        #[source]
        source: LinkError,
    },

    /// 传输层错误
    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    /// 消息构建错误
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 重复调用 `construct()`
    #[error("Driver already running")]
    AlreadyRunning,

    /// 驱动已停止，不能再次启动
    #[error("Driver stopped")]
    Stopped,

    /// 功能未实现
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// IO 线程错误
    #[error("IO thread error: {0}")]
    IoThread(String),

    /// 配置文件读取失败
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 配置文件解析失败
    #[error("Config parse error: {0}")]
    Config(#[from] toml::de::Error),

    /// 配置序列化失败
    #[error("Config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_connection_error_names_both_addresses() {
        let err = DriverError::Connection {
            local: "tcp://0.0.0.0:30010".to_string(),
            remote: "tcp://172.31.1.147:30010".to_string(),
            source: LinkError::LoopStopped,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("tcp://0.0.0.0:30010"));
        assert!(msg.contains("tcp://172.31.1.147:30010"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_lifecycle_error_display() {
        assert_eq!(format!("{}", DriverError::AlreadyRunning), "Driver already running");
        assert_eq!(format!("{}", DriverError::Stopped), "Driver stopped");
        assert_eq!(
            format!("{}", DriverError::NotImplemented("joint angle read-back".to_string())),
            "Not implemented: joint angle read-back"
        );
    }

    #[test]
    fn test_from_link_error() {
        let err: DriverError = LinkError::QueueFull(1000).into();
        assert!(matches!(err, DriverError::Link(LinkError::QueueFull(1000))));
    }
}
