//! 传输句柄
//!
//! 调用线程通过 `Transport` 取构建器、提交消息；实际发送在事件循环线程完成。

use crate::channel::DuplexChannel;
use crate::event_loop::{EventLoop, LoopHandle, LoopShared, WAKER_TOKEN, WorkGuard};
use crate::metrics::LinkMetrics;
use crate::pool::BuilderPool;
use crate::LinkError;
use crossbeam_channel::{Sender, TrySendError};
use iiwa_protocol::{MessageBuilder, ProtocolError};
use mio::{Poll, Waker};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// 传输层可调参数
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// 调用线程 → IO 线程提交队列容量
    pub queue_capacity: usize,
    /// 等待对端时最多积压的消息数，超出的丢弃
    pub pending_high_water_mark: usize,
    /// 出站 TCP 重连间隔（毫秒）
    pub reconnect_interval_ms: u64,
    /// poll 超时（毫秒）
    pub poll_timeout_ms: u64,
    /// 构建器池上限
    pub max_pooled_builders: usize,
    /// 单个对端未写出字节上限，超过后轮询跳过该对端
    pub max_peer_buffer_bytes: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1000,
            pending_high_water_mark: 1000,
            reconnect_interval_ms: 100,
            poll_timeout_ms: 50,
            max_pooled_builders: 16,
            max_peer_buffer_bytes: 1024 * 1024, // 1 MiB
        }
    }
}

impl LinkConfig {
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

/// 异步消息传输
///
/// # Example
///
/// ```no_run
/// use iiwa_link::{DuplexChannel, FieldId, LinkConfig, MessageType, Transport};
///
/// let channel = DuplexChannel::open_str("tcp://0.0.0.0:30010", "tcp://172.31.1.147:30010")?;
/// let (transport, event_loop) = Transport::new(channel, LinkConfig::default())?;
/// let _guard = transport.work_guard();
/// let io_thread = event_loop.spawn()?;
///
/// let mut builder = transport.acquire_builder();
/// builder.push_f64_vector(FieldId::Position, &[0.0; 7])?;
/// builder.push_f64_vector(FieldId::Velocity, &[])?;
/// builder.push_f64_vector(FieldId::Acceleration, &[0.0; 7])?;
/// builder.finish(MessageType::JointState)?;
/// transport.submit(builder)?;
///
/// transport.handle().stop();
/// let _ = io_thread.join();
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug)]
pub struct Transport {
    sender: Sender<MessageBuilder>,
    shared: Arc<LoopShared>,
    pool: Arc<BuilderPool>,
    metrics: Arc<LinkMetrics>,
    local_addr: SocketAddr,
    queue_capacity: usize,
}

impl Transport {
    /// 创建传输句柄和对应的事件循环
    ///
    /// 事件循环尚未运行：调用方需要 `spawn()` 或在自己的线程中 `run()`。
    pub fn new(channel: DuplexChannel, config: LinkConfig) -> Result<(Self, EventLoop), LinkError> {
        let poll = Poll::new()?;
        let waker = Waker::new(poll.registry(), WAKER_TOKEN)?;
        let shared = Arc::new(LoopShared::new(waker));

        let (sender, receiver) = crossbeam_channel::bounded(config.queue_capacity);
        let pool = Arc::new(BuilderPool::new(config.max_pooled_builders));
        let metrics = Arc::new(LinkMetrics::new());
        let local_addr = channel.local_addr()?;
        let queue_capacity = config.queue_capacity;

        let event_loop = EventLoop::new(
            poll,
            shared.clone(),
            receiver,
            channel,
            pool.clone(),
            metrics.clone(),
            config,
        )?;

        let transport = Self {
            sender,
            shared,
            pool,
            metrics,
            local_addr,
            queue_capacity,
        };
        Ok((transport, event_loop))
    }

    /// 取一个空的构建器（复用池中缓冲区）
    pub fn acquire_builder(&self) -> MessageBuilder {
        self.pool.acquire()
    }

    /// 提交已封包的消息（fire-and-forget）
    ///
    /// 构建器所有权转移给事件循环，发送后归还到池中。本方法从不等待网络。
    ///
    /// # 错误
    /// - `LinkError::Protocol(NotFinished)`: 构建器未 `finish()`
    /// - `LinkError::QueueFull`: 提交队列已满，消息被丢弃
    /// - `LinkError::LoopStopped`: 事件循环已停止
    pub fn submit(&self, builder: MessageBuilder) -> Result<(), LinkError> {
        if !builder.is_finished() {
            self.pool.release(builder);
            return Err(ProtocolError::NotFinished.into());
        }
        if self.shared.is_stopped() {
            self.pool.release(builder);
            return Err(LinkError::LoopStopped);
        }

        match self.sender.try_send(builder) {
            Ok(()) => {
                LinkMetrics::add(&self.metrics.messages_submitted, 1);
                self.shared.wake();
                trace!("Message submitted");
                Ok(())
            },
            Err(TrySendError::Full(builder)) => {
                self.pool.release(builder);
                LinkMetrics::add(&self.metrics.messages_dropped, 1);
                Err(LinkError::QueueFull(self.queue_capacity))
            },
            Err(TrySendError::Disconnected(builder)) => {
                self.pool.release(builder);
                Err(LinkError::LoopStopped)
            },
        }
    }

    /// 事件循环控制句柄
    pub fn handle(&self) -> LoopHandle {
        LoopHandle::new(self.shared.clone())
    }

    /// 获取保活令牌
    pub fn work_guard(&self) -> WorkGuard {
        self.handle().work_guard()
    }

    pub fn metrics(&self) -> &Arc<LinkMetrics> {
        &self.metrics
    }

    /// 实际绑定的本地地址
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}
