//! 驱动主体
//!
//! `Driver` 持有参数表、状态存储和（启动后）传输层及其 IO 线程：
//!
//! ```text
//! Uninitialized ──construct()──▶ Running ──shutdown()/Drop──▶ Stopped
//! ```
//!
//! - `set()`/`get()` 在任何状态下都可用
//! - `run_one()` 在传输层建立前是空操作
//! - 析构时释放保活令牌、停止事件循环，并在有限时间内 join IO 线程

use crate::error::DriverError;
use crate::metrics::{DriverMetrics, DriverMetricsSnapshot};
use crate::params::ParamTable;
use crate::state::{ArmState, CommandKind, StateStore};
use iiwa_link::{DuplexChannel, LinkConfig, LinkError, LinkMetricsSnapshot, Transport, WorkGuard};
use iiwa_protocol::{FieldId, MessageBuilder, MessageType, ProtocolError};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{JoinHandle, spawn};
use std::time::Duration;
use tracing::{error, info, trace, warn};

/// IO 线程 join 超时
const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// 连续失败时每隔多少次重复告警一次
const FAILURE_LOG_INTERVAL: u64 = 1000;

/// 带超时的线程 join
trait JoinTimeout {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()>;
}

impl<T: Send + 'static> JoinTimeout for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()> {
        use std::sync::mpsc;

        let (tx, rx) = mpsc::channel();
        // 看门狗线程代为 join；超时后它继续等待，进程退出时回收
        spawn(move || {
            let _ = tx.send(self.join());
        });

        match rx.recv_timeout(timeout) {
            Ok(result) => result.map(|_| ()),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "Thread join timeout",
            ))),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "Watchdog thread exited without result",
            ))),
        }
    }
}

/// 生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// 只持有参数表，没有传输层
    Uninitialized,
    /// 传输层和 IO 线程已启动
    Running,
    /// 已停止（终态）
    Stopped,
}

/// KUKA iiwa JAVA 驱动
///
/// # Example
///
/// ```no_run
/// use iiwa_driver::{Driver, ParamTable};
///
/// let mut driver = Driver::new(ParamTable::default());
/// driver.construct()?;
///
/// driver.set_joint_angles(&[0.0, 0.5, 0.0, -1.2, 0.0, 0.8, 0.0]);
/// driver.set_measured_torque(&[0.0; 7]);
/// driver.run_one();
/// # Ok::<(), iiwa_driver::DriverError>(())
/// ```
#[derive(Debug)]
pub struct Driver {
    params: ParamTable,
    link_config: LinkConfig,
    state: Arc<StateStore>,
    metrics: Arc<DriverMetrics>,
    lifecycle: LifecycleState,
    transport: Option<Transport>,
    work_guard: Option<WorkGuard>,
    io_thread: Option<JoinHandle<()>>,
    /// `run_one()` 的拷贝缓冲区，避免每个周期分配
    scratch: Mutex<Vec<f64>>,
}

impl Driver {
    /// 创建驱动（不建立连接）
    pub fn new(params: ParamTable) -> Self {
        Self {
            params,
            link_config: LinkConfig::default(),
            state: Arc::new(StateStore::new()),
            metrics: Arc::new(DriverMetrics::new()),
            lifecycle: LifecycleState::Uninitialized,
            transport: None,
            work_guard: None,
            io_thread: None,
            scratch: Mutex::new(Vec::with_capacity(16)),
        }
    }

    /// 设置传输层参数（需在 `construct()` 之前）
    pub fn with_link_config(mut self, config: LinkConfig) -> Self {
        self.link_config = config;
        self
    }

    /// 以当前参数表建立传输层并启动 IO 线程
    ///
    /// # 错误
    /// - `DriverError::Connection`: 本地地址无法绑定、地址格式错误等，驱动保持未初始化
    /// - `DriverError::AlreadyRunning`: 已经启动
    /// - `DriverError::Stopped`: 已停止，不能重新启动
    /// - `DriverError::IoThread`: IO 线程创建失败
    pub fn construct(&mut self) -> Result<(), DriverError> {
        match self.lifecycle {
            LifecycleState::Uninitialized => {},
            LifecycleState::Running => return Err(DriverError::AlreadyRunning),
            LifecycleState::Stopped => return Err(DriverError::Stopped),
        }

        let local = self.params.local_transport_address.clone();
        let remote = self.params.remote_transport_address.clone();
        let connection_error = |source: LinkError| DriverError::Connection {
            local: local.clone(),
            remote: remote.clone(),
            source,
        };

        let channel = DuplexChannel::open_str(&local, &remote).map_err(&connection_error)?;
        let (transport, event_loop) =
            Transport::new(channel, self.link_config.clone()).map_err(&connection_error)?;

        // 先拿保活令牌，否则循环启动后会立即因空闲退出
        let work_guard = transport.work_guard();
        let io_thread = event_loop
            .spawn()
            .map_err(|e| DriverError::IoThread(format!("Failed to spawn IO thread: {}", e)))?;

        info!(
            "iiwa driver running: {} <-> {} (bound {})",
            local,
            remote,
            transport.local_addr()
        );

        self.transport = Some(transport);
        self.work_guard = Some(work_guard);
        self.io_thread = Some(io_thread);
        self.lifecycle = LifecycleState::Running;
        Ok(())
    }

    /// 替换参数表后启动
    pub fn construct_with(&mut self, params: ParamTable) -> Result<(), DriverError> {
        match self.lifecycle {
            LifecycleState::Uninitialized => {},
            LifecycleState::Running => return Err(DriverError::AlreadyRunning),
            LifecycleState::Stopped => return Err(DriverError::Stopped),
        }
        self.params = params;
        self.construct()
    }

    /// 写入指令（任何生命周期状态下都可用）
    pub fn set(&self, values: &[f64], kind: CommandKind) {
        self.state.set(values, kind);
    }

    pub fn set_joint_angles(&self, values: &[f64]) {
        self.state.set_joint_angles(values);
    }

    pub fn set_joint_torques(&self, values: &[f64]) {
        self.state.set_joint_torques(values);
    }

    pub fn set_cartesian_wrench(&self, values: &[f64]) {
        self.state.set_cartesian_wrench(values);
    }

    /// 写入测量力矩，`run_one()` 将其放在加速度槽位发送
    pub fn set_measured_torque(&self, values: &[f64]) {
        self.state.set_measured_torque(values);
    }

    /// 读取完整状态快照
    pub fn get(&self) -> ArmState {
        self.state.get()
    }

    /// 从机器人回读关节角
    ///
    /// 没有回读通道，始终返回 `DriverError::NotImplemented`。
    pub fn get_joint_angles(&self) -> Result<Vec<f64>, DriverError> {
        Err(DriverError::NotImplemented(
            "joint angle read-back from the robot".to_string(),
        ))
    }

    /// 执行一个控制周期：把当前指令封包并提交给传输层
    ///
    /// 从不等待网络完成；失败只计数和记日志，不向调用方传播。
    ///
    /// 当前恒返回 `false`，预留给“是否收到新数据”的判断，调用方不应以此判断发送是否成功。
    pub fn run_one(&self) -> bool {
        let Some(transport) = self.transport.as_ref() else {
            return false;
        };

        self.metrics.record_attempt();
        match self.submit_command(transport) {
            Ok(()) => self.metrics.record_success(),
            Err(e) => {
                let consecutive = self.metrics.record_failure();
                if consecutive == 1 || consecutive % FAILURE_LOG_INTERVAL == 0 {
                    warn!("Command submission failed ({} consecutive): {}", consecutive, e);
                } else {
                    trace!("Command submission failed: {}", e);
                }
            },
        }

        false
    }

    fn submit_command(&self, transport: &Transport) -> Result<(), DriverError> {
        let mut builder = transport.acquire_builder();
        self.encode_command(&mut builder)?;
        transport.submit(builder)?;
        trace!("Joint state command submitted");
        Ok(())
    }

    /// 把当前状态编码为一条 `JointState` 消息
    fn encode_command(&self, builder: &mut MessageBuilder) -> Result<(), ProtocolError> {
        let mut scratch = self.scratch.lock();
        self.state.copy_commanded_position_into(&mut scratch);
        builder.push_f64_vector(FieldId::Position, &scratch)?;

        builder.push_f64_vector(FieldId::Velocity, &[])?;

        // 加速度槽位承载测量力矩
        self.state.copy_torque_into(&mut scratch);
        builder.push_f64_vector(FieldId::Acceleration, &scratch)?;
        drop(scratch);

        builder.finish(MessageType::JointState)
    }

    /// 停止传输层并 join IO 线程（幂等）
    ///
    /// 从未启动时立即返回。停止后驱动进入终态，不能再次 `construct()`。
    pub fn shutdown(&mut self) {
        if self.lifecycle == LifecycleState::Stopped {
            return;
        }
        let was_running = self.lifecycle == LifecycleState::Running;
        self.lifecycle = LifecycleState::Stopped;

        // 先释放保活令牌，再通知循环停止
        drop(self.work_guard.take());
        if let Some(transport) = self.transport.as_ref() {
            transport.handle().stop();
        }

        if let Some(handle) = self.io_thread.take()
            && let Err(_e) = handle.join_timeout(JOIN_TIMEOUT)
        {
            error!(
                "IO thread panicked or failed to shut down within {:?}",
                JOIN_TIMEOUT
            );
        }
        self.transport = None;

        if was_running {
            info!("iiwa driver stopped");
        }
    }

    pub fn params(&self) -> &ParamTable {
        &self.params
    }

    /// 共享的状态存储，可以交给其他线程写入指令
    pub fn state(&self) -> &Arc<StateStore> {
        &self.state
    }

    pub fn metrics(&self) -> DriverMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// 传输层指标（未启动时为 `None`）
    pub fn link_metrics(&self) -> Option<LinkMetricsSnapshot> {
        self.transport.as_ref().map(|t| t.metrics().snapshot())
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.lifecycle
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle == LifecycleState::Running
    }

    /// 实际绑定的本地传输地址（未启动时为 `None`）
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.as_ref().map(Transport::local_addr)
    }
}

impl Default for Driver {
    fn default() -> Self {
        Self::new(ParamTable::default())
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.shutdown();
    }
}
