//! 驱动参数表
//!
//! 12 个字符串字段，顺序固定，构造后不可变。默认值对应 KUKA 控制柜的
//! 出厂网络配置。这里不做任何校验：格式错误的地址会在 `construct()`
//! 时以 `DriverError::Connection` 的形式暴露。
//!
//! # 配置文件
//!
//! ```toml
//! remote_transport_address = "tcp://192.168.1.20:30010"
//! command_mode = "FRI"
//! ```
//!
//! 未出现的键保持默认值。

use crate::error::DriverError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

/// 参数索引（与字段顺序一致）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamIndex {
    RobotTipName = 0,
    RobotTargetName,
    RobotTargetBaseName,
    LocalTransportAddress,
    RemoteTransportAddress,
    LocalLowLevelAddress,
    LocalLowLevelPort,
    RemoteLowLevelAddress,
    RemoteLowLevelPort,
    CommandMode,
    MonitorMode,
    KinematicsGroupName,
}

impl ParamIndex {
    /// 全部索引，按字段顺序
    pub const ALL: [ParamIndex; 12] = [
        ParamIndex::RobotTipName,
        ParamIndex::RobotTargetName,
        ParamIndex::RobotTargetBaseName,
        ParamIndex::LocalTransportAddress,
        ParamIndex::RemoteTransportAddress,
        ParamIndex::LocalLowLevelAddress,
        ParamIndex::LocalLowLevelPort,
        ParamIndex::RemoteLowLevelAddress,
        ParamIndex::RemoteLowLevelPort,
        ParamIndex::CommandMode,
        ParamIndex::MonitorMode,
        ParamIndex::KinematicsGroupName,
    ];

    /// 配置文件中的键名
    pub fn key(self) -> &'static str {
        match self {
            ParamIndex::RobotTipName => "robot_tip_name",
            ParamIndex::RobotTargetName => "robot_target_name",
            ParamIndex::RobotTargetBaseName => "robot_target_base_name",
            ParamIndex::LocalTransportAddress => "local_transport_address",
            ParamIndex::RemoteTransportAddress => "remote_transport_address",
            ParamIndex::LocalLowLevelAddress => "local_low_level_address",
            ParamIndex::LocalLowLevelPort => "local_low_level_port",
            ParamIndex::RemoteLowLevelAddress => "remote_low_level_address",
            ParamIndex::RemoteLowLevelPort => "remote_low_level_port",
            ParamIndex::CommandMode => "command_mode",
            ParamIndex::MonitorMode => "monitor_mode",
            ParamIndex::KinematicsGroupName => "kinematics_group_name",
        }
    }
}

/// 驱动参数表
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ParamTable {
    /// 末端工具坐标系名
    pub robot_tip_name: String,
    /// 目标坐标系名
    pub robot_target_name: String,
    /// 目标基座坐标系名
    pub robot_target_base_name: String,
    /// 本地传输地址（绑定）
    pub local_transport_address: String,
    /// 远端传输地址（连接，机器人控制柜上的 JAVA 服务）
    pub remote_transport_address: String,
    /// 本地底层（FRI/KONI）地址
    pub local_low_level_address: String,
    /// 本地底层端口
    pub local_low_level_port: String,
    /// 远端底层地址
    pub remote_low_level_address: String,
    /// 远端底层端口
    pub remote_low_level_port: String,
    /// 指令模式
    pub command_mode: String,
    /// 监控模式
    pub monitor_mode: String,
    /// 运动学组名
    pub kinematics_group_name: String,
}

impl Default for ParamTable {
    fn default() -> Self {
        Self {
            robot_tip_name: "RobotMillTip".to_string(),
            robot_target_name: "RobotMillTipTarget".to_string(),
            robot_target_base_name: "Robotiiwa".to_string(),
            local_transport_address: "tcp://0.0.0.0:30010".to_string(),
            remote_transport_address: "tcp://172.31.1.147:30010".to_string(),
            local_low_level_address: "192.170.10.100".to_string(),
            local_low_level_port: "30200".to_string(),
            remote_low_level_address: "192.170.10.2".to_string(),
            remote_low_level_port: "30200".to_string(),
            command_mode: "JAVA".to_string(),
            monitor_mode: "JAVA".to_string(),
            kinematics_group_name: "IK_Group1_iiwa".to_string(),
        }
    }
}

impl ParamTable {
    /// 按索引读取
    pub fn get(&self, index: ParamIndex) -> &str {
        match index {
            ParamIndex::RobotTipName => &self.robot_tip_name,
            ParamIndex::RobotTargetName => &self.robot_target_name,
            ParamIndex::RobotTargetBaseName => &self.robot_target_base_name,
            ParamIndex::LocalTransportAddress => &self.local_transport_address,
            ParamIndex::RemoteTransportAddress => &self.remote_transport_address,
            ParamIndex::LocalLowLevelAddress => &self.local_low_level_address,
            ParamIndex::LocalLowLevelPort => &self.local_low_level_port,
            ParamIndex::RemoteLowLevelAddress => &self.remote_low_level_address,
            ParamIndex::RemoteLowLevelPort => &self.remote_low_level_port,
            ParamIndex::CommandMode => &self.command_mode,
            ParamIndex::MonitorMode => &self.monitor_mode,
            ParamIndex::KinematicsGroupName => &self.kinematics_group_name,
        }
    }

    /// 全部字段，按固定顺序
    pub fn iter(&self) -> impl Iterator<Item = (ParamIndex, &str)> + '_ {
        ParamIndex::ALL.into_iter().map(move |index| (index, self.get(index)))
    }

    /// 返回替换了一个字段的副本
    pub fn with(mut self, index: ParamIndex, value: impl Into<String>) -> Self {
        let value = value.into();
        let slot = match index {
            ParamIndex::RobotTipName => &mut self.robot_tip_name,
            ParamIndex::RobotTargetName => &mut self.robot_target_name,
            ParamIndex::RobotTargetBaseName => &mut self.robot_target_base_name,
            ParamIndex::LocalTransportAddress => &mut self.local_transport_address,
            ParamIndex::RemoteTransportAddress => &mut self.remote_transport_address,
            ParamIndex::LocalLowLevelAddress => &mut self.local_low_level_address,
            ParamIndex::LocalLowLevelPort => &mut self.local_low_level_port,
            ParamIndex::RemoteLowLevelAddress => &mut self.remote_low_level_address,
            ParamIndex::RemoteLowLevelPort => &mut self.remote_low_level_port,
            ParamIndex::CommandMode => &mut self.command_mode,
            ParamIndex::MonitorMode => &mut self.monitor_mode,
            ParamIndex::KinematicsGroupName => &mut self.kinematics_group_name,
        };
        *slot = value;
        self
    }

    pub fn with_local_transport_address(self, address: impl Into<String>) -> Self {
        self.with(ParamIndex::LocalTransportAddress, address)
    }

    pub fn with_remote_transport_address(self, address: impl Into<String>) -> Self {
        self.with(ParamIndex::RemoteTransportAddress, address)
    }

    /// 从 TOML 文本解析（缺失的键取默认值）
    pub fn from_toml_str(content: &str) -> Result<Self, DriverError> {
        Ok(toml::from_str(content)?)
    }

    /// 从 TOML 文件加载
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, DriverError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// 序列化为 TOML 文本
    pub fn to_toml_string(&self) -> Result<String, DriverError> {
        Ok(toml::to_string(self)?)
    }
}

impl fmt::Display for ParamTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, value) in self.iter() {
            writeln!(f, "{:<26} = {}", index.key(), value)?;
        }
        Ok(())
    }
}
