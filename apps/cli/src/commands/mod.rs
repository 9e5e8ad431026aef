//! CLI 命令实现

mod params;
mod run;

pub use params::ParamsCommand;
pub use run::RunCommand;

use anyhow::{Context, Result};
use iiwa_driver::ParamTable;
use std::path::Path;

/// 加载参数表：未指定配置文件时使用默认值
pub fn load_params(config: Option<&Path>) -> Result<ParamTable> {
    match config {
        Some(path) => ParamTable::load_from_file(path)
            .with_context(|| format!("读取配置文件失败: {}", path.display())),
        None => Ok(ParamTable::default()),
    }
}

/// 解析逗号分隔的浮点数列表
pub fn parse_values(s: &str) -> Result<Vec<f64>, String> {
    if s.trim().is_empty() {
        return Ok(Vec::new());
    }
    s.split(',')
        .map(|v| v.trim().parse::<f64>().map_err(|e| format!("invalid value {:?}: {}", v.trim(), e)))
        .collect()
}
