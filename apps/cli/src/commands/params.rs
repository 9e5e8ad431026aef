//! params 命令
//!
//! 打印生效的参数表

use anyhow::Result;
use clap::Args;
use iiwa_driver::ParamTable;

#[derive(Args, Debug)]
pub struct ParamsCommand {
    /// 以 TOML 格式输出（可直接保存为配置文件）
    #[arg(long)]
    pub toml: bool,
}

impl ParamsCommand {
    pub fn execute(&self, params: &ParamTable) -> Result<()> {
        if self.toml {
            print!("{}", params.to_toml_string()?);
        } else {
            print!("{}", params);
        }
        Ok(())
    }
}
