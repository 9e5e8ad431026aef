//! run 命令
//!
//! 建立传输连接后，以固定频率发送同一条关节指令，直到 Ctrl-C 或达到指定周期数。

use super::parse_values;
use anyhow::{Context, Result, anyhow, ensure};
use clap::Args;
use iiwa_driver::{Driver, ParamTable};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// 指令发送参数
#[derive(Args, Debug)]
pub struct RunCommand {
    /// 控制频率（Hz）
    #[arg(short, long, default_value_t = 200.0)]
    pub rate: f64,

    /// 发送周期数（不指定则一直运行到 Ctrl-C）
    #[arg(short, long)]
    pub ticks: Option<u64>,

    /// 关节角（弧度，逗号分隔）
    #[arg(short, long, default_value = "0,0,0,0,0,0,0", allow_hyphen_values = true)]
    pub joints: String,

    /// 力矩反馈（Nm，逗号分隔，可为空），在加速度槽位发送
    #[arg(long, default_value = "", allow_hyphen_values = true)]
    pub torques: String,

    /// 统计日志间隔（秒）
    #[arg(long, default_value_t = 5)]
    pub report_secs: u64,
}

impl RunCommand {
    pub fn execute(&self, params: ParamTable) -> Result<()> {
        ensure!(self.rate > 0.0 && self.rate.is_finite(), "rate must be positive");
        let joints = parse_values(&self.joints).map_err(|e| anyhow!("--joints: {}", e))?;
        let torques = parse_values(&self.torques).map_err(|e| anyhow!("--torques: {}", e))?;

        let running = Arc::new(AtomicBool::new(true));
        let running_handler = running.clone();
        ctrlc::set_handler(move || {
            running_handler.store(false, Ordering::Release);
        })
        .context("设置 Ctrl-C 处理失败")?;

        let mut driver = Driver::new(params);
        driver.construct().context("建立传输连接失败")?;

        driver.set_joint_angles(&joints);
        driver.set_measured_torque(&torques);
        info!(
            "Streaming {} joint angles / {} torques at {} Hz",
            joints.len(),
            torques.len(),
            self.rate
        );

        let ticks = self.control_loop(&driver, &running);

        let metrics = driver.metrics();
        driver.shutdown();
        println!("发送周期: {}", ticks);
        println!(
            "提交成功: {} / {} ({:.1}%)",
            metrics.succeeded,
            metrics.attempted,
            metrics.success_rate()
        );
        if metrics.failed > 0 {
            println!("提交失败: {}", metrics.failed);
        }
        Ok(())
    }

    /// 绝对时间锚点的固定频率循环，返回执行的周期数
    fn control_loop(&self, driver: &Driver, running: &AtomicBool) -> u64 {
        let period = Duration::from_secs_f64(1.0 / self.rate);
        let report_interval = Duration::from_secs(self.report_secs.max(1));
        let mut next_tick = Instant::now();
        let mut last_report = Instant::now();
        let mut ticks = 0u64;

        while running.load(Ordering::Acquire) && self.ticks.is_none_or(|limit| ticks < limit) {
            next_tick += period;

            driver.run_one();
            ticks += 1;

            if last_report.elapsed() >= report_interval {
                let metrics = driver.metrics();
                if let Some(link) = driver.link_metrics() {
                    info!(
                        "ticks={} submitted={} sent={} dropped={} consecutive_failures={}",
                        ticks,
                        link.messages_submitted,
                        link.messages_sent,
                        link.messages_dropped,
                        metrics.consecutive_failures
                    );
                }
                last_report = Instant::now();
            }

            let now = Instant::now();
            if next_tick > now {
                spin_sleep::sleep(next_tick - now);
            } else {
                warn!("Control loop overrun by {:?}", now - next_tick);
                next_tick = now;
            }
        }
        ticks
    }
}
