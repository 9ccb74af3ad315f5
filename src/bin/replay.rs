use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use serde_json::json;

use v2x_dynamics::scheduler::PeriodicTask;
use v2x_dynamics::sensors::{Recording, ReplaySensor};
use v2x_dynamics::tasks::SamplingTask;
use v2x_dynamics::transport::RecordingTransport;
use v2x_dynamics::{MonitorConfig, NodeContext};

#[derive(Parser, Debug)]
#[command(name = "drive_replay")]
#[command(about = "Replay recorded samples through the monitor, one JSON line per cycle")]
struct Args {
    /// Recorded samples (.json or .json.gz)
    #[arg(long)]
    log: PathBuf,

    /// JSON configuration file for filter and classifier settings
    #[arg(long)]
    config: Option<PathBuf>,

    /// Only print cycles that raised an alert
    #[arg(long, default_value_t = false)]
    alerts_only: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => MonitorConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => MonitorConfig::default(),
    };
    let recording = Recording::load(&args.log)
        .with_context(|| format!("loading recording {}", args.log.display()))?;
    let cycles = recording.samples.len();
    let period = config.sampling_period();

    let mut ctx = NodeContext::new(config, Box::new(RecordingTransport::new()));
    let mut task = SamplingTask::new(Box::new(ReplaySensor::new(recording)), period);
    task.setup(&mut ctx)?;

    let mut alert_counts: BTreeMap<String, u64> = BTreeMap::new();
    for cycle in 0..cycles {
        task.run(&mut ctx);
        for protocol in &ctx.last_alerts {
            *alert_counts
                .entry(format!("0x{:02x}", protocol.as_u8()))
                .or_default() += 1;
        }
        if args.alerts_only && ctx.last_alerts.is_empty() {
            continue;
        }

        let Some(out) = ctx.last_cycle() else {
            continue;
        };
        let ranks = ctx.ranks();
        let line = json!({
            "cycle": cycle,
            "t": cycle as f64 * period.as_secs_f64(),
            "angle_xoz": out.xoz.angle,
            "angle_yoz": out.yoz.angle,
            "accel_y": out.accel.y,
            "yaw_rate": out.signals.yaw_rate,
            "brake": ranks.brake,
            "speedup": ranks.speedup,
            "turn": ranks.turn.code(),
            "rollover": ranks.rollover,
            "drive_status": format!("0x{:08x}", ctx.drive_status()),
            "alerts": ctx
                .last_alerts
                .iter()
                .map(|p| format!("0x{:02x}", p.as_u8()))
                .collect::<Vec<_>>(),
        });
        println!("{}", line);
    }
    task.teardown(&mut ctx);

    info!("Replayed {} cycles, alerts: {:?}", cycles, alert_counts);
    Ok(())
}
