use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};

use v2x_dynamics::config::SensorKind;
use v2x_dynamics::neighbor::ExpiryRule;
use v2x_dynamics::scheduler::Scheduler;
use v2x_dynamics::sensors::open_sensor;
use v2x_dynamics::transport::UdpTransport;
use v2x_dynamics::vehicle::decode_plate;
use v2x_dynamics::{MonitorConfig, NodeContext, NodeTasks};

#[derive(Parser, Debug)]
#[command(name = "v2x_monitor")]
#[command(about = "V2X vehicle-dynamics monitor", long_about = None)]
struct Args {
    /// Duration in seconds (0 = until Ctrl-C)
    #[arg(value_name = "SECONDS", default_value = "0")]
    duration: u64,

    /// JSON configuration file; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Vehicle plate carried in every message
    #[arg(long)]
    plate: Option<String>,

    /// Replay a recorded sample file (.json or .json.gz) instead of the simulated sensor
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Local UDP address to bind
    #[arg(long)]
    bind: Option<String>,

    /// Destination for over-the-air broadcasts
    #[arg(long)]
    broadcast_addr: Option<String>,

    /// Destination for companion-device status
    #[arg(long)]
    companion_addr: Option<String>,

    /// Neighbour expiry threshold in seconds
    #[arg(long)]
    expiry_secs: Option<f64>,

    /// Use the legacy neighbour expiry comparison
    #[arg(long, default_value_t = false)]
    legacy_expiry: bool,
}

impl Args {
    fn into_config(self) -> Result<MonitorConfig> {
        let mut config = match &self.config {
            Some(path) => MonitorConfig::load(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => MonitorConfig::default(),
        };
        if let Some(plate) = self.plate {
            config.vehicle.plate = plate;
        }
        if let Some(path) = self.replay {
            config.sensor = SensorKind::Replay { path };
        }
        if let Some(bind) = self.bind {
            config.transport.bind_addr = bind;
        }
        if let Some(addr) = self.broadcast_addr {
            config.transport.broadcast_addr = addr;
        }
        if let Some(addr) = self.companion_addr {
            config.transport.companion_addr = addr;
        }
        if let Some(secs) = self.expiry_secs {
            config.neighbor_expiry_secs = secs;
        }
        if self.legacy_expiry {
            config.expiry_rule = ExpiryRule::Legacy;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let duration = args.duration;
    let config = args.into_config()?;

    info!(
        "V2X monitor starting as {} (sensor {:?}, expiry {:?} after {:.1}s)",
        config.vehicle.plate, config.sensor, config.expiry_rule, config.neighbor_expiry_secs
    );

    let transport = UdpTransport::bind(config.transport.clone()).context("opening transport")?;
    let sensor = open_sensor(&config.sensor).context("opening sensor")?;

    let mut scheduler = Scheduler::new();
    let tasks = NodeTasks::register(&mut scheduler, &config, sensor);
    let mut ctx = NodeContext::new(config, Box::new(transport));

    let now = tokio::time::Instant::now().into_std();
    if let Err(e) = tasks.start_all(&mut scheduler, &mut ctx, now) {
        error!("Startup failed: {}", e);
        scheduler.stop_all(&mut ctx);
        return Err(e.into());
    }

    let shutdown = async move {
        if duration == 0 {
            let _ = tokio::signal::ctrl_c().await;
        } else {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = tokio::time::sleep(Duration::from_secs(duration)) => {}
            }
        }
    };
    scheduler.run_until(&mut ctx, shutdown).await;
    scheduler.stop_all(&mut ctx);

    info!(
        "Stopped after {} sampling cycles; final status 0x{:08x}, {} neighbours",
        scheduler.runs(tasks.sampling),
        ctx.drive_status(),
        ctx.neighbors.len()
    );
    for neighbor in ctx.neighbors.iter() {
        info!(
            "  {} last seen {}",
            decode_plate(&neighbor.plate),
            neighbor.last_seen.format("%H:%M:%S%.3f")
        );
    }
    Ok(())
}
