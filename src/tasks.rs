use std::time::{Duration, Instant};

use chrono::Utc;
use log::{debug, error, info, warn};

use crate::classifier::EventRanks;
use crate::config::MonitorConfig;
use crate::dispatcher::AlertDispatcher;
use crate::drive_status::DriveStatus;
use crate::error::Result;
use crate::message::{OutboundMessage, ProtocolId, VehicleRecord};
use crate::neighbor::NeighborTable;
use crate::pipeline::{CycleOutput, MonitorPipeline};
use crate::scheduler::{PeriodicTask, Scheduler, TaskId};
use crate::sensors::SensorSource;
use crate::transport::Transport;
use crate::vehicle::VehicleState;

/// State shared by the periodic tasks. Owned by the scheduler loop, so
/// handlers get exclusive access in turn and nothing needs locking.
pub struct NodeContext {
    pub config: MonitorConfig,
    pub vehicle: VehicleState,
    pub drive_status: DriveStatus,
    pub ranks: EventRanks,
    pub last_cycle: Option<CycleOutput>,
    pub last_alerts: Vec<ProtocolId>,
    pub neighbors: NeighborTable,
    pub transport: Box<dyn Transport>,
}

impl NodeContext {
    pub fn new(config: MonitorConfig, transport: Box<dyn Transport>) -> Self {
        let mut vehicle = VehicleState::new(&config.vehicle.plate);
        if let Some(fix) = &config.vehicle.static_location {
            vehicle.apply_fix(fix);
        }
        let mut drive_status = DriveStatus::default();
        drive_status.set_location(vehicle.location_flags());

        Self {
            config,
            vehicle,
            drive_status,
            ranks: EventRanks::default(),
            last_cycle: None,
            last_alerts: Vec::new(),
            neighbors: NeighborTable::new(),
            transport,
        }
    }

    /// Current drive-status word as it would go on the wire
    pub fn drive_status(&self) -> u32 {
        self.drive_status.to_bits()
    }

    pub fn ranks(&self) -> EventRanks {
        self.ranks
    }

    /// Converted sample and filter output of the latest sampling cycle
    pub fn last_cycle(&self) -> Option<&CycleOutput> {
        self.last_cycle.as_ref()
    }
}

// ===== Sampling =====

/// Reads the sensor, runs the fusion pipeline and dispatches alerts
pub struct SamplingTask {
    sensor: Box<dyn SensorSource>,
    pipeline: Option<MonitorPipeline>,
    dispatcher: AlertDispatcher,
    period: Duration,
}

impl SamplingTask {
    pub fn new(sensor: Box<dyn SensorSource>, period: Duration) -> Self {
        Self {
            sensor,
            pipeline: None,
            dispatcher: AlertDispatcher::new(),
            period,
        }
    }

    pub fn dispatcher(&self) -> &AlertDispatcher {
        &self.dispatcher
    }
}

impl PeriodicTask<NodeContext> for SamplingTask {
    fn name(&self) -> &'static str {
        "sampling"
    }

    fn period(&self) -> Duration {
        self.period
    }

    fn setup(&mut self, ctx: &mut NodeContext) -> Result<()> {
        self.sensor.initialize().map_err(|e| {
            error!("Sensor initialization failed: {}", e);
            e
        })?;

        // filter state survives a stop/start; only the first start calibrates
        if self.pipeline.is_none() {
            let bias = self.sensor.calibrate();
            info!(
                "Gyro bias: x={:.3} y={:.3} z={:.3} deg/s",
                bias.x(),
                bias.y(),
                bias.z()
            );
            self.pipeline = Some(MonitorPipeline::new(
                ctx.config.kalman,
                ctx.config.classifier,
                bias,
            ));
        }
        Ok(())
    }

    fn run(&mut self, ctx: &mut NodeContext) {
        let Some(pipeline) = self.pipeline.as_mut() else {
            warn!("Sampling ran before setup");
            return;
        };

        let raw = self.sensor.read_raw();
        let out = pipeline.process(&raw);

        ctx.vehicle.set_accel(out.accel);
        ctx.drive_status.set_location(ctx.vehicle.location_flags());
        ctx.last_alerts = self.dispatcher.dispatch(
            ctx.transport.as_mut(),
            &ctx.vehicle,
            &mut ctx.drive_status,
            &out.ranks,
        );
        ctx.ranks = out.ranks;
        ctx.last_cycle = Some(out);
    }

    fn teardown(&mut self, _ctx: &mut NodeContext) {
        self.sensor.shutdown();
    }
}

// ===== Periodic broadcast =====

/// Sends the single-hop vehicle status and takes in what neighbours sent
pub struct BroadcastTask {
    period: Duration,
}

impl BroadcastTask {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }
}

impl PeriodicTask<NodeContext> for BroadcastTask {
    fn name(&self) -> &'static str {
        "broadcast"
    }

    fn period(&self) -> Duration {
        self.period
    }

    fn run(&mut self, ctx: &mut NodeContext) {
        let now = Utc::now();
        for message in ctx.transport.poll_incoming() {
            let own = message
                .record()
                .map(|r| r.plate == ctx.vehicle.plate)
                .unwrap_or(false);
            if !own {
                ctx.neighbors.ingest(&message, now);
            }
        }

        let record = VehicleRecord::from_state(&ctx.vehicle, &ctx.drive_status);
        let message = OutboundMessage::new(
            ProtocolId::PeriodicBroadcast,
            ctx.transport.sequence_number(),
            &record,
        );
        match ctx.transport.broadcast_send(&message) {
            Ok(bytes) => debug!("Status broadcast seq {} ({} bytes)", message.sequence, bytes),
            Err(e) => warn!("Status broadcast failed: {}", e),
        }
    }
}

// ===== Neighbour expiry =====

pub struct NeighborExpiryTask {
    period: Duration,
}

impl NeighborExpiryTask {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }
}

impl PeriodicTask<NodeContext> for NeighborExpiryTask {
    fn name(&self) -> &'static str {
        "neighbor-expiry"
    }

    fn period(&self) -> Duration {
        self.period
    }

    fn run(&mut self, ctx: &mut NodeContext) {
        let removed = ctx.neighbors.expire(
            Utc::now(),
            ctx.config.neighbor_expiry_secs,
            ctx.config.expiry_rule,
        );
        if removed > 0 {
            debug!("{} neighbours expired, {} remain", removed, ctx.neighbors.len());
        }
    }
}

/// Ids of the three node tasks inside a scheduler
#[derive(Clone, Copy, Debug)]
pub struct NodeTasks {
    pub sampling: TaskId,
    pub broadcast: TaskId,
    pub neighbor_expiry: TaskId,
}

impl NodeTasks {
    /// Register the node's tasks, all stopped
    pub fn register(
        scheduler: &mut Scheduler<NodeContext>,
        config: &MonitorConfig,
        sensor: Box<dyn SensorSource>,
    ) -> Self {
        Self {
            sampling: scheduler.add(Box::new(SamplingTask::new(sensor, config.sampling_period()))),
            broadcast: scheduler.add(Box::new(BroadcastTask::new(config.broadcast_period()))),
            neighbor_expiry: scheduler.add(Box::new(NeighborExpiryTask::new(
                config.neighbor_period(),
            ))),
        }
    }

    /// Start sampling first; a sensor failure aborts before anything is sent
    pub fn start_all(
        &self,
        scheduler: &mut Scheduler<NodeContext>,
        ctx: &mut NodeContext,
        now: Instant,
    ) -> Result<()> {
        scheduler.start(self.sampling, ctx, now)?;
        scheduler.start(self.broadcast, ctx, now)?;
        scheduler.start(self.neighbor_expiry, ctx, now)?;
        Ok(())
    }
}
