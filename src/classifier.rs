use serde::{Deserialize, Serialize};

/// Highest severity a ladder can emit
pub const MAX_RANK: u8 = 4;

/// Thresholds and run lengths for one debounce ladder.
///
/// Both arrays are ordered most severe first, so index 0 is rank 4 and
/// index 3 is rank 1. A signal strictly above `thresholds[i]` falls in band `i`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LadderConfig {
    pub thresholds: [f32; 4],
    pub run_lengths: [u32; 4],
}

impl LadderConfig {
    pub const fn new(thresholds: [f32; 4]) -> Self {
        Self {
            thresholds,
            run_lengths: [1, 2, 4, 8],
        }
    }
}

/// Thresholds for all four event classes
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Longitudinal deceleration, m/s²
    pub brake: LadderConfig,
    /// Longitudinal acceleration magnitude (signal is negated), m/s²
    pub speedup: LadderConfig,
    /// Yaw rate magnitude, rad/s
    pub turn: LadderConfig,
    /// Tilt away from the upright reference, degrees
    pub rollover: LadderConfig,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            brake: LadderConfig::new([4.0, 2.5, 1.5, 1.0]),
            speedup: LadderConfig::new([4.0, 2.5, 1.5, 1.0]),
            turn: LadderConfig::new([0.45, 0.3, 0.15, 0.1]),
            rollover: LadderConfig::new([35.0, 25.0, 20.0, 15.0]),
        }
    }
}

/// Threshold ladder with per-rank run counters.
///
/// A rank is emitted once its band has been seen `run_length` times in a row
/// without dropping to a milder band; until then the previous output holds.
/// Leaving every band clears all counters and drops the output to 0 at once.
#[derive(Clone, Debug)]
pub struct DebounceLadder {
    config: LadderConfig,
    counters: [u32; 4],
    rank: u8,
}

impl DebounceLadder {
    pub fn new(config: LadderConfig) -> Self {
        Self {
            config,
            counters: [0; 4],
            rank: 0,
        }
    }

    /// Feed one sample. Returns `Some(rank)` when the output was (re)emitted
    /// this cycle, `None` when the previous output was held.
    pub fn update(&mut self, signal: f32) -> Option<u8> {
        let band = self
            .config
            .thresholds
            .iter()
            .position(|&threshold| signal > threshold);

        let Some(band) = band else {
            self.counters = [0; 4];
            self.rank = 0;
            return Some(0);
        };

        // more severe bands lose their streak
        for counter in &mut self.counters[..band] {
            *counter = 0;
        }

        let needed = self.config.run_lengths[band].saturating_sub(1);
        if self.counters[band] < needed {
            self.counters[band] += 1;
            None
        } else {
            self.counters[band] = 0;
            self.rank = MAX_RANK - band as u8;
            Some(self.rank)
        }
    }

    pub fn rank(&self) -> u8 {
        self.rank
    }

    /// Run counters, most severe rank first
    pub fn counters(&self) -> [u32; 4] {
        self.counters
    }
}

/// Direction nibble of a turn rank
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnDirection {
    Right = 0x1,
    Left = 0x2,
}

impl TurnDirection {
    /// Non-positive yaw rate is a right turn
    pub fn from_yaw_rate(yaw_rate: f32) -> Self {
        if yaw_rate <= 0.0 {
            TurnDirection::Right
        } else {
            TurnDirection::Left
        }
    }
}

/// Turn severity plus direction, encoded on the wire as `(direction << 4) | severity`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRank {
    pub direction: TurnDirection,
    pub severity: u8,
}

impl TurnRank {
    pub const NONE: TurnRank = TurnRank {
        direction: TurnDirection::Right,
        severity: 0,
    };

    pub fn new(direction: TurnDirection, severity: u8) -> Self {
        if severity == 0 {
            return Self::NONE;
        }
        Self {
            direction,
            severity: severity.min(MAX_RANK),
        }
    }

    pub fn is_active(&self) -> bool {
        self.severity > 0
    }

    pub fn code(&self) -> u8 {
        if self.severity == 0 {
            0
        } else {
            ((self.direction as u8) << 4) | self.severity
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        if code == 0 {
            return Some(Self::NONE);
        }
        let severity = code & 0x0F;
        if severity == 0 || severity > MAX_RANK {
            return None;
        }
        let direction = match code >> 4 {
            0x1 => TurnDirection::Right,
            0x2 => TurnDirection::Left,
            _ => return None,
        };
        Some(Self {
            direction,
            severity,
        })
    }
}

impl Default for TurnRank {
    fn default() -> Self {
        Self::NONE
    }
}

/// Continuous inputs derived by the fusion step for one cycle
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DynamicsSignals {
    /// Gravity-compensated longitudinal acceleration, m/s²
    pub longitudinal_accel: f32,
    /// Bias-corrected yaw rate, rad/s
    pub yaw_rate: f32,
    /// Filtered XOZ tilt, degrees
    pub tilt_angle: f32,
}

/// Classified ranks for one cycle
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRanks {
    pub brake: u8,
    pub speedup: u8,
    pub turn: TurnRank,
    pub rollover: u8,
}

/// The four independent event ladders
#[derive(Clone, Debug)]
pub struct EventClassifier {
    brake: DebounceLadder,
    speedup: DebounceLadder,
    turn: DebounceLadder,
    rollover: DebounceLadder,
    turn_rank: TurnRank,
}

impl EventClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self {
            brake: DebounceLadder::new(config.brake),
            speedup: DebounceLadder::new(config.speedup),
            turn: DebounceLadder::new(config.turn),
            rollover: DebounceLadder::new(config.rollover),
            turn_rank: TurnRank::NONE,
        }
    }

    pub fn classify(&mut self, signals: &DynamicsSignals) -> EventRanks {
        self.brake.update(signals.longitudinal_accel);
        self.speedup.update(-signals.longitudinal_accel);

        let direction = TurnDirection::from_yaw_rate(signals.yaw_rate);
        if let Some(severity) = self.turn.update(signals.yaw_rate.abs()) {
            self.turn_rank = TurnRank::new(direction, severity);
        }

        self.rollover.update(rollover_metric(signals.tilt_angle));

        self.ranks()
    }

    pub fn ranks(&self) -> EventRanks {
        EventRanks {
            brake: self.brake.rank(),
            speedup: self.speedup.rank(),
            turn: self.turn_rank,
            rollover: self.rollover.rank(),
        }
    }

    pub fn brake(&self) -> &DebounceLadder {
        &self.brake
    }

    pub fn speedup(&self) -> &DebounceLadder {
        &self.speedup
    }

    pub fn turn(&self) -> &DebounceLadder {
        &self.turn
    }

    pub fn rollover(&self) -> &DebounceLadder {
        &self.rollover
    }
}

/// Deviation of a tilt angle from the 90° upright reference
pub fn rollover_metric(tilt_angle: f32) -> f32 {
    (tilt_angle.abs() - 90.0).abs()
}
