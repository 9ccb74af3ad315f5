use serde::{Deserialize, Serialize};

use crate::classifier::{EventRanks, TurnDirection, TurnRank};

pub const IS_LOCATED: u32 = 0x0000_0001;
pub const IS_NORTH_LAT: u32 = 0x0000_0002;
pub const IS_EAST_LON: u32 = 0x0000_0004;
pub const IS_TURN_LEFT: u32 = 0x0000_0080;
pub const IS_TURN_RIGHT: u32 = 0x0000_0100;
pub const IS_BRAKE: u32 = 0x0000_0200;
pub const BRAKE_RANK_MASK: u32 = 0x0000_1C00;
pub const TURN_RANK_MASK: u32 = 0x0000_E000;
pub const ROLLOVER_RANK_MASK: u32 = 0x0007_0000;
pub const IS_ROLLOVER: u32 = 0x0008_0000;
pub const SPEEDUP_RANK_MASK: u32 = 0x00E0_0000;

const BRAKE_RANK_SHIFT: u32 = 10;
const TURN_RANK_SHIFT: u32 = 13;
const ROLLOVER_RANK_SHIFT: u32 = 16;
const SPEEDUP_RANK_SHIFT: u32 = 21;

/// Location-derived part of the register
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationFlags {
    pub located: bool,
    pub north: bool,
    pub east: bool,
}

/// Composite drive state.
///
/// Kept as named fields; [`DriveStatus::to_bits`] produces the 32-bit word
/// carried at payload offset 53. Each active flag is derived from its rank,
/// so a flag is set exactly when the rank is non-zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveStatus {
    pub location: LocationFlags,
    pub brake_rank: u8,
    pub turn: TurnRank,
    pub rollover_rank: u8,
    pub speedup_rank: u8,
}

impl DriveStatus {
    pub fn set_location(&mut self, location: LocationFlags) {
        self.location = location;
    }

    pub fn set_brake(&mut self, rank: u8) {
        self.brake_rank = rank & 0x7;
    }

    pub fn set_turn(&mut self, turn: TurnRank) {
        self.turn = turn;
    }

    pub fn set_rollover(&mut self, rank: u8) {
        self.rollover_rank = rank & 0x7;
    }

    pub fn set_speedup(&mut self, rank: u8) {
        self.speedup_rank = rank & 0x7;
    }

    /// Overwrite every event field from one cycle's ranks
    pub fn apply_ranks(&mut self, ranks: &EventRanks) {
        self.set_brake(ranks.brake);
        self.set_turn(ranks.turn);
        self.set_rollover(ranks.rollover);
        self.set_speedup(ranks.speedup);
    }

    pub fn is_braking(&self) -> bool {
        self.brake_rank > 0
    }

    pub fn is_turning_left(&self) -> bool {
        self.turn.is_active() && self.turn.direction == TurnDirection::Left
    }

    pub fn is_turning_right(&self) -> bool {
        self.turn.is_active() && self.turn.direction == TurnDirection::Right
    }

    pub fn is_rolling_over(&self) -> bool {
        self.rollover_rank > 0
    }

    pub fn to_bits(&self) -> u32 {
        let mut bits = 0u32;
        if self.location.located {
            bits |= IS_LOCATED;
        }
        if self.location.north {
            bits |= IS_NORTH_LAT;
        }
        if self.location.east {
            bits |= IS_EAST_LON;
        }
        if self.is_braking() {
            bits |= IS_BRAKE;
        }
        bits |= ((self.brake_rank as u32) << BRAKE_RANK_SHIFT) & BRAKE_RANK_MASK;
        if self.is_turning_left() {
            bits |= IS_TURN_LEFT;
        }
        if self.is_turning_right() {
            bits |= IS_TURN_RIGHT;
        }
        bits |= ((self.turn.severity as u32) << TURN_RANK_SHIFT) & TURN_RANK_MASK;
        if self.is_rolling_over() {
            bits |= IS_ROLLOVER;
        }
        bits |= ((self.rollover_rank as u32) << ROLLOVER_RANK_SHIFT) & ROLLOVER_RANK_MASK;
        bits |= ((self.speedup_rank as u32) << SPEEDUP_RANK_SHIFT) & SPEEDUP_RANK_MASK;
        bits
    }

    /// Rebuild from a wire word. Direction comes from the turn flags.
    pub fn from_bits(bits: u32) -> Self {
        let turn_severity = ((bits & TURN_RANK_MASK) >> TURN_RANK_SHIFT) as u8;
        let direction = if bits & IS_TURN_LEFT != 0 {
            TurnDirection::Left
        } else {
            TurnDirection::Right
        };
        Self {
            location: LocationFlags {
                located: bits & IS_LOCATED != 0,
                north: bits & IS_NORTH_LAT != 0,
                east: bits & IS_EAST_LON != 0,
            },
            brake_rank: ((bits & BRAKE_RANK_MASK) >> BRAKE_RANK_SHIFT) as u8,
            turn: TurnRank::new(direction, turn_severity),
            rollover_rank: ((bits & ROLLOVER_RANK_MASK) >> ROLLOVER_RANK_SHIFT) as u8,
            speedup_rank: ((bits & SPEEDUP_RANK_MASK) >> SPEEDUP_RANK_SHIFT) as u8,
        }
    }
}
