// Operator mode vector
//
// Wire layout is a flat integer array:
//   [0] control, [1] speed level, [2] speed max, [3] flipper select bits,
//   [4] flipper status, [5] crawler pose clear
// Any other length reads as all defaults.

use tracing::debug;

pub const MODE_LEN: usize = 6;

const INDEX_CONTROL: usize = 0;
const INDEX_SPEED_LEVEL: usize = 1;
const INDEX_SPEED_MAX: usize = 2;
const INDEX_FLIPPER_SELECT: usize = 3;
const INDEX_FLIPPER_STATUS: usize = 4;
const INDEX_POSE_CLEAR: usize = 5;

const BIT_FR: i32 = 0;
const BIT_FL: i32 = 1;
const BIT_BR: i32 = 2;
const BIT_BL: i32 = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Control {
    #[default]
    Drive,
    Arm,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SpeedLevel {
    #[default]
    Low,
    Mid,
    High,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FlipperStatus {
    #[default]
    Stay,
    Up,
    Down,
}

/// Which flippers the operator currently drives
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlipperSelect {
    pub front_right: bool,
    pub front_left: bool,
    pub back_right: bool,
    pub back_left: bool,
}

impl FlipperSelect {
    pub fn from_bits(bits: i32) -> Self {
        Self {
            front_right: (bits >> BIT_FR) & 1 == 1,
            front_left: (bits >> BIT_FL) & 1 == 1,
            back_right: (bits >> BIT_BR) & 1 == 1,
            back_left: (bits >> BIT_BL) & 1 == 1,
        }
    }

    pub fn bits(&self) -> i32 {
        (i32::from(self.front_right) << BIT_FR)
            | (i32::from(self.front_left) << BIT_FL)
            | (i32::from(self.back_right) << BIT_BR)
            | (i32::from(self.back_left) << BIT_BL)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Mode {
    pub control: Control,
    pub speed_level: SpeedLevel,
    pub speed_max: bool,
    pub flipper_select: FlipperSelect,
    pub flipper_status: FlipperStatus,
    pub pose_clear: bool,
}

impl Mode {
    /// Decode a received mode vector
    pub fn from_slice(data: &[i32]) -> Self {
        if data.len() != MODE_LEN {
            debug!("Mode vector has {} elements, using defaults", data.len());
            return Self::default();
        }

        Self {
            control: match data[INDEX_CONTROL] {
                1 => Control::Arm,
                _ => Control::Drive,
            },
            speed_level: match data[INDEX_SPEED_LEVEL] {
                1 => SpeedLevel::Mid,
                2 => SpeedLevel::High,
                _ => SpeedLevel::Low,
            },
            speed_max: data[INDEX_SPEED_MAX] == 1,
            flipper_select: FlipperSelect::from_bits(data[INDEX_FLIPPER_SELECT]),
            flipper_status: match data[INDEX_FLIPPER_STATUS] {
                1 => FlipperStatus::Up,
                2 => FlipperStatus::Down,
                _ => FlipperStatus::Stay,
            },
            pose_clear: data[INDEX_POSE_CLEAR] == 1,
        }
    }

    pub fn to_vec(&self) -> Vec<i32> {
        let mut data = vec![0; MODE_LEN];
        data[INDEX_CONTROL] = self.control as i32;
        data[INDEX_SPEED_LEVEL] = self.speed_level as i32;
        data[INDEX_SPEED_MAX] = i32::from(self.speed_max);
        data[INDEX_FLIPPER_SELECT] = self.flipper_select.bits();
        data[INDEX_FLIPPER_STATUS] = self.flipper_status as i32;
        data[INDEX_POSE_CLEAR] = i32::from(self.pose_clear);
        data
    }

    /// Watchdog action for a silent mode input: only max speed is dropped
    pub fn failsafe(&self) -> Self {
        Self {
            speed_max: false,
            ..*self
        }
    }
}

/// Collapse the mode vectors received within one cycle into the latest one.
///
/// Pose clear is a one-shot request, so it survives if any sample carried it.
pub fn merge_mode_samples(samples: Vec<Vec<i32>>) -> Option<Vec<i32>> {
    let pose_clear = samples
        .iter()
        .any(|data| data.len() == MODE_LEN && data[INDEX_POSE_CLEAR] == 1);
    let mut latest = samples.into_iter().last()?;
    if pose_clear && latest.len() == MODE_LEN {
        latest[INDEX_POSE_CLEAR] = 1;
    }
    Some(latest)
}
