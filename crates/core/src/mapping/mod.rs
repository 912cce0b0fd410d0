use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::DanceError;

/// Physical action the robot can perform on a beat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Move {
    Forward,
    ForwardSlow,
    Back,
    Right,
    RightSlow,
    Left,
    LeftSlow,
}

impl Move {
    pub const ALL: [Move; 7] = [
        Move::Forward,
        Move::ForwardSlow,
        Move::Back,
        Move::Right,
        Move::RightSlow,
        Move::Left,
        Move::LeftSlow,
    ];

    /// Token used for this move in move list files.
    pub fn token(self) -> &'static str {
        match self {
            Self::Forward => "F",
            Self::ForwardSlow => "FS",
            Self::Back => "B",
            Self::Right => "R",
            Self::RightSlow => "RS",
            Self::Left => "L",
            Self::LeftSlow => "LS",
        }
    }

    pub fn is_slow(self) -> bool {
        matches!(self, Self::ForwardSlow | Self::RightSlow | Self::LeftSlow)
    }

    /// Wheel command for this move at the given baseline intensity.
    pub fn drive(self, intensity: u8) -> DriveCommand {
        let duty = if self.is_slow() { intensity / 2 } else { intensity };
        let (left, right) = match self {
            Self::Forward | Self::ForwardSlow => (Direction::Forward, Direction::Forward),
            Self::Back => (Direction::Reverse, Direction::Reverse),
            Self::Right | Self::RightSlow => (Direction::Forward, Direction::Reverse),
            Self::Left | Self::LeftSlow => (Direction::Reverse, Direction::Forward),
        };

        DriveCommand {
            left: WheelDrive {
                direction: left,
                duty,
            },
            right: WheelDrive {
                direction: right,
                duty,
            },
        }
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Forward => "forward",
            Self::ForwardSlow => "forward-slow",
            Self::Back => "back",
            Self::Right => "right",
            Self::RightSlow => "right-slow",
            Self::Left => "left",
            Self::LeftSlow => "left-slow",
        };
        f.write_str(name)
    }
}

impl FromStr for Move {
    type Err = DanceError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|candidate| candidate.token() == token)
            .ok_or_else(|| DanceError::msg(format!("`{token}` is not a move")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Forward,
    Reverse,
}

/// Direction and PWM duty (percent) for one wheel motor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WheelDrive {
    pub direction: Direction,
    pub duty: u8,
}

/// Differential drive command for the two wheel motors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveCommand {
    pub left: WheelDrive,
    pub right: WheelDrive,
}
