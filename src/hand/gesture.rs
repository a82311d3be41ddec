//! Finger state classification and mode selection.

use std::fmt;

use itertools::Itertools;

use super::landmark::{LandmarkIdx, LandmarkList};

/// The landmarks at the tips of the four fingers (everything but the thumb).
const FINGER_TIPS: [LandmarkIdx; 4] = [
    LandmarkIdx::IndexFingerTip,
    LandmarkIdx::MiddleFingerTip,
    LandmarkIdx::RingFingerTip,
    LandmarkIdx::PinkyTip,
];

/// Which fingers of a hand are extended ("up").
///
/// The flags are ordered thumb, index, middle, ring, pinky.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FingerStates([bool; 5]);

impl FingerStates {
    pub const fn new(flags: [bool; 5]) -> Self {
        Self(flags)
    }

    pub fn as_array(&self) -> [bool; 5] {
        self.0
    }

    pub fn thumb(&self) -> bool {
        self.0[0]
    }

    pub fn index(&self) -> bool {
        self.0[1]
    }

    pub fn middle(&self) -> bool {
        self.0[2]
    }

    pub fn ring(&self) -> bool {
        self.0[3]
    }

    pub fn pinky(&self) -> bool {
        self.0[4]
    }

    /// Returns the number of extended fingers.
    pub fn count(&self) -> usize {
        self.0.iter().filter(|up| **up).count()
    }
}

/// Formats the flags as a string of `0`s and `1`s, thumb first (eg. `01100`).
impl fmt::Display for FingerStates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            self.0.iter().map(|up| if *up { '1' } else { '0' }).format("")
        )
    }
}

/// Classifies each finger of `hand` as up or down.
///
/// The thumb counts as up when its tip lies to the right of its MCP joint in the image. This only
/// works for one hand orientation, but is enough to keep the thumb out of the other decisions.
/// The other fingers are up when their tip lies above their PIP joint.
pub fn fingers_up(hand: &LandmarkList) -> FingerStates {
    let mut flags = [false; 5];
    flags[0] = hand.point(LandmarkIdx::ThumbTip).x > hand.point(LandmarkIdx::ThumbMcp).x;
    for (flag, tip) in flags[1..].iter_mut().zip(FINGER_TIPS) {
        let pip = tip as usize - 2;
        *flag = hand.point(tip).y < hand.points()[pip].y;
    }
    FingerStates(flags)
}

/// The interaction mode selected by a hand pose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Index finger up, middle finger down: the index fingertip steers the cursor.
    Move,
    /// Index and middle finger up: pinching them together clicks.
    Click,
    /// No usable pose (or no hand at all).
    Idle,
}

impl Mode {
    pub fn from_fingers(fingers: FingerStates) -> Self {
        match (fingers.index(), fingers.middle()) {
            (true, false) => Mode::Move,
            (true, true) => Mode::Click,
            (false, _) => Mode::Idle,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Move => "move",
            Mode::Click => "click",
            Mode::Idle => "idle",
        })
    }
}
