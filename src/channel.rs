use std::fmt;

use serde::{Deserialize, Serialize};
use strum_macros::EnumIter;

/// Viewing direction of a light collector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ViewDirection {
    Zenith,
    Nadir,
}
impl fmt::Display for ViewDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewDirection::Zenith => write!(f, "zen"),
            ViewDirection::Nadir => write!(f, "nad"),
        }
    }
}
/// Detector type behind a spectrometer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Detector {
    Silicon,
    InGaAs,
}
impl fmt::Display for Detector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Detector::Silicon => write!(f, "si"),
            Detector::InGaAs => write!(f, "in"),
        }
    }
}
/// Radiometer channel, in storage order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, Serialize, Deserialize)]
pub enum Channel {
    ZenithSilicon,
    ZenithInGaAs,
    NadirSilicon,
    NadirInGaAs,
}
impl Channel {
    pub fn direction(&self) -> ViewDirection {
        match self {
            Channel::ZenithSilicon | Channel::ZenithInGaAs => ViewDirection::Zenith,
            Channel::NadirSilicon | Channel::NadirInGaAs => ViewDirection::Nadir,
        }
    }
    pub fn detector(&self) -> Detector {
        match self {
            Channel::ZenithSilicon | Channel::NadirSilicon => Detector::Silicon,
            Channel::ZenithInGaAs | Channel::NadirInGaAs => Detector::InGaAs,
        }
    }
    /// Column of this channel in the decoded arrays
    pub fn index(&self) -> usize {
        *self as usize
    }
    /// Block position of this channel in the on-wire record
    pub fn wire_position(&self) -> usize {
        match self {
            Channel::ZenithSilicon => 0,
            Channel::NadirSilicon => 1,
            Channel::ZenithInGaAs => 2,
            Channel::NadirInGaAs => 3,
        }
    }
}
impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.direction(), self.detector())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn storage_order() {
        let indices: Vec<_> = Channel::iter().map(|c| c.index()).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }
    #[test]
    fn wire_permutation() {
        let wire: Vec<_> = Channel::iter().map(|c| c.wire_position()).collect();
        assert_eq!(wire, vec![0, 2, 1, 3]);
    }
    #[test]
    fn display() {
        assert_eq!(Channel::ZenithSilicon.to_string(), "zen_si");
        assert_eq!(Channel::NadirInGaAs.to_string(), "nad_in");
    }
}
