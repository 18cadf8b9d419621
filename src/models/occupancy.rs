//! Domain types shared by the cache builder and the query engine.
//!
//! Identifiers are canonical unsigned integers. Anything a caller hands in as text goes
//! through `crate::utils::parse_id` before it reaches one of these newtypes.

use core::fmt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =====================
// Scalar ID newtype wrappers
// =====================

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SurveyId(pub u64);

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MapId(pub u64);

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HardwareId(pub u64);

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageId(pub u64);

impl fmt::Display for SurveyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for MapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for HardwareId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =====================
// Audience segments
// =====================

/// Which population a survey is deployed for.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Audience {
    Staff,
    Student,
}

impl Audience {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "staff" => Some(Audience::Staff),
            "student" => Some(Audience::Student),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Audience::Staff => "staff",
            Audience::Student => "student",
        }
    }

    /// True when a survey carrying `staff_survey` belongs to this audience.
    pub fn admits(self, staff_survey: bool) -> bool {
        match self {
            Audience::Staff => staff_survey,
            Audience::Student => !staff_survey,
        }
    }
}

impl fmt::Display for Audience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Survey listing filter: everything, or one audience segment.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SurveyFilter {
    All,
    Only(Audience),
}

impl SurveyFilter {
    pub fn parse(raw: &str) -> Option<Self> {
        if raw == "all" {
            return Some(SurveyFilter::All);
        }
        Audience::parse(raw).map(SurveyFilter::Only)
    }

    pub fn admits(self, staff_survey: bool) -> bool {
        match self {
            SurveyFilter::All => true,
            SurveyFilter::Only(audience) => audience.admits(staff_survey),
        }
    }
}

// =====================
// Sensor triggers and counts
// =====================

pub const TRIGGER_ABSENT: &str = "Absent";
pub const TRIGGER_OCCUPIED: &str = "Occupied";

/// Last trigger reported by a sensor. Anything that is neither absence nor presence is kept
/// verbatim so it can be counted separately.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TriggerType {
    Absent,
    Occupied,
    Other(String),
}

impl TriggerType {
    pub fn from_raw(raw: &str) -> Self {
        match raw {
            TRIGGER_ABSENT => TriggerType::Absent,
            TRIGGER_OCCUPIED => TriggerType::Occupied,
            other => TriggerType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            TriggerType::Absent => TRIGGER_ABSENT,
            TriggerType::Occupied => TRIGGER_OCCUPIED,
            TriggerType::Other(s) => s.as_str(),
        }
    }

    pub fn occupied(&self) -> bool {
        matches!(self, TriggerType::Occupied)
    }
}

/// Absent / occupied / other tally over a set of sensors.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccupancyCounts {
    pub sensors_absent: u32,
    pub sensors_occupied: u32,
    pub sensors_other: u32,
}

impl OccupancyCounts {
    pub fn record(&mut self, trigger: &TriggerType) {
        match trigger {
            TriggerType::Absent => self.sensors_absent += 1,
            TriggerType::Occupied => self.sensors_occupied += 1,
            TriggerType::Other(_) => self.sensors_other += 1,
        }
    }

    pub fn absorb(&mut self, other: &OccupancyCounts) {
        self.sensors_absent += other.sensors_absent;
        self.sensors_occupied += other.sensors_occupied;
        self.sensors_other += other.sensors_other;
    }

    pub fn total(&self) -> u32 {
        self.sensors_absent + self.sensors_occupied + self.sensors_other
    }
}

/// One time-of-day slot of a historical usage bucket.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageCounts {
    pub sensors_absent: u64,
    pub sensors_occupied: u64,
    pub sensors_total: u64,
}

/// "HH:MM:00" label → counts. `BTreeMap` keeps the labels in clock order.
pub type UsageBuckets = BTreeMap<String, UsageCounts>;
