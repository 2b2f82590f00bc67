//! Test types and the metric catalog
//!
//! The catalog is closed: every metric the engine pools, ranks or averages is
//! listed in [`CATALOG`], in composite priority order. Pool keys double as
//! column names in the `reference_records` and `contribution_records`
//! tables, so they must stay valid SQL identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Force-plate test protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TestType {
    /// Countermovement jump
    #[serde(rename = "CMJ")]
    Cmj,
    /// Squat jump
    #[serde(rename = "SJ")]
    Sj,
    /// Hop jump
    #[serde(rename = "HJ")]
    Hj,
    /// Plyometric push-up
    #[serde(rename = "PPU")]
    Ppu,
    /// Isometric mid-thigh pull
    #[serde(rename = "IMTP")]
    Imtp,
}

impl TestType {
    pub const ALL: [TestType; 5] = [TestType::Cmj, TestType::Sj, TestType::Hj, TestType::Ppu, TestType::Imtp];

    /// Test types that make up the overall composite score
    pub const COMPOSITE: [TestType; 4] = [TestType::Sj, TestType::Hj, TestType::Ppu, TestType::Imtp];

    pub fn as_str(self) -> &'static str {
        match self {
            TestType::Cmj => "CMJ",
            TestType::Sj => "SJ",
            TestType::Hj => "HJ",
            TestType::Ppu => "PPU",
            TestType::Imtp => "IMTP",
        }
    }

    /// Catalog entries belonging to this test type, in priority order
    pub fn metrics(self) -> impl Iterator<Item = &'static MetricDefinition> {
        CATALOG.iter().filter(move |def| def.test_type == self)
    }

    pub fn in_composite(self) -> bool {
        TestType::COMPOSITE.contains(&self)
    }
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TestType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CMJ" => Ok(TestType::Cmj),
            "SJ" => Ok(TestType::Sj),
            "HJ" => Ok(TestType::Hj),
            "PPU" => Ok(TestType::Ppu),
            "IMTP" => Ok(TestType::Imtp),
            _ => Err(Error::InvalidInput(format!("Unknown test type: {}", s))),
        }
    }
}

/// A pooled, ranked metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Metric {
    #[serde(rename = "sj_peak_takeoff_power_trial_value")]
    SjPeakPower,
    #[serde(rename = "sj_bodymass_relative_takeoff_power_trial_value")]
    SjRelativePower,
    #[serde(rename = "hop_mean_rsi_trial_value")]
    HjReactiveStrengthIndex,
    #[serde(rename = "ppu_peak_takeoff_force_trial_value")]
    PpuPeakTakeoffForce,
    #[serde(rename = "net_peak_vertical_force_trial_value")]
    ImtpNetPeakForce,
    #[serde(rename = "relative_strength_trial_value")]
    ImtpRelativeStrength,
    #[serde(rename = "peak_takeoff_power_trial_value")]
    CmjPeakPower,
    #[serde(rename = "bodymass_relative_takeoff_power_trial_value")]
    CmjRelativePower,
}

/// Static description of a catalog metric
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricDefinition {
    pub metric: Metric,
    /// Pool key, also the storage column name
    pub key: &'static str,
    /// Column name the force-plate export uses for this metric within its test
    pub source_column: &'static str,
    pub display_name: &'static str,
    pub unit: &'static str,
    pub test_type: TestType,
    /// Participates in the composite score
    pub composite: bool,
    /// Fixed ordering, 1 = first
    pub priority: u8,
}

pub static CATALOG: [MetricDefinition; 8] = [
    MetricDefinition {
        metric: Metric::SjPeakPower,
        key: "sj_peak_takeoff_power_trial_value",
        source_column: "peak_takeoff_power_trial_value",
        display_name: "Peak Power (W)",
        unit: "W",
        test_type: TestType::Sj,
        composite: true,
        priority: 1,
    },
    MetricDefinition {
        metric: Metric::SjRelativePower,
        key: "sj_bodymass_relative_takeoff_power_trial_value",
        source_column: "bodymass_relative_takeoff_power_trial_value",
        display_name: "Peak Power / BM (W/kg)",
        unit: "W/kg",
        test_type: TestType::Sj,
        composite: true,
        priority: 2,
    },
    MetricDefinition {
        metric: Metric::HjReactiveStrengthIndex,
        key: "hop_mean_rsi_trial_value",
        source_column: "hop_mean_rsi_trial_value",
        display_name: "Reactive Strength Index",
        unit: "",
        test_type: TestType::Hj,
        composite: true,
        priority: 3,
    },
    MetricDefinition {
        metric: Metric::PpuPeakTakeoffForce,
        key: "ppu_peak_takeoff_force_trial_value",
        source_column: "peak_takeoff_force_trial_value",
        display_name: "Peak Takeoff Force (N)",
        unit: "N",
        test_type: TestType::Ppu,
        composite: true,
        priority: 4,
    },
    MetricDefinition {
        metric: Metric::ImtpNetPeakForce,
        key: "net_peak_vertical_force_trial_value",
        source_column: "net_peak_vertical_force_trial_value",
        display_name: "Net Peak Force (N)",
        unit: "N",
        test_type: TestType::Imtp,
        composite: true,
        priority: 5,
    },
    MetricDefinition {
        metric: Metric::ImtpRelativeStrength,
        key: "relative_strength_trial_value",
        source_column: "relative_strength_trial_value",
        display_name: "Relative Strength",
        unit: "",
        test_type: TestType::Imtp,
        composite: true,
        priority: 6,
    },
    MetricDefinition {
        metric: Metric::CmjPeakPower,
        key: "peak_takeoff_power_trial_value",
        source_column: "peak_takeoff_power_trial_value",
        display_name: "Peak Power (W)",
        unit: "W",
        test_type: TestType::Cmj,
        composite: false,
        priority: 7,
    },
    MetricDefinition {
        metric: Metric::CmjRelativePower,
        key: "bodymass_relative_takeoff_power_trial_value",
        source_column: "bodymass_relative_takeoff_power_trial_value",
        display_name: "Peak Power / BM (W/kg)",
        unit: "W/kg",
        test_type: TestType::Cmj,
        composite: false,
        priority: 8,
    },
];

impl Metric {
    /// Every metric in priority order
    pub fn all() -> impl Iterator<Item = Metric> {
        CATALOG.iter().map(|def| def.metric)
    }

    pub fn definition(self) -> &'static MetricDefinition {
        let index = match self {
            Metric::SjPeakPower => 0,
            Metric::SjRelativePower => 1,
            Metric::HjReactiveStrengthIndex => 2,
            Metric::PpuPeakTakeoffForce => 3,
            Metric::ImtpNetPeakForce => 4,
            Metric::ImtpRelativeStrength => 5,
            Metric::CmjPeakPower => 6,
            Metric::CmjRelativePower => 7,
        };
        &CATALOG[index]
    }

    pub fn key(self) -> &'static str {
        self.definition().key
    }

    pub fn test_type(self) -> TestType {
        self.definition().test_type
    }

    /// Resolve a column from a session export of `test_type`.
    ///
    /// The pool key wins over the vendor column, since CMJ and SJ share
    /// vendor column names.
    pub fn from_column(test_type: TestType, column: &str) -> Option<Metric> {
        test_type
            .metrics()
            .find(|def| def.key == column)
            .or_else(|| test_type.metrics().find(|def| def.source_column == column))
            .map(|def| def.metric)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Metric {
    type Err = Error;

    /// Parses a pool key
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CATALOG
            .iter()
            .find(|def| def.key == s)
            .map(|def| def.metric)
            .ok_or_else(|| Error::InvalidInput(format!("Unknown metric: {}", s)))
    }
}
