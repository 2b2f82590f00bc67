//! Competitive-tier cohorts and the aggregate pseudo-cohort

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Segmentation key for percentile comparisons.
///
/// The four tiers are closed; `Overall` is the reserved aggregate that
/// unions the samples of every tier. It is rebuilt and queried through the
/// same path as a tier, but an athlete can never belong to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Cohort {
    #[serde(rename = "Youth")]
    Youth,
    #[serde(rename = "High School", alias = "HighSchool")]
    HighSchool,
    #[serde(rename = "College")]
    College,
    #[serde(rename = "Pro")]
    Pro,
    #[serde(rename = "Overall")]
    Overall,
}

impl Cohort {
    /// Athlete-assignable tiers
    pub const TIERS: [Cohort; 4] = [Cohort::Youth, Cohort::HighSchool, Cohort::College, Cohort::Pro];

    /// Every cohort that owns a threshold table, aggregate last
    pub const ALL: [Cohort; 5] = [
        Cohort::Youth,
        Cohort::HighSchool,
        Cohort::College,
        Cohort::Pro,
        Cohort::Overall,
    ];

    /// Storage and display name
    pub fn as_str(self) -> &'static str {
        match self {
            Cohort::Youth => "Youth",
            Cohort::HighSchool => "High School",
            Cohort::College => "College",
            Cohort::Pro => "Pro",
            Cohort::Overall => "Overall",
        }
    }

    pub fn is_aggregate(self) -> bool {
        self == Cohort::Overall
    }

    /// Tiers whose samples make up this cohort's pool
    pub fn member_tiers(self) -> &'static [Cohort] {
        match self {
            Cohort::Youth => &[Cohort::Youth],
            Cohort::HighSchool => &[Cohort::HighSchool],
            Cohort::College => &[Cohort::College],
            Cohort::Pro => &[Cohort::Pro],
            Cohort::Overall => &Cohort::TIERS,
        }
    }
}

impl fmt::Display for Cohort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Cohort {
    type Err = Error;

    /// Accepts the display name in any case, with spaces, dashes or underscores
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| !matches!(c, ' ' | '_' | '-'))
            .map(|c| c.to_ascii_lowercase())
            .collect();

        match normalized.as_str() {
            "youth" => Ok(Cohort::Youth),
            "highschool" => Ok(Cohort::HighSchool),
            "college" => Ok(Cohort::College),
            "pro" => Ok(Cohort::Pro),
            "overall" => Ok(Cohort::Overall),
            _ => Err(Error::InvalidInput(format!("Unknown cohort: {}", s))),
        }
    }
}
