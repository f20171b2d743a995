use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// The closed set of market-data sources the provider composes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    #[serde(rename = "live")]
    Live,
    #[serde(rename = "cache")]
    Cache,
    #[serde(rename = "archive")]
    Archive,
    #[serde(rename = "web")]
    Fallback,
}

impl SourceKind {
    pub const ALL: [Self; 4] = [Self::Live, Self::Cache, Self::Archive, Self::Fallback];

    /// Tag reported in response metadata.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Cache => "cache",
            Self::Archive => "archive",
            Self::Fallback => "web",
        }
    }

    pub(crate) const fn index(self) -> usize {
        match self {
            Self::Live => 0,
            Self::Cache => 1,
            Self::Archive => 2,
            Self::Fallback => 3,
        }
    }
}

impl Display for SourceKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "live" | "broker" => Ok(Self::Live),
            "cache" => Ok(Self::Cache),
            "archive" => Ok(Self::Archive),
            "web" | "fallback" => Ok(Self::Fallback),
            other => Err(ValidationError::InvalidSource {
                value: other.to_owned(),
            }),
        }
    }
}

/// Usage context of a data request; drives source priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Intent {
    Trading,
    Chart,
    Analysis,
}

impl Intent {
    pub const ALL: [Self; 3] = [Self::Trading, Self::Chart, Self::Analysis];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trading => "TRADING",
            Self::Chart => "CHART",
            Self::Analysis => "ANALYSIS",
        }
    }
}

impl Display for Intent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Intent {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        Self::ALL
            .into_iter()
            .find(|intent| intent.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| ValidationError::InvalidIntent {
                value: trimmed.to_owned(),
            })
    }
}
