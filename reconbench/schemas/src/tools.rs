//! The closed set of reconstruction engines and their catalog entries.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// A reconstruction engine known to reconbench.
///
/// The wire representation is the engine's display name (`"COLMAP"`, `"OpenMVS"`, ...).
/// Declaration order is the canonical listing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
pub enum ToolName {
    #[serde(rename = "COLMAP")]
    Colmap,
    #[serde(rename = "OpenMVS")]
    OpenMvs,
    #[serde(rename = "PMVS2")]
    Pmvs2,
    #[serde(rename = "AliceVision")]
    AliceVision,
    #[serde(rename = "OpenSfM")]
    OpenSfm,
}

impl ToolName {
    pub const ALL: [ToolName; 5] = [
        ToolName::Colmap,
        ToolName::OpenMvs,
        ToolName::Pmvs2,
        ToolName::AliceVision,
        ToolName::OpenSfm,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::Colmap => "COLMAP",
            ToolName::OpenMvs => "OpenMVS",
            ToolName::Pmvs2 => "PMVS2",
            ToolName::AliceVision => "AliceVision",
            ToolName::OpenSfm => "OpenSfM",
        }
    }

    /// Lower-cased name, used for per-tool output directories.
    pub fn dir_name(&self) -> String {
        self.as_str().to_lowercase()
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string does not name one of the supported engines.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unsupported tool: {0}")]
pub struct UnsupportedToolName(pub String);

impl FromStr for ToolName {
    type Err = UnsupportedToolName;

    /// Exact, case-sensitive match on the display name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ToolName::ALL
            .into_iter()
            .find(|tool| tool.as_str() == s)
            .ok_or_else(|| UnsupportedToolName(s.to_string()))
    }
}

/// Pipeline coverage of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
pub enum ToolCategory {
    #[serde(rename = "SfM")]
    Sfm,
    #[serde(rename = "MVS")]
    Mvs,
    #[serde(rename = "SfM + MVS")]
    SfmMvs,
}

/// Catalog entry for one engine as reported by `GET /tools`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
pub struct ToolInfo {
    pub available: bool,
    pub version: String,
    #[serde(rename = "type")]
    pub category: ToolCategory,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("COLMAP", ToolName::Colmap)]
    #[case("OpenMVS", ToolName::OpenMvs)]
    #[case("PMVS2", ToolName::Pmvs2)]
    #[case("AliceVision", ToolName::AliceVision)]
    #[case("OpenSfM", ToolName::OpenSfm)]
    fn parses_display_names(#[case] input: &str, #[case] expected: ToolName) {
        assert_eq!(input.parse::<ToolName>().unwrap(), expected);
        assert_eq!(expected.to_string(), input);
    }

    #[rstest]
    #[case("colmap")]
    #[case("Meshroom")]
    #[case("")]
    fn rejects_unknown_names(#[case] input: &str) {
        let err = input.parse::<ToolName>().unwrap_err();
        assert_eq!(err, UnsupportedToolName(input.to_string()));
    }

    #[test]
    fn serializes_as_display_name() {
        let json = serde_json::to_string(&ToolName::OpenSfm).unwrap();
        assert_eq!(json, "\"OpenSfM\"");

        let category = serde_json::to_string(&ToolCategory::SfmMvs).unwrap();
        assert_eq!(category, "\"SfM + MVS\"");
    }

    #[test]
    fn dir_name_is_lowercase() {
        assert_eq!(ToolName::AliceVision.dir_name(), "alicevision");
    }
}
