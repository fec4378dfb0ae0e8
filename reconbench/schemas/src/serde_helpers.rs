//! Shared serde helpers for default values and the ordered tool map.

use crate::job::{ToolStatus, ToolStatuses};
use crate::tools::ToolName;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

// =============================================================================
// Default value functions
// =============================================================================

/// Default longest image side handed to the engines
pub fn default_max_resolution() -> u32 {
    2048
}

/// Default dataset image subdirectory
pub fn default_resolution() -> String {
    "images".to_string()
}

// =============================================================================
// Ordered tool map
// =============================================================================

impl Serialize for ToolStatuses {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (name, status) in self.iter() {
            map.serialize_entry(&name, status)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ToolStatuses {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ToolStatusesVisitor;

        impl<'de> Visitor<'de> for ToolStatusesVisitor {
            type Value = ToolStatuses;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a map of tool name to tool status")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((name, status)) = access.next_entry::<ToolName, ToolStatus>()? {
                    if !entries.iter().any(|(seen, _)| *seen == name) {
                        entries.push((name, status));
                    }
                }
                Ok(ToolStatuses::from_entries(entries))
            }
        }

        deserializer.deserialize_map(ToolStatusesVisitor)
    }
}
