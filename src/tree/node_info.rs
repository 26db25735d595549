//! Parsing of the engine's node-info text.
//!
//! The engine answers node queries with newline separated `key=value`
//! style lines:
//!
//! ```text
//! value=srv.example.com
//! children:ServerID/AppID/Name
//! ```
//!
//! `null` or an empty payload means the field is absent. Failures are
//! reported as free text starting with `can't`.

use super::data::DmtData;

const VALUE_PREFIX: &str = "value=";
const CHILDREN_PREFIX: &str = "children:";
const CHILD_DELIMITER: char = '/';
const FAILURE_PREFIX: &str = "can't";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeInfo {
    pub value: Option<String>,
    pub children: Option<Vec<String>>,
}

impl NodeInfo {
    /// Returns `Err` with the engine's message when the text reports a failure.
    pub fn parse(text: &str) -> Result<Self, String> {
        if text.is_empty() || text.starts_with(FAILURE_PREFIX) {
            return Err(if text.is_empty() {
                "empty node info".to_string()
            } else {
                text.to_string()
            });
        }

        let mut info = NodeInfo::default();
        for line in text.lines() {
            if let Some(value) = line.strip_prefix(VALUE_PREFIX) {
                info.value = non_null(value).map(str::to_string);
            } else if let Some(children) = line.strip_prefix(CHILDREN_PREFIX) {
                info.children = non_null(children).map(|list| {
                    list.split(CHILD_DELIMITER)
                        .filter(|c| !c.is_empty())
                        .map(str::to_string)
                        .collect()
                });
            }
        }
        Ok(info)
    }

    /// Interior nodes become a child list, leaves a string, anything else null.
    pub fn into_data(self) -> DmtData {
        match (self.children, self.value) {
            (Some(children), _) => DmtData::Node(children),
            (None, Some(value)) => DmtData::String(value),
            (None, None) => DmtData::Null,
        }
    }
}

fn non_null(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "null" {
        None
    } else {
        Some(trimmed)
    }
}
