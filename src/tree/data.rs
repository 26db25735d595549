//! Typed node values.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Separator used when a child list is flattened into a single string.
pub const NODE_LIST_SEPARATOR: char = '|';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Null,
    String,
    Integer,
    Boolean,
    Binary,
    Date,
    Time,
    Float,
    Node,
}

/// Value of a management tree node. Leaves carry one scalar, interior
/// nodes carry their ordered child names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum DmtData {
    Null,
    String(String),
    Integer(i32),
    Boolean(bool),
    Binary(Vec<u8>),
    Date(String),
    Time(String),
    Float(f32),
    Node(Vec<String>),
}

impl DmtData {
    pub fn data_type(&self) -> DataType {
        match self {
            DmtData::Null => DataType::Null,
            DmtData::String(_) => DataType::String,
            DmtData::Integer(_) => DataType::Integer,
            DmtData::Boolean(_) => DataType::Boolean,
            DmtData::Binary(_) => DataType::Binary,
            DmtData::Date(_) => DataType::Date,
            DmtData::Time(_) => DataType::Time,
            DmtData::Float(_) => DataType::Float,
            DmtData::Node(_) => DataType::Node,
        }
    }

    pub fn is_node(&self) -> bool {
        matches!(self, DmtData::Node(_))
    }
}

impl fmt::Display for DmtData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DmtData::Null => Ok(()),
            DmtData::String(s) | DmtData::Date(s) | DmtData::Time(s) => f.write_str(s),
            DmtData::Integer(v) => write!(f, "{}", v),
            DmtData::Boolean(v) => write!(f, "{}", v),
            DmtData::Binary(bytes) => f.write_str(&String::from_utf8_lossy(bytes)),
            DmtData::Float(v) => write!(f, "{}", v),
            DmtData::Node(children) => {
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        write!(f, "{}", NODE_LIST_SEPARATOR)?;
                    }
                    f.write_str(child)?;
                }
                Ok(())
            }
        }
    }
}

/// Type first, then value. Textual types (and floats and child lists)
/// compare by their string form.
impl PartialEq for DmtData {
    fn eq(&self, other: &Self) -> bool {
        if self.data_type() != other.data_type() {
            return false;
        }
        match (self, other) {
            (DmtData::Null, DmtData::Null) => true,
            (DmtData::Integer(a), DmtData::Integer(b)) => a == b,
            (DmtData::Boolean(a), DmtData::Boolean(b)) => a == b,
            (DmtData::Binary(a), DmtData::Binary(b)) => a == b,
            _ => self.to_string() == other.to_string(),
        }
    }
}

impl Eq for DmtData {}
