// src/schema/types.rs

use serde::{Deserialize, Serialize};

/// One row of an ECS field list.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Eq, Hash)]
pub struct FieldRecord {
    pub ecs_version: String,
    pub indexed: bool,
    pub field_set: String,
    pub field: String,
    pub ty: String,
    pub level: String,
    pub normalization: Option<String>,
    pub example: Option<String>,
    pub description: Option<String>,
}

/// The narrowest classification that holds every value seen so far in a column.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Copy, Eq, Hash, PartialOrd, Ord)]
pub enum ColumnClass {
    /// Only nulls so far.
    Empty,
    Boolean,
    Integer,
    Decimal,
    Date,
    Timestamp,
    Text,
}

/// Target column type in PostgreSQL terms.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Eq, Hash)]
pub enum SqlType {
    Boolean,
    Integer,
    BigInt,
    Numeric { precision: u32, scale: u32 },
    Date,
    Timestamp,
    Varchar(usize),
    Text,
}

impl SqlType {
    pub fn to_sql(&self) -> String {
        match self {
            SqlType::Boolean => "boolean".into(),
            SqlType::Integer => "integer".into(),
            SqlType::BigInt => "bigint".into(),
            SqlType::Numeric { precision, scale } => format!("numeric({}, {})", precision, scale),
            SqlType::Date => "date".into(),
            SqlType::Timestamp => "timestamp without time zone".into(),
            SqlType::Varchar(n) => format!("character varying({})", n),
            SqlType::Text => "text".into(),
        }
    }
}

/// A single column of the generated table.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Eq, Hash)]
pub struct Column {
    pub name: String,
    pub class: ColumnClass,
    pub ty: SqlType,
    pub nullable: bool,
}
