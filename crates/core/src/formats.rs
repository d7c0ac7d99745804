//! Whitelists and lookup tables that gate model output before it reaches the analytics backend.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Bucketing formats accepted for `date` and `datetime` columns.
pub const DATE_FORMATS: &[&str] =
    &["year", "quarter", "month", "week", "date", "weekday", "day", "hour", "minute", "second"];

/// Admin-level tokens understood by the backend for spatial columns and filters.
pub const ADMIN_LEVEL_TOKENS: [&str; 6] = [
    "admin_level_2",
    "admin_level_4",
    "admin_level_7",
    "admin_level_8",
    "admin_level_9",
    "admin_level_10",
];

/// Aggregations the backend can apply to a numeric measure.
pub const CALCULATIONS: &[&str] = &["count", "sum", "avg", "min", "max", "distinct_count"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Float,
    Text,
    Date,
    Datetime,
    Space,
    Other,
}

impl ColumnKind {
    pub fn from_type_name(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "integer" | "int" => Self::Integer,
            "float" | "double" | "number" => Self::Float,
            "string" | "text" => Self::Text,
            "date" => Self::Date,
            "datetime" => Self::Datetime,
            "space" => Self::Space,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Text => "string",
            Self::Date => "date",
            Self::Datetime => "datetime",
            Self::Space => "space",
            Self::Other => "other",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer | Self::Float)
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, Self::Date | Self::Datetime)
    }

    pub fn is_spatial(&self) -> bool {
        matches!(self, Self::Space)
    }

    /// Only temporal and spatial columns carry a `format` the backend interprets.
    pub fn carries_format(&self) -> bool {
        self.is_temporal() || self.is_spatial()
    }
}

pub fn is_date_format(format: &str) -> bool {
    DATE_FORMATS.contains(&format)
}

pub fn is_admin_level_token(format: &str) -> bool {
    ADMIN_LEVEL_TOKENS.contains(&format)
}

pub fn is_valid_calculation(calculation: &str) -> bool {
    CALCULATIONS.contains(&calculation)
}

/// Temporal columns need a date format, spatial columns an admin level; anything else passes.
pub fn is_valid_format(kind: ColumnKind, format: &str) -> bool {
    match kind {
        ColumnKind::Date | ColumnKind::Datetime => is_date_format(format),
        ColumnKind::Space => is_admin_level_token(format),
        _ => true,
    }
}

/// `(region, language) -> admin level` lookup used to scope spatial filters per dataset.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AdminLevelTable(BTreeMap<String, BTreeMap<String, String>>);

impl AdminLevelTable {
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(
        &mut self,
        region: impl Into<String>,
        language: impl Into<String>,
        admin_level: impl Into<String>,
    ) {
        self.0.entry(region.into()).or_default().insert(language.into(), admin_level.into());
    }

    pub fn lookup(&self, region: &str, language: &str) -> Option<&str> {
        self.0.get(region).and_then(|languages| languages.get(language)).map(String::as_str)
    }

    pub fn merge(&mut self, other: AdminLevelTable) {
        for (region, languages) in other.0 {
            let entry = self.0.entry(region).or_default();
            entry.extend(languages);
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.0.iter().flat_map(|(region, languages)| {
            languages.iter().map(move |(language, level)| {
                (region.as_str(), language.as_str(), level.as_str())
            })
        })
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(BTreeMap::is_empty)
    }
}

impl Default for AdminLevelTable {
    fn default() -> Self {
        let mut table = Self::empty();
        table.insert("TW", "zh-TW", "admin_level_4");
        table.insert("TW", "en", "admin_level_4");
        table.insert("JP", "ja", "admin_level_4");
        table.insert("JP", "en", "admin_level_4");
        table.insert("US", "en", "admin_level_4");
        table.insert("GLOBAL", "en", "admin_level_2");
        table
    }
}
