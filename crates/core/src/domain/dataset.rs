use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::formats::ColumnKind;

/// A dataset as returned by the analytics catalog. Backend-specific fields ride along in `extra`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DatasetRecord {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DatasetRecord {
    pub fn summary(&self) -> DatasetSummary {
        DatasetSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
        }
    }
}

/// Identity-only view handed to the model when classifying a dataset's geography.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub id: String,
    pub name: String,
    pub description: String,
}

/// Authoritative column definition. The model only ever selects columns by id; type and name
/// always come from here.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ColumnMeta {
    #[serde(rename = "columnID", default, skip_serializing_if = "Option::is_none")]
    pub column_id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub column_type: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ColumnMeta {
    pub fn kind(&self) -> ColumnKind {
        self.column_type.as_deref().map(ColumnKind::from_type_name).unwrap_or(ColumnKind::Other)
    }

    pub fn label(&self) -> &str {
        match self.column_id.as_deref() {
            Some(id) if self.name.is_empty() => id,
            _ => &self.name,
        }
    }
}

/// Column metadata for one dataset, keyed by column id.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetColumns {
    #[serde(flatten)]
    pub dataset: DatasetRecord,
    #[serde(default)]
    pub columns: BTreeMap<String, ColumnMeta>,
}

impl DatasetColumns {
    /// Resolves a column id to its definition, stamping the id so later stages can echo it.
    pub fn resolve(&self, column_id: &str) -> Option<ColumnMeta> {
        self.columns.get(column_id).map(|column| {
            let mut column = column.clone();
            if column.column_id.is_none() {
                column.column_id = Some(column_id.to_string());
            }
            column
        })
    }
}

pub type DatasetCatalog = BTreeMap<String, DatasetRecord>;

pub type ColumnCatalog = BTreeMap<String, DatasetColumns>;
