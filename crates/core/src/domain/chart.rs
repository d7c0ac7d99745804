use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::dataset::{ColumnMeta, DatasetRecord, DatasetSummary};
use crate::errors::ValidationError;
use crate::formats::{is_admin_level_token, is_valid_format};

/// An x-axis column with its bucketing format.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AxisSpec {
    #[serde(flatten)]
    pub column: ColumnMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

impl AxisSpec {
    pub fn strip_format_unless_typed(&mut self) {
        if !self.column.kind().carries_format() {
            self.format = None;
        }
    }

    pub fn check_format(&self) -> Result<(), ValidationError> {
        check_format(&self.column, self.format.as_deref())
    }
}

/// A measure column with its aggregation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MeasureSpec {
    #[serde(flatten)]
    pub column: ColumnMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calculation: Option<String>,
}

/// A filter column. `type`, `operator`, `value` and `format` are pruned once the backend no
/// longer needs them for option resolution.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FilterSpec {
    #[serde(flatten)]
    pub column: ColumnMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl FilterSpec {
    pub fn strip_format_unless_typed(&mut self) {
        if !self.column.kind().carries_format() {
            self.format = None;
        }
    }

    pub fn check_format(&self) -> Result<(), ValidationError> {
        check_format(&self.column, self.format.as_deref())
    }

    /// Spatial filters must name one of the backend's admin-level tokens.
    pub fn check_admin_level(&self) -> Result<(), ValidationError> {
        if !self.column.kind().is_spatial() {
            return Ok(());
        }
        match self.format.as_deref() {
            Some(format) if is_admin_level_token(format) => Ok(()),
            other => Err(ValidationError::UnknownAdminLevel {
                column: self.column.label().to_string(),
                format: other.unwrap_or("<missing>").to_string(),
            }),
        }
    }

    pub fn strip_resolution_fields(&mut self) {
        self.column.column_type = None;
        self.operator = None;
        self.value = None;
    }
}

fn check_format(column: &ColumnMeta, format: Option<&str>) -> Result<(), ValidationError> {
    let kind = column.kind();
    if !kind.carries_format() {
        return Ok(());
    }
    let Some(format) = format else {
        return Err(ValidationError::MissingFormat {
            column: column.label().to_string(),
            kind: kind.as_str().to_string(),
        });
    };
    if is_valid_format(kind, format) {
        Ok(())
    } else {
        Err(ValidationError::InvalidFormat {
            column: column.label().to_string(),
            kind: kind.as_str().to_string(),
            format: format.to_string(),
        })
    }
}

/// Filters travel flat while the model drafts them and as AND-groups once bound for the backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum FilterSet {
    Grouped(Vec<Vec<FilterSpec>>),
    Flat(Vec<FilterSpec>),
}

impl Default for FilterSet {
    fn default() -> Self {
        Self::Flat(Vec::new())
    }
}

impl FilterSet {
    pub fn specs(&self) -> Box<dyn Iterator<Item = &FilterSpec> + '_> {
        match self {
            Self::Grouped(groups) => Box::new(groups.iter().flatten()),
            Self::Flat(filters) => Box::new(filters.iter()),
        }
    }

    pub fn specs_mut(&mut self) -> Box<dyn Iterator<Item = &mut FilterSpec> + '_> {
        match self {
            Self::Grouped(groups) => Box::new(groups.iter_mut().flatten()),
            Self::Flat(filters) => Box::new(filters.iter_mut()),
        }
    }

    pub fn len(&self) -> usize {
        self.specs().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wraps a flat list as one AND-group. Already grouped filters are left untouched.
    pub fn into_grouped(self) -> Self {
        match self {
            Self::Flat(filters) => Self::Grouped(vec![filters]),
            Self::Grouped(groups) if groups.is_empty() => Self::Grouped(vec![Vec::new()]),
            grouped => grouped,
        }
    }
}

/// A dataset-bound chart query, enriched and pruned stage by stage until execution.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ChartQuery {
    #[serde(flatten)]
    pub dataset: DatasetRecord,
    #[serde(default)]
    pub x: Vec<AxisSpec>,
    #[serde(default)]
    pub y: Vec<MeasureSpec>,
    #[serde(default)]
    pub filter: FilterSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl ChartQuery {
    pub fn id(&self) -> &str {
        &self.dataset.id
    }

    pub fn summary(&self) -> DatasetSummary {
        self.dataset.summary()
    }

    pub fn strip_axis_formats(&mut self) {
        self.x.iter_mut().for_each(AxisSpec::strip_format_unless_typed);
    }

    pub fn strip_filter_formats(&mut self) {
        self.filter.specs_mut().for_each(FilterSpec::strip_format_unless_typed);
    }

    pub fn check_filter_admin_levels(&self) -> Result<(), ValidationError> {
        self.filter.specs().try_for_each(FilterSpec::check_admin_level)
    }

    pub fn strip_filter_resolution_fields(&mut self) {
        self.filter.specs_mut().for_each(FilterSpec::strip_resolution_fields);
    }

    pub fn group_filters(&mut self) {
        let filters = std::mem::take(&mut self.filter);
        self.filter = filters.into_grouped();
    }

    /// Replaces the name and type of every x, y and filter column with the definition `source`
    /// holds for the same `columnID`. Formats, operators, values and calculations are kept.
    pub fn rebind_columns(&mut self, source: &ChartQuery) -> Result<(), ValidationError> {
        let known = source.columns_by_id();
        let chart_id = self.dataset.id.clone();
        let rebind = |column: &mut ColumnMeta| -> Result<(), ValidationError> {
            let id = column.column_id.as_deref().unwrap_or_default();
            let bound = known.get(id).ok_or_else(|| ValidationError::UnknownColumn {
                chart_id: chart_id.clone(),
                column_id: column.label().to_string(),
            })?;
            column.name = bound.name.clone();
            column.column_type = bound.column_type.clone();
            Ok(())
        };

        for axis in &mut self.x {
            rebind(&mut axis.column)?;
        }
        for measure in &mut self.y {
            rebind(&mut measure.column)?;
        }
        for spec in self.filter.specs_mut() {
            rebind(&mut spec.column)?;
        }
        Ok(())
    }

    /// Typed definitions win over untyped ones that share an id.
    fn columns_by_id(&self) -> BTreeMap<&str, &ColumnMeta> {
        let columns = self
            .x
            .iter()
            .map(|axis| &axis.column)
            .chain(self.y.iter().map(|measure| &measure.column))
            .chain(self.filter.specs().map(|spec| &spec.column));

        let mut index = BTreeMap::new();
        for column in columns {
            let Some(id) = column.column_id.as_deref() else {
                continue;
            };
            let entry = index.entry(id).or_insert(column);
            if entry.column_type.is_none() {
                *entry = column;
            }
        }
        index
    }
}
