//! Identifiers of the SAP data source bound to a report's crosstab.

use crate::error::{RefreshError, Result};
use crate::host::Value;

/// Extended information from `SapGetSourceInfo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDetails {
    pub data_source_name: String,
    pub query: String,
    pub system: String,
}

/// The data source discovered in an open workbook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSourceDescriptor {
    pub crosstab_source: String,
    pub crosstab_name: String,
    /// Data source id used by every SAP command (usually `DS_1`).
    pub source_id: String,
    /// Worksheet holding the crosstab.
    pub sheet: String,
    /// Workbook name of the crosstab range (`SAP` + crosstab source).
    pub crosstab: String,
    pub details: Option<SourceDetails>,
}

/// One row of `SAPListOf("CROSSTABS")`: crosstab source, crosstab name, data source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrosstabListing {
    pub crosstab_source: String,
    pub crosstab_name: String,
    pub source_id: String,
}

impl CrosstabListing {
    /// Parse the listing. With several crosstabs the first one wins.
    pub fn parse(value: &Value) -> Result<Self> {
        let rows = table_rows(value);
        if rows.len() > 1 {
            tracing::debug!("{} crosstabs listed, using the first", rows.len());
        }
        let row = rows.first().ok_or_else(|| RefreshError::UnexpectedResult {
            call: "SAPListOf".to_string(),
            detail: "no crosstab in the active workbook".to_string(),
        })?;
        let field = |i: usize| -> Result<String> {
            let text = row.get(i).map(Value::to_text).unwrap_or_default();
            if text.is_empty() {
                Err(RefreshError::UnexpectedResult {
                    call: "SAPListOf".to_string(),
                    detail: format!("crosstab listing is missing column {i}: {value}"),
                })
            } else {
                Ok(text)
            }
        };
        Ok(Self {
            crosstab_source: field(0)?,
            crosstab_name: field(1)?,
            source_id: field(2)?,
        })
    }

    /// Workbook name the plugin registers for the crosstab range.
    pub fn range_name(&self) -> String {
        format!("SAP{}", self.crosstab_source)
    }
}

impl DataSourceDescriptor {
    pub fn new(listing: CrosstabListing, sheet: String) -> Result<Self> {
        if sheet.is_empty() {
            return Err(RefreshError::UnexpectedResult {
                call: "NamedRangeSheet".to_string(),
                detail: format!("no sheet for {}", listing.range_name()),
            });
        }
        let crosstab = listing.range_name();
        Ok(Self {
            crosstab_source: listing.crosstab_source,
            crosstab_name: listing.crosstab_name,
            source_id: listing.source_id,
            sheet,
            crosstab,
            details: None,
        })
    }

    pub fn data_source_name(&self) -> Option<&str> {
        self.details.as_ref().map(|d| d.data_source_name.as_str())
    }

    /// Key/value rendering in a fixed order, extended keys only once known.
    pub fn pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("CrossTabSource", self.crosstab_source.clone()),
            ("CrossTabName", self.crosstab_name.clone()),
            ("DS", self.source_id.clone()),
            ("Sheet", self.sheet.clone()),
            ("Crosstab", self.crosstab.clone()),
        ];
        if let Some(details) = &self.details {
            pairs.push(("DataSourceName", details.data_source_name.clone()));
            pairs.push(("Query", details.query.clone()));
            pairs.push(("System", details.system.clone()));
        }
        pairs
    }
}

/// Normalise a listing result into rows.
///
/// The plugin returns a two-dimensional array for several rows but a flat
/// array when there is exactly one; empty results come back as `Null`.
pub(crate) fn table_rows(value: &Value) -> Vec<Vec<Value>> {
    match value {
        Value::Array(items) if items.iter().all(|i| matches!(i, Value::Array(_))) => items
            .iter()
            .filter_map(|i| i.as_array().map(<[Value]>::to_vec))
            .collect(),
        Value::Array(items) => vec![items.clone()],
        Value::Null => Vec::new(),
        scalar => vec![vec![scalar.clone()]],
    }
}
