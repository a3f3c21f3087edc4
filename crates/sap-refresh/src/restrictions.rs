//! Report schedules and the variable/filter restrictions applied to them.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};

use crate::error::RefreshError;
use crate::periods::PeriodTokens;

/// Schedule value that makes a report due every day.
pub const ALWAYS_REFRESH: u32 = 99;

/// How a restriction row is applied to a data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RestrictionCommand {
    SetVariable,
    SetFilter,
}

impl RestrictionCommand {
    /// The plugin macro that applies this kind of restriction.
    pub fn macro_name(self) -> &'static str {
        match self {
            RestrictionCommand::SetVariable => "SAPSetVariable",
            RestrictionCommand::SetFilter => "SAPSetFilter",
        }
    }
}

impl fmt::Display for RestrictionCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.macro_name())
    }
}

impl FromStr for RestrictionCommand {
    type Err = RefreshError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        let name = name
            .strip_prefix("SAP")
            .or_else(|| name.strip_prefix("sap"))
            .unwrap_or(name);
        if name.eq_ignore_ascii_case("SetVariable") {
            Ok(RestrictionCommand::SetVariable)
        } else if name.eq_ignore_ascii_case("SetFilter") {
            Ok(RestrictionCommand::SetFilter)
        } else {
            Err(RefreshError::Config(format!("unknown restriction command '{s}'")))
        }
    }
}

/// One row of the `data_sources` sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportSchedule {
    pub filename: String,
    /// Data source id recorded for the report.
    pub data_source: String,
    /// Last day of the month the report is refreshed, or [`ALWAYS_REFRESH`].
    /// `None` when the cell holds no day number; such reports are never due.
    pub refresh: Option<u32>,
}

impl ReportSchedule {
    pub fn is_due(&self, today: NaiveDate) -> bool {
        matches!(self.refresh, Some(day) if day >= today.day() || day == ALWAYS_REFRESH)
    }
}

/// Schedules due on `today`, in configuration order.
pub fn due_reports(schedules: &[ReportSchedule], today: NaiveDate) -> Vec<&ReportSchedule> {
    schedules.iter().filter(|s| s.is_due(today)).collect()
}

/// One row of the `variables_filters` sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestrictionRow {
    pub filename: String,
    pub command: RestrictionCommand,
    /// Technical field code.
    pub field: String,
    pub field_name: String,
    pub value: String,
    pub data_source: String,
}

/// Rows of `command` for `filename`, with calendar tokens resolved.
pub fn restrictions_for(
    rows: &[RestrictionRow],
    filename: &str,
    command: RestrictionCommand,
    tokens: &PeriodTokens,
) -> Vec<RestrictionRow> {
    rows.iter()
        .filter(|r| r.command == command && r.filename.eq_ignore_ascii_case(filename))
        .map(|r| RestrictionRow {
            value: tokens.substitute(&r.value),
            ..r.clone()
        })
        .collect()
}

/// A variable or filter read back from a live report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedRestriction {
    pub command: RestrictionCommand,
    pub field: String,
    pub field_name: String,
    pub value: String,
    pub data_source: String,
    pub data_source_name: String,
    pub data_source_sheet: String,
}

impl ObservedRestriction {
    /// Every observed value is exported as a literal.
    pub const REFERENCE_TYPE: &'static str = "value";
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule(filename: &str, refresh: u32) -> ReportSchedule {
        ReportSchedule {
            filename: filename.to_string(),
            data_source: "DS_1".to_string(),
            refresh: Some(refresh),
        }
    }

    fn row(filename: &str, command: RestrictionCommand, value: &str) -> RestrictionRow {
        RestrictionRow {
            filename: filename.to_string(),
            command,
            field: "0CALMONTH".to_string(),
            field_name: "Calendar Year/Month".to_string(),
            value: value.to_string(),
            data_source: "DS_1".to_string(),
        }
    }

    #[test]
    fn test_command_names() {
        assert_eq!("SAPSetVariable".parse::<RestrictionCommand>().unwrap(), RestrictionCommand::SetVariable);
        assert_eq!("SetFilter".parse::<RestrictionCommand>().unwrap(), RestrictionCommand::SetFilter);
        assert_eq!(" sapsetfilter ".parse::<RestrictionCommand>().unwrap(), RestrictionCommand::SetFilter);
        assert!("SAPSetBehaviour".parse::<RestrictionCommand>().is_err());
        assert_eq!(RestrictionCommand::SetFilter.to_string(), "SAPSetFilter");
    }

    #[test]
    fn test_due_on_or_before_refresh_day_or_always() {
        let day16 = NaiveDate::from_ymd_opt(2026, 10, 16).unwrap();
        let schedules = vec![
            schedule("early.xlsx", 5),
            schedule("exact.xlsx", 16),
            schedule("late.xlsx", 25),
            schedule("daily.xlsx", ALWAYS_REFRESH),
        ];
        let due: Vec<_> = due_reports(&schedules, day16)
            .into_iter()
            .map(|s| s.filename.as_str())
            .collect();
        assert_eq!(due, ["exact.xlsx", "late.xlsx", "daily.xlsx"]);
    }

    #[test]
    fn test_restrictions_filtered_and_substituted() {
        let tokens = PeriodTokens::for_date(NaiveDate::from_ymd_opt(2026, 10, 16).unwrap());
        let rows = vec![
            row("A.xlsx", RestrictionCommand::SetFilter, "range_current_month"),
            row("A.xlsx", RestrictionCommand::SetVariable, "year_current_period"),
            row("B.xlsx", RestrictionCommand::SetFilter, "1000"),
        ];
        let filters = restrictions_for(&rows, "a.XLSX", RestrictionCommand::SetFilter, &tokens);
        assert_eq!(filters.len(), 1);
        assert_eq!(filters[0].value, "10 - 10");

        let variables = restrictions_for(&rows, "A.xlsx", RestrictionCommand::SetVariable, &tokens);
        assert_eq!(variables[0].value, "2026");
    }
}
