//! Configuration workbook: global settings, report schedules, restrictions.
//!
//! The workbook has three sheets, each with a header row:
//!
//! - `global_configs`: `description`, `value`
//! - `data_sources`: `filename`, `data_source`, `refresh`
//! - `variables_filters`: `filename`, `command`, `field`, `field_name`,
//!   `value`, `data_source`
//!
//! Secrets (`logon-password`, `mail-password`) are stored as codec tokens and
//! only decoded at the moment of use.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use calamine::{open_workbook_auto, Data, Reader};

use crate::error::{RefreshError, Result};
use crate::restrictions::{ReportSchedule, RestrictionCommand, RestrictionRow};
use crate::retry::RetryPolicy;

pub const GLOBAL_CONFIGS_SHEET: &str = "global_configs";
pub const DATA_SOURCES_SHEET: &str = "data_sources";
pub const VARIABLES_FILTERS_SHEET: &str = "variables_filters";

/// SMTP settings for status notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailSettings {
    pub server: String,
    pub port: u16,
    pub user: String,
    /// Encrypted token.
    pub password: String,
    pub recipients: Vec<String>,
}

/// Values of the `global_configs` sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub ping_host: String,
    pub ping_port: u16,
    pub logon_client: String,
    pub logon_user: String,
    /// Encrypted token.
    pub logon_password: String,
    /// Folder holding the report workbooks.
    pub data_directory: PathBuf,
    /// Folder receiving `__information` exports.
    pub info_directory: PathBuf,
    /// `None` when no `mail-server` is configured.
    pub mail: Option<MailSettings>,
}

impl Settings {
    /// Build settings from `(description, value)` pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let values: HashMap<String, String> = pairs
            .into_iter()
            .map(|(k, v)| (k.into().trim().to_ascii_lowercase(), v.into().trim().to_string()))
            .collect();
        let required = |key: &str| -> Result<String> {
            values
                .get(key)
                .filter(|v| !v.is_empty())
                .cloned()
                .ok_or_else(|| RefreshError::Config(format!("missing setting '{key}'")))
        };
        let port = |key: &str| -> Result<u16> {
            let raw = required(key)?;
            raw.parse()
                .map_err(|_| RefreshError::Config(format!("'{key}' is not a port: {raw}")))
        };

        let mail = match values.get("mail-server").filter(|v| !v.is_empty()) {
            Some(server) => Some(MailSettings {
                server: server.clone(),
                port: port("mail-port")?,
                user: required("mail-user")?,
                password: required("mail-password")?,
                recipients: required("mail-recipients")?
                    .split([';', ','])
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .map(String::from)
                    .collect(),
            }),
            None => None,
        };

        Ok(Self {
            ping_host: required("ping-host")?,
            ping_port: port("ping-port")?,
            logon_client: required("logon-client")?,
            logon_user: required("logon-user")?,
            logon_password: required("logon-password")?,
            data_directory: PathBuf::from(required("path-data_directory")?),
            info_directory: PathBuf::from(required("path-data_info")?),
            mail,
        })
    }
}

/// Everything read from the configuration workbook. Read-only once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub settings: Settings,
    pub reports: Vec<ReportSchedule>,
    pub restrictions: Vec<RestrictionRow>,
}

impl AppConfig {
    /// Load the workbook, retrying while it is unreadable (e.g. locked by a
    /// sync client). Content errors are not retried.
    pub fn load(path: &Path, policy: &RetryPolicy) -> Result<Self> {
        policy.run(
            &format!("load {}", path.display()),
            |e| matches!(e, RefreshError::Io(_)),
            |_| Self::from_workbook(path),
        )
    }

    pub fn from_workbook(path: &Path) -> Result<Self> {
        let mut workbook = open_workbook_auto(path).map_err(|e| match e {
            calamine::Error::Io(io) => RefreshError::Io(io),
            other => RefreshError::Config(format!("{}: {other}", path.display())),
        })?;
        let mut sheet = |name: &str| -> Result<Table> {
            let range = workbook
                .worksheet_range(name)
                .map_err(|e| RefreshError::Config(format!("sheet '{name}': {e}")))?;
            Ok(Table::from_rows(name, range.rows()))
        };

        let globals = sheet(GLOBAL_CONFIGS_SHEET)?;
        let schedules = sheet(DATA_SOURCES_SHEET)?;
        let restrictions = sheet(VARIABLES_FILTERS_SHEET)?;

        let settings = {
            let key = globals.column("description")?;
            let value = globals.column("value")?;
            Settings::from_pairs(globals.rows.iter().map(|r| (r[key].clone(), r[value].clone())))?
        };

        let config = Self {
            settings,
            reports: parse_schedules(&schedules)?,
            restrictions: parse_restrictions(&restrictions)?,
        };
        tracing::info!(
            "Loaded configuration from {}: {} reports, {} restrictions",
            path.display(),
            config.reports.len(),
            config.restrictions.len()
        );
        Ok(config)
    }

    pub fn schedule(&self, filename: &str) -> Option<&ReportSchedule> {
        self.reports
            .iter()
            .find(|r| r.filename.eq_ignore_ascii_case(filename))
    }
}

fn parse_schedules(table: &Table) -> Result<Vec<ReportSchedule>> {
    let filename = table.column("filename")?;
    let data_source = table.column("data_source")?;
    let refresh = table.column("refresh")?;
    Ok(table
        .rows
        .iter()
        .map(|row| {
            let day = row[refresh].parse::<u32>().ok();
            if day.is_none() {
                tracing::warn!(
                    "{}: refresh '{}' for {} is not a day number, the report is never due",
                    table.name,
                    row[refresh],
                    row[filename]
                );
            }
            ReportSchedule {
                filename: row[filename].clone(),
                data_source: row[data_source].clone(),
                refresh: day,
            }
        })
        .collect())
}

fn parse_restrictions(table: &Table) -> Result<Vec<RestrictionRow>> {
    let filename = table.column("filename")?;
    let command = table.column("command")?;
    let field = table.column("field")?;
    let field_name = table.column("field_name")?;
    let value = table.column("value")?;
    let data_source = table.column("data_source")?;
    Ok(table
        .rows
        .iter()
        .filter_map(|row| match row[command].parse::<RestrictionCommand>() {
            Ok(command) => Some(RestrictionRow {
                filename: row[filename].clone(),
                command,
                field: row[field].clone(),
                field_name: row[field_name].clone(),
                value: row[value].clone(),
                data_source: row[data_source].clone(),
            }),
            Err(e) => {
                tracing::warn!("{}: skipping row for {}: {e}", table.name, row[filename]);
                None
            }
        })
        .collect())
}

/// A sheet as text: lowercase headers and fully blank rows dropped.
struct Table {
    name: String,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    fn from_rows<'a>(name: &str, mut rows: impl Iterator<Item = &'a [Data]>) -> Self {
        let headers: Vec<String> = rows
            .next()
            .map(|r| r.iter().map(|c| cell_text(c).to_ascii_lowercase()).collect())
            .unwrap_or_default();
        let width = headers.len();
        let rows = rows
            .map(|r| {
                let mut cells: Vec<String> = r.iter().map(cell_text).collect();
                cells.resize(width.max(cells.len()), String::new());
                cells
            })
            .filter(|cells| cells.iter().any(|c| !c.is_empty()))
            .collect();
        Self {
            name: name.to_string(),
            headers,
            rows,
        }
    }

    fn column(&self, header: &str) -> Result<usize> {
        self.headers
            .iter()
            .position(|h| h == header)
            .ok_or_else(|| RefreshError::Config(format!("sheet '{}' has no '{header}' column", self.name)))
    }
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_xlsxwriter::Workbook;

    const SOURCES: &[(&str, &str, Option<f64>)] =
        &[("Sales.xlsx", "DS_1", Some(99.0)), ("Stock.xlsx", "DS_2", Some(10.0))];
    const RESTRICTIONS: &[[&str; 6]] = &[[
        "Sales.xlsx",
        "SAPSetFilter",
        "0CALMONTH",
        "Calendar Month",
        "range_current_month",
        "DS_1",
    ]];

    fn write_fixture(path: &Path, with_mail: bool) {
        write_fixture_rows(path, with_mail, SOURCES, RESTRICTIONS);
    }

    fn write_fixture_rows(
        path: &Path,
        with_mail: bool,
        sources_rows: &[(&str, &str, Option<f64>)],
        restriction_rows: &[[&str; 6]],
    ) {
        let mut workbook = Workbook::new();

        let globals = workbook.add_worksheet().set_name(GLOBAL_CONFIGS_SHEET).unwrap();
        globals.write_string(0, 0, "description").unwrap();
        globals.write_string(0, 1, "value").unwrap();
        let mut entries: Vec<(&str, &str)> = vec![
            ("ping-host", "bw.example.com"),
            ("logon-client", "100"),
            ("logon-user", "RFC_USER"),
            ("logon-password", "dG9rZW4="),
            ("path-data_directory", "/reports"),
            ("path-data_info", "/reports/info"),
        ];
        if with_mail {
            entries.extend([
                ("mail-server", "smtp.example.com"),
                ("mail-port", "587"),
                ("mail-user", "robot@example.com"),
                ("mail-password", "bWFpbA=="),
                ("mail-recipients", "ops@example.com; bi@example.com"),
            ]);
        }
        for (i, (key, value)) in entries.iter().enumerate() {
            globals.write_string(i as u32 + 1, 0, *key).unwrap();
            globals.write_string(i as u32 + 1, 1, *value).unwrap();
        }
        let next = entries.len() as u32 + 1;
        globals.write_string(next, 0, "ping-port").unwrap();
        globals.write_number(next, 1, 3200.0).unwrap();

        let sources = workbook.add_worksheet().set_name(DATA_SOURCES_SHEET).unwrap();
        for (col, header) in ["filename", "data_source", "refresh"].iter().enumerate() {
            sources.write_string(0, col as u16, *header).unwrap();
        }
        for (i, (filename, source, refresh)) in sources_rows.iter().enumerate() {
            let r = i as u32 + 1;
            sources.write_string(r, 0, *filename).unwrap();
            sources.write_string(r, 1, *source).unwrap();
            if let Some(day) = refresh {
                sources.write_number(r, 2, *day).unwrap();
            }
        }

        let restrictions = workbook.add_worksheet().set_name(VARIABLES_FILTERS_SHEET).unwrap();
        let headers = ["filename", "command", "field", "field_name", "value", "data_source"];
        for (col, header) in headers.iter().enumerate() {
            restrictions.write_string(0, col as u16, *header).unwrap();
        }
        for (i, row) in restriction_rows.iter().enumerate() {
            for (col, cell) in row.iter().enumerate() {
                restrictions.write_string(i as u32 + 1, col as u16, *cell).unwrap();
            }
        }

        workbook.save(path).unwrap();
    }

    #[test]
    fn test_load_workbook() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.xlsx");
        write_fixture(&path, true);

        let config = AppConfig::load(&path, &RetryPolicy::immediate(3)).unwrap();
        assert_eq!(config.settings.ping_host, "bw.example.com");
        assert_eq!(config.settings.ping_port, 3200);
        assert_eq!(config.settings.logon_client, "100");
        assert_eq!(config.settings.info_directory, PathBuf::from("/reports/info"));
        let mail = config.settings.mail.as_ref().unwrap();
        assert_eq!(mail.recipients, vec!["ops@example.com", "bi@example.com"]);

        assert_eq!(
            config.reports,
            vec![
                ReportSchedule {
                    filename: "Sales.xlsx".to_string(),
                    data_source: "DS_1".to_string(),
                    refresh: Some(99),
                },
                ReportSchedule {
                    filename: "Stock.xlsx".to_string(),
                    data_source: "DS_2".to_string(),
                    refresh: Some(10),
                },
            ]
        );
        assert_eq!(config.restrictions.len(), 1);
        assert_eq!(config.restrictions[0].command, RestrictionCommand::SetFilter);
        assert_eq!(config.schedule("sales.XLSX").unwrap().data_source, "DS_1");
    }

    #[test]
    fn test_mail_is_optional() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.xlsx");
        write_fixture(&path, false);
        let config = AppConfig::from_workbook(&path).unwrap();
        assert!(config.settings.mail.is_none());
    }

    #[test]
    fn test_missing_setting_is_reported() {
        let err = Settings::from_pairs([("ping-host", "bw"), ("ping-port", "3200")]).unwrap_err();
        assert!(err.to_string().contains("logon-client"), "{err}");
    }

    #[test]
    fn test_missing_file_is_retried_then_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = AppConfig::load(&dir.path().join("absent.xlsx"), &RetryPolicy::immediate(3));
        assert!(err.is_err());
    }

    #[test]
    fn test_report_without_day_number_is_never_due() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.xlsx");
        let sources = [
            ("Good.xlsx", "DS_1", Some(99.0)),
            ("Paused.xlsx", "DS_2", None),
        ];
        write_fixture_rows(&path, false, &sources, RESTRICTIONS);

        let config = AppConfig::from_workbook(&path).unwrap();
        assert_eq!(config.reports.len(), 2);
        assert_eq!(config.schedule("Paused.xlsx").unwrap().refresh, None);

        let today = chrono::NaiveDate::from_ymd_opt(2026, 10, 1).unwrap();
        let due: Vec<_> = crate::restrictions::due_reports(&config.reports, today)
            .iter()
            .map(|s| s.filename.as_str())
            .collect();
        assert_eq!(due, ["Good.xlsx"]);
    }

    #[test]
    fn test_unknown_restriction_command_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.xlsx");
        let rows = [
            ["Sales.xlsx", "SAPSetFilter", "0CALMONTH", "Calendar Month", "current_period", "DS_1"],
            ["Sales.xlsx", "SAPSetDrillState", "0MATERIAL", "Material", "1", "DS_1"],
            ["Sales.xlsx", "SetVariable", "ZVAR_YEAR", "Year", "year_current", "DS_1"],
        ];
        write_fixture_rows(&path, false, SOURCES, &rows);

        let config = AppConfig::from_workbook(&path).unwrap();
        let commands: Vec<_> = config.restrictions.iter().map(|r| r.command).collect();
        assert_eq!(
            commands,
            vec![RestrictionCommand::SetFilter, RestrictionCommand::SetVariable]
        );
    }
}
