//! The use cases run by the command line: collect report information and
//! refresh scheduled reports.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use crate::context::Context;
use crate::error::{RefreshError, Result};
use crate::notifier::Status;
use crate::periods::PeriodTokens;
use crate::restrictions::{due_reports, restrictions_for, ReportSchedule, RestrictionCommand};
use crate::session::with_session;

pub const REFRESH_PROCESS: &str = "SAP Refresh - Refresh Reports";
pub const COLLECT_PROCESS: &str = "SAP Refresh - Collect Information";

/// Outcome of a run over several reports.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    /// Files processed successfully, with what they produced.
    pub succeeded: Vec<(String, PathBuf)>,
    /// Files that failed, with the error message.
    pub failed: Vec<(String, String)>,
}

impl BatchSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Workbooks (`.xlsx`, any case) directly inside `dir`, sorted by name.
pub fn find_reports(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut reports = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_xlsx = path
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("xlsx"));
        if is_xlsx && path.is_file() {
            reports.push(path);
        }
    }
    reports.sort();
    Ok(reports)
}

/// Read a report's data source, variables and filters and export them.
pub fn get_report_information(ctx: &Context, path: &Path) -> Result<PathBuf> {
    with_session(ctx, |session| {
        session.open_report(path)?;
        session.calculate()?;
        session.get_data_source()?;
        session.logon(None)?;
        session.refresh()?;
        session.additional_source_info()?;
        session.variables_filters_list()?;
        session.export_variables_filters()
    })
}

/// [`get_report_information`] for every workbook in the data directory.
pub fn collect_information(ctx: &Context) -> Result<BatchSummary> {
    let reports = find_reports(&ctx.config.settings.data_directory)?;
    tracing::info!("Collecting information from {} reports", reports.len());
    let mut summary = BatchSummary::default();
    for path in reports {
        let name = display_name(&path);
        match get_report_information(ctx, &path) {
            Ok(exported) => summary.succeeded.push((name, exported)),
            Err(e) => {
                tracing::error!("Couldn't collect information from {name}: {e}");
                summary.failed.push((name, e.to_string()));
            }
        }
    }
    Ok(summary)
}

/// Refresh one scheduled report with its restrictions applied, then notify.
pub fn refresh_report(
    ctx: &Context,
    schedule: &ReportSchedule,
    tokens: &PeriodTokens,
) -> Result<PathBuf> {
    let path = ctx.report_path(&schedule.filename);
    if !path.is_file() {
        return Err(RefreshError::Config(format!("report {} not found", path.display())));
    }
    let rows = &ctx.config.restrictions;
    let filters = restrictions_for(rows, &schedule.filename, RestrictionCommand::SetFilter, tokens);
    let variables = restrictions_for(rows, &schedule.filename, RestrictionCommand::SetVariable, tokens);

    with_session(ctx, |session| {
        session.open_report(&path)?;
        session.calculate()?;
        session.get_data_source()?;
        session.logon(Some(schedule.data_source.as_str()))?;
        session.refresh_data()?;
        if !filters.is_empty() {
            session.set_refresh_filters(&filters)?;
        }
        if !variables.is_empty() {
            session.set_refresh_variables(&variables)?;
        }
        Ok(())
    })?;

    ctx.notify(
        Status::Success,
        REFRESH_PROCESS,
        &format!("Report refreshed -> {}", path.display()),
    );
    Ok(path)
}

/// Refresh every report due on `today`. A failing report is logged and
/// notified; the remaining reports still run.
pub fn refresh_auto_reports(ctx: &Context, today: NaiveDate) -> BatchSummary {
    let tokens = PeriodTokens::for_date(today);
    let due = due_reports(&ctx.config.reports, today);
    tracing::info!("{} of {} reports due on {today}", due.len(), ctx.config.reports.len());

    let mut summary = BatchSummary::default();
    for schedule in due {
        match refresh_report(ctx, schedule, &tokens) {
            Ok(path) => summary.succeeded.push((schedule.filename.clone(), path)),
            Err(e) => {
                let message = format!("Couldn't refresh {}: {e}", schedule.filename);
                tracing::error!("{message}");
                ctx.notify(Status::Error, REFRESH_PROCESS, &message);
                summary.failed.push((schedule.filename.clone(), e.to_string()));
            }
        }
    }
    tracing::info!(
        "Refreshed {} reports, {} failed",
        summary.succeeded.len(),
        summary.failed.len()
    );
    summary
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_reports_case_insensitive_and_flat() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.xlsx", "A.XLSX", "notes.txt", "old.xls"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested.xlsx")).unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub").join("c.xlsx"), b"").unwrap();

        let names: Vec<_> = find_reports(dir.path())
            .unwrap()
            .iter()
            .map(|p| display_name(p))
            .collect();
        assert_eq!(names, ["A.XLSX", "b.xlsx"]);
    }
}
