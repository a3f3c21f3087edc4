mod common;

use calamine::{open_workbook_auto, Reader};
use chrono::NaiveDate;
use common::{schedule, Harness};
use pretty_assertions::assert_eq;
use sap_refresh::workflow::{
    collect_information, get_report_information, refresh_auto_reports, refresh_report,
    REFRESH_PROCESS,
};
use sap_refresh::{PeriodTokens, RestrictionCommand, RestrictionRow, Status, Value};

fn october_16() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
}

fn filter(filename: &str, field: &str, value: &str) -> RestrictionRow {
    RestrictionRow {
        filename: filename.to_string(),
        command: RestrictionCommand::SetFilter,
        field: field.to_string(),
        field_name: field.to_string(),
        value: value.to_string(),
        data_source: "DS_1".to_string(),
    }
}

#[test]
fn test_batch_refreshes_only_due_reports() {
    let h = Harness::with_config(
        vec![schedule("A.xlsx", 99), schedule("B.xlsx", 1)],
        vec![filter("A.xlsx", "0COMP_CODE", "1000"), filter("B.xlsx", "0COMP_CODE", "2000")],
    );
    let a = h.report("A.xlsx");
    h.report("B.xlsx");

    let summary = refresh_auto_reports(&h.ctx, october_16());
    assert!(summary.is_success());
    assert_eq!(summary.succeeded, [("A.xlsx".to_string(), a.clone())]);
    h.with_state(|s| assert_eq!(s.opened, [a.clone()]));
    assert_eq!(
        h.calls_to("SAPSetFilter"),
        ["SAPSetFilter(DS_1, 0COMP_CODE, 1000, INPUT_STRING)"]
    );

    let sent = h.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, Status::Success);
    assert_eq!(sent[0].1, REFRESH_PROCESS);
}

#[test]
fn test_calendar_token_reaches_filter_literally() {
    let h = Harness::with_config(
        vec![schedule("A.xlsx", 99)],
        vec![filter("A.xlsx", "0CALMONTH", "range_previous_month")],
    );
    h.report("A.xlsx");

    let tokens = PeriodTokens::for_date(october_16());
    refresh_report(&h.ctx, &h.ctx.config.reports[0], &tokens).unwrap();
    assert_eq!(
        h.calls_to("SAPSetFilter"),
        ["SAPSetFilter(DS_1, 0CALMONTH, 9 - 9, INPUT_STRING)"]
    );
}

#[test]
fn test_refresh_report_sequence() {
    let mut variable = filter("A.xlsx", "0P_YEAR", "year_current_period");
    variable.command = RestrictionCommand::SetVariable;
    let h = Harness::with_config(vec![schedule("A.xlsx", 99)], vec![variable]);
    h.report("A.xlsx");

    refresh_report(&h.ctx, &h.ctx.config.reports[0], &PeriodTokens::for_date(october_16())).unwrap();
    let sap_calls: Vec<String> = h
        .calls()
        .into_iter()
        .filter(|c| c.starts_with("SAP") || c == "Calculate")
        .collect();
    assert_eq!(
        sap_calls,
        [
            "Calculate",
            "SAPListOf(CROSSTABS)",
            "SAPLogon(DS_1, 100, RFC_USER, s3cret)",
            "SAPExecuteCommand(RefreshData, DS_1)",
            "SAPSetRefreshBehaviour(Off)",
            "SAPExecuteCommand(PauseVariableSubmit, On)",
            "SAPSetVariable(0P_YEAR, 2026, INPUT_STRING, DS_1)",
            "SAPExecuteCommand(PauseVariableSubmit, Off)",
            "SAPSetRefreshBehaviour(On)",
        ]
    );
    h.with_state(|s| assert_eq!(s.quits, 1));
}

#[test]
fn test_batch_continues_after_failing_report() {
    let h = Harness::with_config(vec![schedule("A.xlsx", 99), schedule("B.xlsx", 20)], Vec::new());
    h.report("A.xlsx");
    let b = h.report("B.xlsx");
    for _ in 0..3 {
        h.respond("SAPLogon", Ok(Value::Number(0.0)));
    }

    let summary = refresh_auto_reports(&h.ctx, october_16());
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].0, "A.xlsx");
    assert!(summary.failed[0].1.contains("DS_1"), "{}", summary.failed[0].1);
    assert_eq!(summary.succeeded, [("B.xlsx".to_string(), b)]);

    // Both sessions were closed
    h.with_state(|s| assert_eq!(s.quits, 2));
    let statuses: Vec<Status> = h.sent.lock().unwrap().iter().map(|(s, _, _)| *s).collect();
    assert_eq!(statuses, [Status::Error, Status::Success]);
}

#[test]
fn test_missing_report_file_fails_without_launching() {
    let h = Harness::with_config(vec![schedule("Gone.xlsx", 99)], Vec::new());
    let summary = refresh_auto_reports(&h.ctx, october_16());
    assert_eq!(summary.failed.len(), 1);
    h.with_state(|s| assert_eq!(s.launches, 0));
}

#[test]
fn test_get_report_information_exports_workbook() {
    let h = Harness::new();
    let path = h.report("Sales.xlsx");
    h.respond(
        "SAPListOfDynamicFilters",
        Ok(Value::Array(vec![Value::from("Company Code"), Value::from("1000")])),
    );
    h.respond(
        "SAPListOfDimensions",
        Ok(Value::Array(vec![Value::from("0COMP_CODE"), Value::from("Company Code")])),
    );

    let exported = get_report_information(&h.ctx, &path).unwrap();
    assert_eq!(exported, h.dir.path().join("info").join("Sales__information.xlsx"));
    assert_eq!(h.calls_to("SAPExecuteCommand"), ["SAPExecuteCommand(Refresh)"]);

    let mut workbook = open_workbook_auto(&exported).unwrap();
    let table = workbook.worksheet_range("variables_filters_info").unwrap();
    let row: Vec<String> = table.rows().nth(1).unwrap().iter().map(|c| c.to_string()).collect();
    assert_eq!(
        row,
        ["SAPSetFilter", "0COMP_CODE", "Company Code", "1000", "DS_1", "value", "info", "Report"]
    );
}

#[test]
fn test_collect_information_visits_every_workbook() {
    let h = Harness::new();
    h.report("A.xlsx");
    h.report("B.XLSX");
    std::fs::write(h.ctx.report_path("notes.txt"), b"").unwrap();

    let summary = collect_information(&h.ctx).unwrap();
    assert!(summary.is_success());
    let names: Vec<&str> = summary.succeeded.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, ["A.xlsx", "B.XLSX"]);
    assert!(h.dir.path().join("info").join("B__information.XLSX").is_file());
}
