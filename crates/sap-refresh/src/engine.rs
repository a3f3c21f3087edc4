//! Ordered wrappers over the spreadsheet object model.
//!
//! Each function performs one step of a session against an [`ExcelHost`] and
//! translates host faults into the matching [`RefreshError`].

use std::path::Path;

use crate::descriptor::{CrosstabListing, DataSourceDescriptor};
use crate::error::{RefreshError, Result};
use crate::host::{ExcelHost, HostLauncher, ProcessKiller, Value, WorkbookId};
use crate::retry::RetryPolicy;

/// ProgID of the Analysis for Office COM add-in.
pub const SAP_ADDIN_PROG_ID: &str = "SapExcelAddIn";

/// `DISP_E_EXCEPTION`, raised when the add-in macros are not loaded.
pub const FUNCTION_NOT_AVAILABLE: i32 = -2147352567;

const XL_CURSOR_DEFAULT: f64 = -4143.0;

/// `Application.Calculation` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalculationMode {
    Automatic,
    Manual,
    SemiAutomatic,
    Other(i32),
}

impl CalculationMode {
    pub fn code(self) -> i32 {
        match self {
            CalculationMode::Automatic => -4105,
            CalculationMode::Manual => -4135,
            CalculationMode::SemiAutomatic => 2,
            CalculationMode::Other(code) => code,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            -4105 => CalculationMode::Automatic,
            -4135 => CalculationMode::Manual,
            2 => CalculationMode::SemiAutomatic,
            other => CalculationMode::Other(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalculationChange {
    Manual,
    Restore(CalculationMode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Optimization {
    Start,
    Stop,
}

pub fn open_application(launcher: &dyn HostLauncher) -> Result<Box<dyn ExcelHost>> {
    let app = launcher
        .launch()
        .map_err(RefreshError::AutomationUnavailable)?;
    tracing::debug!("Spreadsheet application started");
    Ok(app)
}

/// Open `path` writable without updating external links.
pub fn open_workbook(
    app: &mut dyn ExcelHost,
    path: &Path,
    policy: &RetryPolicy,
) -> Result<WorkbookId> {
    let workbook = policy
        .retry(&format!("open {}", path.display()), |_| {
            app.open_workbook(path, false, false)
        })
        .map_err(|source| RefreshError::WorkbookOpen {
            path: path.to_path_buf(),
            source,
        })?;
    tracing::info!("Opened workbook {}", path.display());
    Ok(workbook)
}

/// Connect the SAP add-in, or cycle it off and on when it is already
/// connected so its ribbon state is reloaded for the new workbook.
pub fn ensure_plugin_connected(app: &mut dyn ExcelHost) -> Result<()> {
    fn state(app: &mut dyn ExcelHost) -> Result<Option<bool>> {
        app.addin_connected(SAP_ADDIN_PROG_ID)
            .map_err(RefreshError::automation("COMAddIns.Connect"))
    }
    fn set(app: &mut dyn ExcelHost, connect: bool) -> Result<()> {
        app.set_addin_connected(SAP_ADDIN_PROG_ID, connect)
            .map_err(RefreshError::automation("COMAddIns.Connect"))
    }

    match state(app)? {
        None => return Err(RefreshError::PluginNotConnected(SAP_ADDIN_PROG_ID.to_string())),
        Some(false) => {
            tracing::debug!("Connecting {SAP_ADDIN_PROG_ID}");
            set(app, true)?;
        }
        Some(true) => {
            tracing::debug!("Reconnecting {SAP_ADDIN_PROG_ID}");
            set(app, false)?;
            set(app, true)?;
        }
    }

    if state(app)? != Some(true) {
        return Err(RefreshError::PluginNotConnected(SAP_ADDIN_PROG_ID.to_string()));
    }
    Ok(())
}

/// Activate the window of `filename` unless it is already the active workbook.
pub fn ensure_workbook_active(app: &mut dyn ExcelHost, filename: &str) -> Result<()> {
    let active = app
        .active_workbook_name()
        .map_err(RefreshError::automation("ActiveWorkbook.Name"))?;
    if active != filename {
        tracing::debug!("Active workbook is {active}, activating {filename}");
        app.activate_window(filename)
            .map_err(RefreshError::automation(format!("Windows({filename}).Activate")))?;
    }
    Ok(())
}

/// Apply `change`, returning the mode that was active before.
pub fn set_calculation_mode(
    app: &mut dyn ExcelHost,
    change: CalculationChange,
) -> Result<CalculationMode> {
    let current = app
        .get_property("Calculation")
        .map_err(RefreshError::automation("Calculation"))?;
    let previous = current
        .as_f64()
        .map(|code| CalculationMode::from_code(code as i32))
        .ok_or_else(|| RefreshError::UnexpectedResult {
            call: "Calculation".to_string(),
            detail: current.to_string(),
        })?;
    let target = match change {
        CalculationChange::Manual => CalculationMode::Manual,
        CalculationChange::Restore(mode) => mode,
    };
    app.set_property("Calculation", Value::from(f64::from(target.code())))
        .map_err(RefreshError::automation("Calculation"))?;
    tracing::debug!("Calculation mode {previous:?} -> {target:?}");
    Ok(previous)
}

pub fn toggle_optimization(app: &mut dyn ExcelHost, step: Optimization) -> Result<()> {
    let settings: Vec<(&str, Value)> = match step {
        Optimization::Start => vec![
            ("Visible", Value::Bool(true)),
            ("DisplayAlerts", Value::Bool(false)),
            ("ScreenUpdating", Value::Bool(false)),
        ],
        Optimization::Stop => vec![
            ("DisplayAlerts", Value::Bool(true)),
            ("ScreenUpdating", Value::Bool(true)),
            ("Cursor", Value::Number(XL_CURSOR_DEFAULT)),
            ("StatusBar", Value::Bool(false)),
        ],
    };
    for (name, value) in settings {
        app.set_property(name, value)
            .map_err(RefreshError::automation(name))?;
    }
    Ok(())
}

/// Identify the data source behind the active workbook's crosstab.
///
/// Fails with [`RefreshError::DataSourceDiscovery`] when the add-in macros
/// are unavailable, which happens when another Excel instance holds them.
pub fn discover_data_source(app: &mut dyn ExcelHost) -> Result<DataSourceDescriptor> {
    let listing = app
        .run("SAPListOf", &[Value::from("CROSSTABS")])
        .map_err(|e| {
            if e.hresult == Some(FUNCTION_NOT_AVAILABLE) {
                RefreshError::DataSourceDiscovery(e)
            } else {
                RefreshError::Automation {
                    call: "SAPListOf".to_string(),
                    source: e,
                }
            }
        })?;
    let listing = CrosstabListing::parse(&listing)?;
    let range_name = listing.range_name();
    let sheet = app
        .named_range_sheet(&range_name)
        .map_err(RefreshError::automation(format!("Names({range_name})")))?;
    let descriptor = DataSourceDescriptor::new(listing, sheet)?;
    tracing::info!(
        "Data source {} on sheet {} ({})",
        descriptor.source_id,
        descriptor.sheet,
        descriptor.crosstab_name
    );
    Ok(descriptor)
}

pub fn calculate(app: &mut dyn ExcelHost) -> Result<()> {
    app.calculate().map_err(RefreshError::automation("Calculate"))
}

/// Save, then close.
pub fn close_workbook(app: &mut dyn ExcelHost, workbook: WorkbookId) -> Result<()> {
    app.save_workbook(workbook)
        .map_err(RefreshError::automation("Workbook.Save"))?;
    app.close_workbook(workbook)
        .map_err(RefreshError::automation("Workbook.Close"))?;
    tracing::debug!("Workbook {workbook} saved and closed");
    Ok(())
}

pub fn kill_stray_processes(killer: &dyn ProcessKiller) -> usize {
    let killed = killer.kill_stray_processes();
    if killed > 0 {
        tracing::info!("Killed {killed} stray spreadsheet processes");
    }
    killed
}
