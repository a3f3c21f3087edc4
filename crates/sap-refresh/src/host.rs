//! The spreadsheet application as seen by a session.
//!
//! [`ExcelHost`] is the slice of the Excel object model a refresh needs; the
//! production implementation forwards to the COM bridge, tests substitute a
//! recording fake. Errors keep the COM HRESULT so the engine can recognise
//! vendor error codes.

use std::fmt;
use std::path::Path;

use sap_refresh_excel::{BridgeError, ExcelBridge, ExcelBridgeConfig, WorkbookHandle};

pub use sap_refresh_excel::Value;

/// Identifier of a workbook opened in a host.
pub type WorkbookId = u64;

/// A failed call into the automation host.
#[derive(Debug, Clone, PartialEq)]
pub struct HostError {
    pub hresult: Option<i32>,
    pub message: String,
}

impl HostError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            hresult: None,
            message: message.into(),
        }
    }

    pub fn with_hresult(hresult: i32, message: impl Into<String>) -> Self {
        Self {
            hresult: Some(hresult),
            message: message.into(),
        }
    }
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.hresult {
            Some(code) => write!(f, "{} ({code})", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for HostError {}

impl From<BridgeError> for HostError {
    fn from(e: BridgeError) -> Self {
        HostError {
            hresult: e.hresult(),
            message: e.to_string(),
        }
    }
}

pub type HostResult<T> = std::result::Result<T, HostError>;

/// One running spreadsheet application.
pub trait ExcelHost {
    fn open_workbook(&mut self, path: &Path, update_links: bool, read_only: bool)
        -> HostResult<WorkbookId>;

    /// The generic macro dispatcher (`Application.Run`).
    fn run(&mut self, name: &str, args: &[Value]) -> HostResult<Value>;

    fn get_property(&mut self, name: &str) -> HostResult<Value>;

    fn set_property(&mut self, name: &str, value: Value) -> HostResult<()>;

    /// `None` when no add-in with `prog_id` is registered.
    fn addin_connected(&mut self, prog_id: &str) -> HostResult<Option<bool>>;

    fn set_addin_connected(&mut self, prog_id: &str, connect: bool) -> HostResult<()>;

    fn active_workbook_name(&mut self) -> HostResult<String>;

    fn activate_window(&mut self, name: &str) -> HostResult<()>;

    /// Sheet the workbook-level name `name` refers to, in the active workbook.
    fn named_range_sheet(&mut self, name: &str) -> HostResult<String>;

    fn calculate(&mut self) -> HostResult<()>;

    fn save_workbook(&mut self, workbook: WorkbookId) -> HostResult<()>;

    fn close_workbook(&mut self, workbook: WorkbookId) -> HostResult<()>;

    fn quit(&mut self) -> HostResult<()>;
}

/// Starts spreadsheet applications.
pub trait HostLauncher {
    fn launch(&self) -> HostResult<Box<dyn ExcelHost>>;
}

/// Terminates leftover spreadsheet processes.
pub trait ProcessKiller {
    /// Kill every matching process; returns how many were killed.
    fn kill_stray_processes(&self) -> usize;
}

impl ExcelHost for ExcelBridge {
    fn open_workbook(
        &mut self,
        path: &Path,
        update_links: bool,
        read_only: bool,
    ) -> HostResult<WorkbookId> {
        Ok(ExcelBridge::open_workbook(self, path, update_links, read_only)?.0)
    }

    fn run(&mut self, name: &str, args: &[Value]) -> HostResult<Value> {
        Ok(ExcelBridge::run(self, name, args)?)
    }

    fn get_property(&mut self, name: &str) -> HostResult<Value> {
        Ok(ExcelBridge::get_property(self, name)?)
    }

    fn set_property(&mut self, name: &str, value: Value) -> HostResult<()> {
        Ok(ExcelBridge::set_property(self, name, value)?)
    }

    fn addin_connected(&mut self, prog_id: &str) -> HostResult<Option<bool>> {
        Ok(ExcelBridge::addin_connected(self, prog_id)?)
    }

    fn set_addin_connected(&mut self, prog_id: &str, connect: bool) -> HostResult<()> {
        Ok(ExcelBridge::set_addin_connected(self, prog_id, connect)?)
    }

    fn active_workbook_name(&mut self) -> HostResult<String> {
        Ok(ExcelBridge::active_workbook_name(self)?)
    }

    fn activate_window(&mut self, name: &str) -> HostResult<()> {
        Ok(ExcelBridge::activate_window(self, name)?)
    }

    fn named_range_sheet(&mut self, name: &str) -> HostResult<String> {
        Ok(ExcelBridge::named_range_sheet(self, name)?)
    }

    fn calculate(&mut self) -> HostResult<()> {
        Ok(ExcelBridge::calculate(self)?)
    }

    fn save_workbook(&mut self, workbook: WorkbookId) -> HostResult<()> {
        Ok(ExcelBridge::save_workbook(self, WorkbookHandle(workbook))?)
    }

    fn close_workbook(&mut self, workbook: WorkbookId) -> HostResult<()> {
        Ok(ExcelBridge::close_workbook(self, WorkbookHandle(workbook))?)
    }

    fn quit(&mut self) -> HostResult<()> {
        Ok(ExcelBridge::shutdown(self)?)
    }
}

/// Launches Excel through the COM bridge process.
#[derive(Debug, Clone, Default)]
pub struct BridgeLauncher {
    pub config: ExcelBridgeConfig,
}

impl BridgeLauncher {
    pub fn new(config: ExcelBridgeConfig) -> Self {
        Self { config }
    }
}

impl HostLauncher for BridgeLauncher {
    fn launch(&self) -> HostResult<Box<dyn ExcelHost>> {
        let bridge = ExcelBridge::start(self.config.clone())?;
        Ok(Box::new(bridge))
    }
}

/// Kills processes by executable name using the OS process table.
#[derive(Debug, Clone)]
pub struct SystemProcessKiller {
    pub process_name: String,
}

impl Default for SystemProcessKiller {
    fn default() -> Self {
        Self {
            process_name: "excel.exe".to_string(),
        }
    }
}

impl ProcessKiller for SystemProcessKiller {
    fn kill_stray_processes(&self) -> usize {
        use sysinfo::{ProcessesToUpdate, System};

        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::All, true);
        let mut killed = 0;
        for (pid, process) in system.processes() {
            let name = process.name().to_string_lossy();
            if name.eq_ignore_ascii_case(&self.process_name) {
                if process.kill() {
                    tracing::warn!("Killed stray {name} (pid {pid})");
                    killed += 1;
                } else {
                    tracing::warn!("Couldn't kill stray {name} (pid {pid})");
                }
            }
        }
        killed
    }
}
