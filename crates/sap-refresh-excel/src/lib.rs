//! Native client library for Excel COM automation via the bridge process.
//!
//! This crate spawns a Windows `.exe` (directly on Windows, under WINE
//! elsewhere) that automates Excel through COM, communicating over
//! JSON-over-stdio. It exposes the calls SAP Analysis for Office automation
//! needs: opening workbooks, `Application.Run` for the add-in's macro API,
//! application properties, COM add-ins, windows and workbook names.
//!
//! # Architecture
//!
//! ```text
//! sap-refresh (session orchestration)
//!     └── ExcelBridge (this crate)
//!           └── spawns: [wine] excel-com-bridge.exe
//!                 └── COM: Excel.Application + SapExcelAddIn
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use sap_refresh_excel::{ExcelBridge, ExcelBridgeConfig, Value};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut bridge = ExcelBridge::start(ExcelBridgeConfig::default())?;
//!     let wb = bridge.open_workbook(Path::new("report.xlsx"), false, false)?;
//!     let status = bridge.run("SAPExecuteCommand", &[Value::from("Refresh")])?;
//!     println!("refresh status = {status}");
//!     bridge.save_workbook(wb)?;
//!     bridge.close_workbook(wb)?;
//!     bridge.shutdown()?;
//!     Ok(())
//! }
//! ```

mod bridge;

pub use bridge::{
    linux_to_wine_path, BridgeError, ExcelBridge, ExcelBridgeConfig, Result, WorkbookHandle,
};
pub use excel_com_protocol::{Value, ValueError};
