//! Subprocess management and JSON IPC for the Excel COM bridge process.

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Stdio};

use excel_com_protocol::{
    Command as BridgeCommand, Request, Response, ResponseData, ResponseResult, Value,
};

/// Errors from the Excel COM bridge.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Failed to spawn bridge process: {0}")]
    SpawnFailed(#[from] std::io::Error),

    #[error("Bridge process not running")]
    NotRunning,

    #[error("Failed to send command to bridge: {0}")]
    SendFailed(String),

    #[error("Failed to read response from bridge: {0}")]
    ReadFailed(String),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("{message}")]
    Com {
        message: String,
        hresult: Option<i32>,
    },

    #[error("Unexpected response data for {0}")]
    UnexpectedResponse(&'static str),

    #[error("WINE not found. Install WINE and ensure 'wine' is in PATH.")]
    WineNotFound,

    #[error("Bridge executable not found at: {0}")]
    BridgeExeNotFound(String),
}

impl BridgeError {
    /// HRESULT reported by COM for the failing call, if any.
    pub fn hresult(&self) -> Option<i32> {
        match self {
            BridgeError::Com { hresult, .. } => *hresult,
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Configuration for the Excel COM bridge.
#[derive(Debug, Clone)]
pub struct ExcelBridgeConfig {
    /// Path to the `excel-com-bridge.exe` Windows executable.
    /// If None, will search in common locations relative to the current binary.
    pub bridge_exe_path: Option<PathBuf>,

    /// WINE executable used to launch the bridge. `None` launches the bridge
    /// directly, which is what a Windows host wants.
    pub wine_path: Option<PathBuf>,

    /// Optional WINEPREFIX to use (for isolating the WINE environment).
    pub wine_prefix: Option<PathBuf>,
}

impl Default for ExcelBridgeConfig {
    fn default() -> Self {
        Self {
            bridge_exe_path: None,
            wine_path: if cfg!(windows) {
                None
            } else {
                Some(PathBuf::from("wine"))
            },
            wine_prefix: None,
        }
    }
}

/// Handle to a workbook opened through the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkbookHandle(pub u64);

/// The main handle for communicating with the Excel COM bridge.
///
/// This manages the bridge subprocess lifecycle (one `Excel.Application`
/// per bridge) and exposes the automation calls as methods.
pub struct ExcelBridge {
    child: Child,
    /// Taken on shutdown so the bridge sees end of input.
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    next_id: u64,
    under_wine: bool,
    shut_down: bool,
}

impl ExcelBridge {
    /// Start the bridge process and initialize Excel.
    pub fn start(config: ExcelBridgeConfig) -> Result<Self> {
        let exe_path = config.bridge_exe_path.unwrap_or_else(find_bridge_exe);

        if !exe_path.exists() {
            return Err(BridgeError::BridgeExeNotFound(exe_path.display().to_string()));
        }

        let under_wine = config.wine_path.is_some();
        let mut cmd = match &config.wine_path {
            Some(wine) => {
                let mut cmd = std::process::Command::new(wine);
                if let Some(prefix) = &config.wine_prefix {
                    cmd.env("WINEPREFIX", prefix);
                }
                cmd.arg(&exe_path);
                cmd
            }
            None => std::process::Command::new(&exe_path),
        };

        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::inherit()); // Bridge diagnostics go to our stderr

        tracing::debug!("Starting Excel bridge: {:?}", cmd);
        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound && under_wine {
                BridgeError::WineNotFound
            } else {
                BridgeError::SpawnFailed(e)
            }
        })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            return Err(BridgeError::NotRunning);
        };

        let mut bridge = Self {
            child,
            stdin: Some(stdin),
            stdout: BufReader::new(stdout),
            next_id: 1,
            under_wine,
            shut_down: false,
        };

        // Initialize COM and Excel
        bridge.send_command(BridgeCommand::Init)?;
        tracing::info!("Excel bridge started (pid {})", bridge.child.id());

        Ok(bridge)
    }

    /// Send a command to the bridge and wait for the response.
    fn send_command(&mut self, command: BridgeCommand) -> Result<Option<ResponseData>> {
        if self.shut_down {
            return Err(BridgeError::NotRunning);
        }

        let id = self.next_id;
        self.next_id += 1;

        let request = Request { id, command };
        let json = serde_json::to_string(&request)?;
        tracing::trace!("bridge <- {json}");

        let stdin = self.stdin.as_mut().ok_or(BridgeError::NotRunning)?;
        writeln!(stdin, "{json}").map_err(|e| BridgeError::SendFailed(e.to_string()))?;
        stdin
            .flush()
            .map_err(|e| BridgeError::SendFailed(e.to_string()))?;

        let mut line = String::new();
        self.stdout
            .read_line(&mut line)
            .map_err(|e| BridgeError::ReadFailed(e.to_string()))?;

        if line.is_empty() {
            return Err(BridgeError::NotRunning);
        }
        tracing::trace!("bridge -> {}", line.trim_end());

        let response: Response = serde_json::from_str(&line)?;
        match response.result {
            ResponseResult::Ok { data } => Ok(data),
            ResponseResult::Error { message, hresult } => Err(BridgeError::Com { message, hresult }),
        }
    }

    fn send_for_value(&mut self, command: BridgeCommand, what: &'static str) -> Result<Value> {
        match self.send_command(command)? {
            Some(ResponseData::Value { value }) => Ok(value),
            _ => Err(BridgeError::UnexpectedResponse(what)),
        }
    }

    fn send_for_string(&mut self, command: BridgeCommand, what: &'static str) -> Result<String> {
        match self.send_for_value(command, what)? {
            Value::String(s) => Ok(s),
            _ => Err(BridgeError::UnexpectedResponse(what)),
        }
    }

    /// Convert a local path into the form Excel expects, translating to a
    /// WINE drive path when the bridge runs under WINE.
    pub fn host_path(&self, path: &Path) -> String {
        if self.under_wine {
            linux_to_wine_path(path)
        } else {
            path.display().to_string()
        }
    }

    /// `Workbooks.Open(path, UpdateLinks, ReadOnly)`.
    pub fn open_workbook(
        &mut self,
        path: &Path,
        update_links: bool,
        read_only: bool,
    ) -> Result<WorkbookHandle> {
        let path = self.host_path(path);
        let data = self.send_command(BridgeCommand::OpenWorkbook {
            path,
            update_links,
            read_only,
        })?;
        match data {
            Some(ResponseData::WorkbookHandle { workbook }) => Ok(WorkbookHandle(workbook)),
            _ => Err(BridgeError::UnexpectedResponse("OpenWorkbook")),
        }
    }

    /// `Application.Run(name, args...)`.
    pub fn run(&mut self, name: &str, args: &[Value]) -> Result<Value> {
        self.send_for_value(
            BridgeCommand::Run {
                name: name.to_string(),
                args: args.to_vec(),
            },
            "Run",
        )
    }

    pub fn get_property(&mut self, name: &str) -> Result<Value> {
        self.send_for_value(
            BridgeCommand::GetProperty {
                name: name.to_string(),
            },
            "GetProperty",
        )
    }

    pub fn set_property(&mut self, name: &str, value: Value) -> Result<()> {
        self.send_command(BridgeCommand::SetProperty {
            name: name.to_string(),
            value,
        })?;
        Ok(())
    }

    /// Connection state of a COM add-in; `None` when it is not registered.
    pub fn addin_connected(&mut self, prog_id: &str) -> Result<Option<bool>> {
        let value = self.send_for_value(
            BridgeCommand::GetAddInConnected {
                prog_id: prog_id.to_string(),
            },
            "GetAddInConnected",
        )?;
        Ok(value.as_bool())
    }

    pub fn set_addin_connected(&mut self, prog_id: &str, connect: bool) -> Result<()> {
        self.send_command(BridgeCommand::SetAddInConnected {
            prog_id: prog_id.to_string(),
            connect,
        })?;
        Ok(())
    }

    pub fn active_workbook_name(&mut self) -> Result<String> {
        self.send_for_string(BridgeCommand::ActiveWorkbookName, "ActiveWorkbookName")
    }

    pub fn activate_window(&mut self, name: &str) -> Result<()> {
        self.send_command(BridgeCommand::ActivateWindow {
            name: name.to_string(),
        })?;
        Ok(())
    }

    pub fn named_range_sheet(&mut self, name: &str) -> Result<String> {
        self.send_for_string(
            BridgeCommand::NamedRangeSheet {
                name: name.to_string(),
            },
            "NamedRangeSheet",
        )
    }

    /// Force Excel to recalculate all open workbooks.
    pub fn calculate(&mut self) -> Result<()> {
        self.send_command(BridgeCommand::Calculate)?;
        Ok(())
    }

    pub fn save_workbook(&mut self, workbook: WorkbookHandle) -> Result<()> {
        self.send_command(BridgeCommand::SaveWorkbook {
            workbook: workbook.0,
        })?;
        Ok(())
    }

    pub fn close_workbook(&mut self, workbook: WorkbookHandle) -> Result<()> {
        self.send_command(BridgeCommand::CloseWorkbook {
            workbook: workbook.0,
        })?;
        Ok(())
    }

    /// Shut down the bridge: close all workbooks, quit Excel, and wait for the process.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.shut_down {
            return Ok(());
        }
        let result = self.send_command(BridgeCommand::Shutdown);
        self.shut_down = true;
        drop(self.stdin.take());
        if let Err(e) = &result {
            tracing::warn!("Excel bridge shutdown failed ({e}), killing process");
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
        result.map(|_| ())
    }
}

impl Drop for ExcelBridge {
    fn drop(&mut self) {
        if !self.shut_down {
            tracing::warn!("Excel bridge dropped without shutdown, killing process");
            drop(self.stdin.take());
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Convert a Linux filesystem path to a WINE (Windows) path.
///
/// WINE maps `/` to `Z:\`, so `/home/user/file.xlsx` becomes `Z:\home\user\file.xlsx`.
/// The WINE prefix's `drive_c` maps to `C:\`.
pub fn linux_to_wine_path(linux_path: &Path) -> String {
    let abs = if linux_path.is_absolute() {
        linux_path.to_path_buf()
    } else {
        std::env::current_dir().unwrap_or_default().join(linux_path)
    };

    format!("Z:{}", abs.display()).replace('/', "\\")
}

/// Attempt to locate the bridge exe relative to the current executable or in common paths.
fn find_bridge_exe() -> PathBuf {
    if let Ok(mut exe) = std::env::current_exe() {
        exe.pop();
        let candidate = exe.join("excel-com-bridge.exe");
        if candidate.exists() {
            return candidate;
        }
    }

    for profile in ["release", "debug"] {
        let target_path =
            PathBuf::from(format!("target/x86_64-pc-windows-gnu/{profile}/excel-com-bridge.exe"));
        if target_path.exists() {
            return target_path;
        }
    }

    PathBuf::from("excel-com-bridge.exe")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linux_to_wine_path_absolute() {
        assert_eq!(
            linux_to_wine_path(Path::new("/srv/reports/sales.xlsx")),
            r"Z:\srv\reports\sales.xlsx"
        );
    }

    #[test]
    fn test_missing_bridge_exe_is_reported() {
        let config = ExcelBridgeConfig {
            bridge_exe_path: Some(PathBuf::from("/nonexistent/excel-com-bridge.exe")),
            ..ExcelBridgeConfig::default()
        };
        match ExcelBridge::start(config) {
            Err(BridgeError::BridgeExeNotFound(path)) => {
                assert!(path.ends_with("excel-com-bridge.exe"))
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("bridge should not start"),
        }
    }

    #[test]
    fn test_hresult_only_for_com_errors() {
        let com = BridgeError::Com {
            message: "boom".into(),
            hresult: Some(-2147352567),
        };
        assert_eq!(com.hresult(), Some(-2147352567));
        assert_eq!(BridgeError::NotRunning.hresult(), None);
    }

    /// A stand-in bridge that accepts `Init` and fails every other command.
    #[cfg(unix)]
    fn failing_bridge(dir: &Path) -> ExcelBridgeConfig {
        let script = dir.join("excel-com-bridge.exe");
        std::fs::write(
            &script,
            r#"while read -r line; do
  case "$line" in
    *'"Init"'*) echo '{"id":1,"status":"ok"}' ;;
    *) echo '{"id":0,"status":"error","message":"Quit failed","hresult":-2147352567}' ;;
  esac
done
"#,
        )
        .unwrap();
        // Launched the way WINE would be, with the script as its argument
        ExcelBridgeConfig {
            bridge_exe_path: Some(script),
            wine_path: Some(PathBuf::from("/bin/sh")),
            wine_prefix: None,
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_shutdown_does_not_hang() {
        let dir = tempfile::tempdir().unwrap();
        let mut bridge = ExcelBridge::start(failing_bridge(dir.path())).unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let result = bridge.shutdown();
            let _ = tx.send(result.map_err(|e| e.hresult()));
        });

        let result = rx
            .recv_timeout(std::time::Duration::from_secs(10))
            .expect("shutdown blocked on the bridge process");
        assert_eq!(result, Err(Some(-2147352567)));
    }

    #[cfg(unix)]
    #[test]
    fn test_commands_after_shutdown_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut bridge = ExcelBridge::start(failing_bridge(dir.path())).unwrap();
        let _ = bridge.shutdown();
        assert!(matches!(bridge.calculate(), Err(BridgeError::NotRunning)));
        assert!(bridge.shutdown().is_ok());
    }
}
