//! A scripted Excel stand-in shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use sap_refresh::{
    AppConfig, Context, ExcelHost, HostError, HostLauncher, HostResult, Notify, ProcessKiller,
    ReportSchedule, RestrictionRow, RetryPolicies, SecretCodec, Settings, Status, Value,
    WorkbookId,
};
use tempfile::TempDir;

pub const PASSWORD: &str = "s3cret";

/// What the fake application has been asked to do, and how it answers.
pub struct FakeState {
    pub calls: Vec<String>,
    /// Queued answers for `Application.Run`, keyed by `Name(first arg)` or `Name`.
    pub responses: HashMap<String, VecDeque<HostResult<Value>>>,
    /// Number of upcoming `open_workbook` calls that fail.
    pub open_failures: u32,
    /// `None` simulates a missing add-in.
    pub addin: Option<bool>,
    pub addin_history: Vec<bool>,
    pub calculation: f64,
    pub active_workbook: String,
    /// Keep another workbook active after opening.
    pub steal_focus: bool,
    pub opened: Vec<PathBuf>,
    pub launches: usize,
    pub launch_fails: bool,
    pub quits: usize,
    pub kills: usize,
    next_workbook: WorkbookId,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            responses: HashMap::new(),
            open_failures: 0,
            addin: Some(true),
            addin_history: Vec::new(),
            calculation: -4105.0,
            active_workbook: String::new(),
            steal_focus: false,
            opened: Vec::new(),
            launches: 0,
            launch_fails: false,
            quits: 0,
            kills: 0,
            next_workbook: 1,
        }
    }
}

fn default_response(name: &str) -> Value {
    match name {
        "SAPListOf" => Value::Array(vec![
            Value::from("CROSSTAB_1"),
            Value::from("Table 1"),
            Value::from("DS_1"),
        ]),
        "SAPListOfVariables" | "SAPListOfDynamicFilters" | "SAPListOfDimensions" => Value::Null,
        "SAPGetVariable" => Value::from("0P_VARIABLE"),
        "SapGetSourceInfo" => Value::from("info"),
        "SAPGetProperty" => Value::Bool(true),
        _ => Value::Number(1.0),
    }
}

pub struct FakeExcel {
    state: Arc<Mutex<FakeState>>,
}

impl FakeExcel {
    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }
}

impl ExcelHost for FakeExcel {
    fn open_workbook(&mut self, path: &Path, update_links: bool, read_only: bool) -> HostResult<WorkbookId> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(format!("OpenWorkbook({}, {update_links}, {read_only})", path.display()));
        if state.open_failures > 0 {
            state.open_failures -= 1;
            return Err(HostError::new("file is locked"));
        }
        state.opened.push(path.to_path_buf());
        if !state.steal_focus {
            state.active_workbook = path
                .file_name()
                .map(|f| f.to_string_lossy().into_owned())
                .unwrap_or_default();
        }
        let id = state.next_workbook;
        state.next_workbook += 1;
        Ok(id)
    }

    fn run(&mut self, name: &str, args: &[Value]) -> HostResult<Value> {
        let mut state = self.state.lock().unwrap();
        let rendered: Vec<String> = args.iter().map(Value::to_text).collect();
        state.calls.push(format!("{name}({})", rendered.join(", ")));
        let keyed = rendered.first().map(|first| format!("{name}({first})"));
        let queued = keyed
            .into_iter()
            .chain(std::iter::once(name.to_string()))
            .find_map(|key| state.responses.get_mut(&key).and_then(VecDeque::pop_front));
        queued.unwrap_or_else(|| Ok(default_response(name)))
    }

    fn get_property(&mut self, name: &str) -> HostResult<Value> {
        let state = self.state.lock().unwrap();
        match name {
            "Calculation" => Ok(Value::Number(state.calculation)),
            other => Err(HostError::new(format!("no property {other}"))),
        }
    }

    fn set_property(&mut self, name: &str, value: Value) -> HostResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("Set {name}={value}"));
        if name == "Calculation" {
            state.calculation = value.as_f64().unwrap_or_default();
        }
        Ok(())
    }

    fn addin_connected(&mut self, _prog_id: &str) -> HostResult<Option<bool>> {
        Ok(self.state.lock().unwrap().addin)
    }

    fn set_addin_connected(&mut self, _prog_id: &str, connect: bool) -> HostResult<()> {
        let mut state = self.state.lock().unwrap();
        state.addin_history.push(connect);
        if state.addin.is_some() {
            state.addin = Some(connect);
        }
        Ok(())
    }

    fn active_workbook_name(&mut self) -> HostResult<String> {
        Ok(self.state.lock().unwrap().active_workbook.clone())
    }

    fn activate_window(&mut self, name: &str) -> HostResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("ActivateWindow({name})"));
        state.active_workbook = name.to_string();
        Ok(())
    }

    fn named_range_sheet(&mut self, name: &str) -> HostResult<String> {
        self.record(format!("NamedRangeSheet({name})"));
        Ok("Report".to_string())
    }

    fn calculate(&mut self) -> HostResult<()> {
        self.record("Calculate".to_string());
        Ok(())
    }

    fn save_workbook(&mut self, workbook: WorkbookId) -> HostResult<()> {
        self.record(format!("SaveWorkbook({workbook})"));
        Ok(())
    }

    fn close_workbook(&mut self, workbook: WorkbookId) -> HostResult<()> {
        self.record(format!("CloseWorkbook({workbook})"));
        Ok(())
    }

    fn quit(&mut self) -> HostResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("Quit".to_string());
        state.quits += 1;
        Ok(())
    }
}

pub struct FakeLauncher {
    state: Arc<Mutex<FakeState>>,
}

impl HostLauncher for FakeLauncher {
    fn launch(&self) -> HostResult<Box<dyn ExcelHost>> {
        let mut state = self.state.lock().unwrap();
        if state.launch_fails {
            return Err(HostError::new("Excel.Application is not registered"));
        }
        state.launches += 1;
        Ok(Box::new(FakeExcel {
            state: Arc::clone(&self.state),
        }))
    }
}

pub struct FakeKiller {
    state: Arc<Mutex<FakeState>>,
}

impl ProcessKiller for FakeKiller {
    fn kill_stray_processes(&self) -> usize {
        self.state.lock().unwrap().kills += 1;
        0
    }
}

pub type Sent = Arc<Mutex<Vec<(Status, String, String)>>>;

pub struct RecordingNotifier {
    sent: Sent,
}

impl Notify for RecordingNotifier {
    fn notify(&self, status: Status, process: &str, message: &str) -> sap_refresh::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((status, process.to_string(), message.to_string()));
        Ok(())
    }
}

/// A context wired to the fakes, a live TCP listener and temp folders.
pub struct Harness {
    pub state: Arc<Mutex<FakeState>>,
    pub sent: Sent,
    pub ctx: Context,
    pub dir: TempDir,
    _listener: TcpListener,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(Vec::new(), Vec::new())
    }

    pub fn with_config(reports: Vec<ReportSchedule>, restrictions: Vec<RestrictionRow>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let data_directory = dir.path().join("reports");
        let info_directory = dir.path().join("info");
        std::fs::create_dir_all(&data_directory).unwrap();
        std::fs::create_dir_all(&info_directory).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let codec = SecretCodec::from_base64_key(&SecretCodec::generate_key()).unwrap();
        let settings = Settings {
            ping_host: "127.0.0.1".to_string(),
            ping_port: listener.local_addr().unwrap().port(),
            logon_client: "100".to_string(),
            logon_user: "RFC_USER".to_string(),
            logon_password: codec.encode(PASSWORD).unwrap(),
            data_directory,
            info_directory,
            mail: None,
        };
        let config = AppConfig {
            settings,
            reports,
            restrictions,
        };

        let state = Arc::new(Mutex::new(FakeState::default()));
        let sent: Sent = Arc::default();
        let ctx = Context::new(
            config,
            codec,
            Box::new(FakeLauncher {
                state: Arc::clone(&state),
            }),
            Box::new(FakeKiller {
                state: Arc::clone(&state),
            }),
            Box::new(RecordingNotifier {
                sent: Arc::clone(&sent),
            }),
        )
        .with_retries(RetryPolicies::immediate());

        Self {
            state,
            sent,
            ctx,
            dir,
            _listener: listener,
        }
    }

    /// Create an (empty) report file in the data directory.
    pub fn report(&self, filename: &str) -> PathBuf {
        let path = self.ctx.report_path(filename);
        std::fs::write(&path, b"").unwrap();
        path
    }

    pub fn respond(&self, key: &str, result: HostResult<Value>) {
        self.state
            .lock()
            .unwrap()
            .responses
            .entry(key.to_string())
            .or_default()
            .push_back(result);
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Calls whose text starts with `prefix`.
    pub fn calls_to(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    pub fn with_state<T>(&self, f: impl FnOnce(&mut FakeState) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }
}

pub fn schedule(filename: &str, refresh: u32) -> ReportSchedule {
    ReportSchedule {
        filename: filename.to_string(),
        data_source: "DS_1".to_string(),
        refresh: Some(refresh),
    }
}
