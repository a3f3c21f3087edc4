//! Shared protocol types for communication between the native client and the
//! Windows COM bridge process that drives `Excel.Application`.
//!
//! The protocol is JSON-over-stdio: one JSON object per line in each direction.
//! The command set mirrors the slice of the Excel object model that SAP
//! Analysis for Office automation needs: workbooks, application properties,
//! COM add-ins, windows, workbook names and the `Application.Run` macro
//! dispatcher the add-in exposes its API through.

use serde::{Deserialize, Serialize};

/// A command sent from the client to the bridge process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Monotonically increasing request ID for correlating responses.
    pub id: u64,
    /// The command to execute.
    #[serde(flatten)]
    pub command: Command,
}

/// Commands the client can send to the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", content = "params")]
pub enum Command {
    /// Initialize COM and create the Excel.Application instance.
    Init,

    /// `Workbooks.Open(path, UpdateLinks, ReadOnly)`. Returns a workbook handle.
    OpenWorkbook {
        path: String,
        update_links: bool,
        read_only: bool,
    },

    /// `Application.Run(macro, args...)`. Returns whatever the macro returns.
    Run { name: String, args: Vec<Value> },

    /// Read an `Application` property (e.g. `Calculation`).
    GetProperty { name: String },

    /// Write an `Application` property (e.g. `ScreenUpdating`).
    SetProperty { name: String, value: Value },

    /// `Application.COMAddIns(prog_id).Connect`. Returns `Null` when the
    /// add-in is not registered.
    GetAddInConnected { prog_id: String },

    /// `Application.COMAddIns(prog_id).Connect = connect`.
    SetAddInConnected { prog_id: String, connect: bool },

    /// `Application.ActiveWorkbook.Name`.
    ActiveWorkbookName,

    /// `Application.Windows(name).Activate()`.
    ActivateWindow { name: String },

    /// `ActiveWorkbook.Names(name).RefersToRange.Parent.Name`.
    NamedRangeSheet { name: String },

    /// `Application.Calculate()`.
    Calculate,

    /// `Workbook.Save()` in place.
    SaveWorkbook { workbook: u64 },

    /// `Workbook.Close()`. Unsaved changes are discarded.
    CloseWorkbook { workbook: u64 },

    /// Shut down the bridge: close remaining workbooks, quit Excel, uninitialize COM.
    Shutdown,
}

/// A value crossing the bridge, modelled after the COM `VARIANT` subset
/// Excel and the add-in produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Error(ValueError),
    /// A `SAFEARRAY`; two-dimensional arrays arrive as an array of rows.
    Array(Vec<Value>),
}

/// A `VT_ERROR` value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueError {
    pub code: i32,
}

/// A response sent from the bridge back to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// The request ID this response corresponds to.
    pub id: u64,
    /// The result of the command.
    #[serde(flatten)]
    pub result: ResponseResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum ResponseResult {
    #[serde(rename = "ok")]
    Ok {
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<ResponseData>,
    },
    #[serde(rename = "error")]
    Error {
        message: String,
        /// The failing call's HRESULT, when the failure came from COM.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hresult: Option<i32>,
    },
}

/// Data returned in successful responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseData {
    /// Handle to a newly opened workbook.
    WorkbookHandle { workbook: u64 },
    /// A returned value.
    Value { value: Value },
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => Some(*n != 0.0),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Render the value the way Excel would show it in a cell.
    pub fn to_text(&self) -> String {
        match self {
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "<empty>"),
            Value::Bool(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "{s}"),
            Value::Error(e) => write!(f, "#ERR({})", e.code),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_shape() {
        let request = Request {
            id: 7,
            command: Command::Run {
                name: "SAPExecuteCommand".to_string(),
                args: vec!["RefreshData".into(), "DS_1".into()],
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "id": 7,
                "cmd": "Run",
                "params": { "name": "SAPExecuteCommand", "args": ["RefreshData", "DS_1"] }
            })
        );
    }

    #[test]
    fn test_unit_command_has_no_params() {
        let json = serde_json::to_string(&Request { id: 1, command: Command::Init }).unwrap();
        assert_eq!(json, r#"{"id":1,"cmd":"Init"}"#);
    }

    #[test]
    fn test_error_response_carries_hresult() {
        let line = r#"{"id":3,"status":"error","message":"COM exception in 'Run'","hresult":-2147352567}"#;
        let response: Response = serde_json::from_str(line).unwrap();
        assert_eq!(
            response.result,
            ResponseResult::Error {
                message: "COM exception in 'Run'".to_string(),
                hresult: Some(-2147352567),
            }
        );
    }

    #[test]
    fn test_nested_array_value() {
        let line = r#"{"id":4,"status":"ok","data":{"value":[["0CALMONTH","10.2026"],["0COMP_CODE","1000"]]}}"#;
        let response: Response = serde_json::from_str(line).unwrap();
        let ResponseResult::Ok { data: Some(ResponseData::Value { value }) } = response.result else {
            panic!("expected value payload");
        };
        let rows = value.as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].as_array().unwrap()[1], Value::String("10.2026".into()));
    }

    #[test]
    fn test_display_integral_numbers() {
        assert_eq!(Value::Number(1.0).to_string(), "1");
        assert_eq!(Value::Number(2.5).to_string(), "2.5");
        assert_eq!(Value::Null.to_text(), "");
    }
}
