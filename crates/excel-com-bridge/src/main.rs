//! Excel COM Bridge: a Windows process that automates Excel via COM,
//! controlled by JSON commands over stdin/stdout.
//!
//! Runs natively on Windows or cross-compiled from Linux and run under WINE.
//!
//! Protocol: one JSON object per line (newline-delimited JSON).
//! - Reads `Request` objects from stdin
//! - Writes `Response` objects to stdout
//! - Diagnostic/log messages go to stderr (never stdout)

#[cfg(windows)]
mod dispatch;
#[cfg(windows)]
mod excel;

#[cfg(not(windows))]
fn main() {
    eprintln!("excel-com-bridge must be compiled for Windows (--target x86_64-pc-windows-gnu)");
    eprintln!("and run on Windows or under WINE.");
    std::process::exit(1);
}

#[cfg(windows)]
fn main() {
    use std::io::{self, BufRead, Write};

    use excel_com_protocol::*;

    eprintln!("[excel-com-bridge] Starting up...");

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    let mut excel: Option<excel::ExcelApp> = None;

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                eprintln!("[excel-com-bridge] stdin read error: {e}");
                break;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let request: Request = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => {
                eprintln!("[excel-com-bridge] JSON parse error: {e}");
                let resp = Response {
                    id: 0,
                    result: ResponseResult::Error {
                        message: format!("JSON parse error: {e}"),
                        hresult: None,
                    },
                };
                write_response(&mut out, &resp);
                continue;
            }
        };

        let response = handle_command(&mut excel, &request);
        write_response(&mut out, &response);

        if matches!(request.command, Command::Shutdown)
            && matches!(response.result, ResponseResult::Ok { .. })
        {
            eprintln!("[excel-com-bridge] Shutdown complete, exiting.");
            break;
        }
    }

    // If Excel is still running when stdin closes, try to clean up
    if let Some(app) = excel {
        eprintln!("[excel-com-bridge] stdin closed, shutting down Excel...");
        let _ = app.shutdown();
    }

    eprintln!("[excel-com-bridge] Process exiting.");
}

#[cfg(windows)]
fn write_response(out: &mut impl std::io::Write, response: &excel_com_protocol::Response) {
    match serde_json::to_string(response) {
        Ok(json) => {
            let _ = writeln!(out, "{json}");
            let _ = out.flush();
        }
        Err(e) => eprintln!("[excel-com-bridge] failed to encode response: {e}"),
    }
}

#[cfg(windows)]
fn handle_command(
    excel: &mut Option<excel::ExcelApp>,
    request: &excel_com_protocol::Request,
) -> excel_com_protocol::Response {
    use excel_com_protocol::*;

    let id = request.id;

    let result = match &request.command {
        Command::Init => init_com_and_excel(excel),
        Command::OpenWorkbook {
            path,
            update_links,
            read_only,
        } => with_excel(excel, |app| {
            let workbook = app.open_workbook(path, *update_links, *read_only)?;
            Ok(Some(ResponseData::WorkbookHandle { workbook }))
        }),
        Command::Run { name, args } => with_excel(excel, |app| {
            let value = app.run(name, args)?;
            Ok(Some(ResponseData::Value { value }))
        }),
        Command::GetProperty { name } => with_excel(excel, |app| {
            let value = app.get_property(name)?;
            Ok(Some(ResponseData::Value { value }))
        }),
        Command::SetProperty { name, value } => with_excel(excel, |app| {
            app.set_property(name, value)?;
            Ok(None)
        }),
        Command::GetAddInConnected { prog_id } => with_excel(excel, |app| {
            let value = match app.addin_connected(prog_id)? {
                Some(connected) => Value::Bool(connected),
                None => Value::Null,
            };
            Ok(Some(ResponseData::Value { value }))
        }),
        Command::SetAddInConnected { prog_id, connect } => with_excel(excel, |app| {
            app.set_addin_connected(prog_id, *connect)?;
            Ok(None)
        }),
        Command::ActiveWorkbookName => with_excel(excel, |app| {
            let name = app.active_workbook_name()?;
            Ok(Some(ResponseData::Value { value: Value::String(name) }))
        }),
        Command::ActivateWindow { name } => with_excel(excel, |app| {
            app.activate_window(name)?;
            Ok(None)
        }),
        Command::NamedRangeSheet { name } => with_excel(excel, |app| {
            let sheet = app.named_range_sheet(name)?;
            Ok(Some(ResponseData::Value { value: Value::String(sheet) }))
        }),
        Command::Calculate => with_excel(excel, |app| {
            app.calculate()?;
            Ok(None)
        }),
        Command::SaveWorkbook { workbook } => with_excel(excel, |app| {
            app.save_workbook(*workbook)?;
            Ok(None)
        }),
        Command::CloseWorkbook { workbook } => with_excel(excel, |app| {
            app.close_workbook(*workbook)?;
            Ok(None)
        }),
        Command::Shutdown => match excel.take() {
            Some(app) => match app.shutdown() {
                Ok(()) => {
                    uninit_com();
                    ResponseResult::Ok { data: None }
                }
                Err(e) => ResponseResult::Error {
                    message: format!("Shutdown failed: {}", e.message),
                    hresult: e.hresult,
                },
            },
            None => ResponseResult::Ok { data: None },
        },
    };

    Response { id, result }
}

#[cfg(windows)]
fn init_com_and_excel(excel: &mut Option<excel::ExcelApp>) -> excel_com_protocol::ResponseResult {
    use excel_com_protocol::ResponseResult;
    use windows::Win32::System::Com::{CoInitializeEx, COINIT_APARTMENTTHREADED};

    if excel.is_some() {
        return ResponseResult::Ok { data: None };
    }

    // Excel requires a single-threaded apartment
    unsafe {
        let hr = CoInitializeEx(None, COINIT_APARTMENTTHREADED);
        if let Err(e) = hr.ok() {
            return ResponseResult::Error {
                message: format!("CoInitializeEx failed: {e}"),
                hresult: Some(e.code().0),
            };
        }
    }

    eprintln!("[excel-com-bridge] COM initialized (STA)");

    match excel::ExcelApp::new() {
        Ok(app) => {
            eprintln!("[excel-com-bridge] Excel.Application created successfully");
            *excel = Some(app);
            ResponseResult::Ok { data: None }
        }
        Err(e) => ResponseResult::Error {
            message: format!("Failed to create Excel.Application: {}", e.message),
            hresult: e.hresult,
        },
    }
}

#[cfg(windows)]
fn uninit_com() {
    unsafe {
        windows::Win32::System::Com::CoUninitialize();
    }
    eprintln!("[excel-com-bridge] COM uninitialized");
}

#[cfg(windows)]
fn with_excel(
    excel: &mut Option<excel::ExcelApp>,
    f: impl FnOnce(
        &mut excel::ExcelApp,
    ) -> dispatch::ComResult<Option<excel_com_protocol::ResponseData>>,
) -> excel_com_protocol::ResponseResult {
    use excel_com_protocol::ResponseResult;

    match excel.as_mut() {
        Some(app) => match f(app) {
            Ok(data) => ResponseResult::Ok { data },
            Err(e) => ResponseResult::Error {
                message: e.message,
                hresult: e.hresult,
            },
        },
        None => ResponseResult::Error {
            message: "Excel not initialized. Send 'Init' command first.".to_string(),
            hresult: None,
        },
    }
}
