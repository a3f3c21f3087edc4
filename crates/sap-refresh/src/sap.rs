//! Analysis for Office macros called through `Application.Run`.
//!
//! Commands that change state return `1` on success; anything else is turned
//! into the error naming what the command was meant to do.

use crate::descriptor::table_rows;
use crate::error::{RefreshError, Result};
use crate::host::{ExcelHost, Value};
use crate::retry::RetryPolicy;
use crate::secret::SecretCodec;

/// Logon parameters; the password stays encrypted until the call.
#[derive(Debug, Clone, Copy)]
pub struct Credentials<'a> {
    pub client: &'a str,
    pub user: &'a str,
    pub password_token: &'a str,
}

fn call(app: &mut dyn ExcelHost, name: &str, args: &[Value]) -> Result<Value> {
    tracing::debug!("{name}({})", args.len());
    app.run(name, args).map_err(RefreshError::automation(name))
}

fn succeeded(status: &Value) -> bool {
    status.as_f64() == Some(1.0)
}

fn on_off(on: bool) -> Value {
    Value::from(if on { "On" } else { "Off" })
}

/// Pairs of the first two columns of a listing.
fn pairs(value: &Value) -> Vec<(String, String)> {
    table_rows(value)
        .into_iter()
        .map(|row| {
            let cell = |i: usize| row.get(i).map(Value::to_text).unwrap_or_default();
            (cell(0), cell(1))
        })
        .filter(|(first, _)| !first.is_empty())
        .collect()
}

pub fn logon(
    app: &mut dyn ExcelHost,
    source: &str,
    credentials: Credentials<'_>,
    codec: &SecretCodec,
    policy: &RetryPolicy,
) -> Result<()> {
    policy.run(
        &format!("logon to {source}"),
        |e| !matches!(e, RefreshError::Crypto(_)),
        |_| {
            let status = {
                let password = codec.decode(credentials.password_token)?;
                let args = [
                    Value::from(source),
                    Value::from(credentials.client),
                    Value::from(credentials.user),
                    Value::from(password.as_str()),
                ];
                call(app, "SAPLogon", &args)?
            };
            if succeeded(&status) {
                Ok(())
            } else {
                Err(RefreshError::LogonFailed(source.to_string()))
            }
        },
    )?;
    tracing::info!("Logged in to data source {source}");
    Ok(())
}

/// Refresh every data source of the workbook.
pub fn refresh(app: &mut dyn ExcelHost) -> Result<()> {
    let status = call(app, "SAPExecuteCommand", &[Value::from("Refresh")])?;
    if !succeeded(&status) {
        return Err(RefreshError::RefreshFailed);
    }
    tracing::info!("Workbook refreshed");
    Ok(())
}

/// Pull data for `source` only.
pub fn refresh_data(app: &mut dyn ExcelHost, source: &str) -> Result<()> {
    let status = call(
        app,
        "SAPExecuteCommand",
        &[Value::from("RefreshData"), Value::from(source)],
    )?;
    if !succeeded(&status) {
        return Err(RefreshError::RefreshDataFailed(source.to_string()));
    }
    tracing::info!("Data source {source} refreshed");
    Ok(())
}

/// Prompt variables of `source` as `(name, value)`.
pub fn list_variables(app: &mut dyn ExcelHost, source: &str) -> Result<Vec<(String, String)>> {
    let listing = call(
        app,
        "SAPListOfVariables",
        &[Value::from(source), Value::from("INPUT_STRING"), Value::from("PROMPTS")],
    )?;
    Ok(pairs(&listing))
}

pub fn technical_name(app: &mut dyn ExcelHost, source: &str, variable: &str) -> Result<String> {
    let name = call(
        app,
        "SAPGetVariable",
        &[Value::from(source), Value::from(variable), Value::from("TECHNICALNAME")],
    )?;
    Ok(name.to_text())
}

/// Dynamic filters of `source` as `(dimension name, value)`.
pub fn list_filters(app: &mut dyn ExcelHost, source: &str) -> Result<Vec<(String, String)>> {
    let listing = call(
        app,
        "SAPListOfDynamicFilters",
        &[Value::from(source), Value::from("INPUT_STRING")],
    )?;
    Ok(pairs(&listing))
}

/// Dimensions of `source` as `(technical name, description)`.
pub fn list_dimensions(app: &mut dyn ExcelHost, source: &str) -> Result<Vec<(String, String)>> {
    let listing = call(app, "SAPListOfDimensions", &[Value::from(source)])?;
    Ok(pairs(&listing))
}

/// `key` is one of `DataSourceName`, `QueryTechName`, `System`.
pub fn source_info(app: &mut dyn ExcelHost, source: &str, key: &str) -> Result<String> {
    let info = call(app, "SapGetSourceInfo", &[Value::from(source), Value::from(key)])?;
    Ok(info.to_text())
}

fn property(app: &mut dyn ExcelHost, name: &str, source: &str) -> Result<bool> {
    let value = call(app, "SAPGetProperty", &[Value::from(name), Value::from(source)])?;
    value.as_bool().ok_or_else(|| RefreshError::UnexpectedResult {
        call: format!("SAPGetProperty({name})"),
        detail: value.to_string(),
    })
}

pub fn is_data_source_active(app: &mut dyn ExcelHost, source: &str) -> Result<bool> {
    property(app, "IsDataSourceActive", source)
}

pub fn is_connected(app: &mut dyn ExcelHost, source: &str) -> Result<bool> {
    property(app, "IsConnected", source)
}

fn expect_success(status: Value, command: &str, field: &str) -> Result<()> {
    if succeeded(&status) {
        Ok(())
    } else {
        Err(RefreshError::RestrictionFailed {
            command: command.to_string(),
            field: field.to_string(),
        })
    }
}

/// Turn automatic refresh after each restriction change on or off.
pub fn set_refresh_behaviour(app: &mut dyn ExcelHost, on: bool) -> Result<()> {
    let status = call(app, "SAPSetRefreshBehaviour", &[on_off(on)])?;
    expect_success(status, "SAPSetRefreshBehaviour", "")
}

pub fn pause_variable_submit(app: &mut dyn ExcelHost, on: bool) -> Result<()> {
    let status = call(
        app,
        "SAPExecuteCommand",
        &[Value::from("PauseVariableSubmit"), on_off(on)],
    )?;
    expect_success(status, "PauseVariableSubmit", "")
}

pub fn set_variable(app: &mut dyn ExcelHost, source: &str, field: &str, value: &str) -> Result<()> {
    let status = call(
        app,
        "SAPSetVariable",
        &[
            Value::from(field),
            Value::from(value),
            Value::from("INPUT_STRING"),
            Value::from(source),
        ],
    )?;
    expect_success(status, "SAPSetVariable", field)?;
    tracing::info!("Variable {field} = {value} on {source}");
    Ok(())
}

pub fn set_filter(app: &mut dyn ExcelHost, source: &str, field: &str, value: &str) -> Result<()> {
    let status = call(
        app,
        "SAPSetFilter",
        &[
            Value::from(source),
            Value::from(field),
            Value::from(value),
            Value::from("INPUT_STRING"),
        ],
    )?;
    expect_success(status, "SAPSetFilter", field)?;
    tracing::info!("Filter {field} = {value} on {source}");
    Ok(())
}
