//! Excel-specific COM automation layer built on top of the generic IDispatch wrapper.

#![cfg(windows)]

use std::collections::HashMap;

use windows::Win32::System::Variant::VARIANT;

use excel_com_protocol::{Value, ValueError};

use crate::dispatch::{
    variant_bool, variant_empty, variant_f64, variant_get_array, variant_get_bool,
    variant_get_error, variant_get_f64, variant_get_string, variant_is_empty, variant_str,
    ComError, ComResult, DispatchObject, SafeArrayContents,
};

/// Manages an Excel.Application COM instance and the workbooks it opened.
pub struct ExcelApp {
    app: DispatchObject,
    workbooks_collection: DispatchObject,
    /// Map from our handle IDs to workbook dispatch objects.
    workbooks: HashMap<u64, DispatchObject>,
    next_handle: u64,
}

impl ExcelApp {
    /// Create a new Excel.Application instance via COM.
    ///
    /// Visibility and alert settings are left to the client, which toggles
    /// them around its own automation steps.
    pub fn new() -> ComResult<Self> {
        let app = DispatchObject::create_from_progid("Excel.Application")?;
        let workbooks_collection = app.get_child("Workbooks")?;

        Ok(Self {
            app,
            workbooks_collection,
            workbooks: HashMap::new(),
            next_handle: 1,
        })
    }

    /// `Workbooks.Open(path, UpdateLinks, ReadOnly)`. Returns the handle ID.
    pub fn open_workbook(&mut self, path: &str, update_links: bool, read_only: bool) -> ComResult<u64> {
        let wb = self.workbooks_collection.invoke_child(
            "Open",
            &[
                variant_str(path),
                variant_bool(update_links),
                variant_bool(read_only),
            ],
        )?;
        let handle = self.next_handle;
        self.next_handle += 1;
        self.workbooks.insert(handle, wb);
        Ok(handle)
    }

    /// `Application.Run(name, args...)`.
    pub fn run(&self, name: &str, args: &[Value]) -> ComResult<Value> {
        let mut variants = vec![variant_str(name)];
        variants.extend(args.iter().map(value_to_variant));
        let result = self.app.invoke_method("Run", &variants)?;
        Ok(variant_to_value(&result))
    }

    pub fn get_property(&self, name: &str) -> ComResult<Value> {
        let variant = self.app.get_property(name)?;
        Ok(variant_to_value(&variant))
    }

    pub fn set_property(&self, name: &str, value: &Value) -> ComResult<()> {
        self.app.set_property(name, value_to_variant(value))
    }

    /// `COMAddIns(prog_id).Connect`, or `None` if the add-in is not registered.
    pub fn addin_connected(&self, prog_id: &str) -> ComResult<Option<bool>> {
        let addins = self.app.get_child("COMAddIns")?;
        let addin = match addins.get_indexed("Item", &variant_str(prog_id)) {
            Ok(addin) => addin,
            Err(e) => {
                eprintln!("[excel-com-bridge] add-in '{prog_id}' not found: {e}");
                return Ok(None);
            }
        };
        let connected = addin.get_property("Connect")?;
        Ok(variant_get_bool(&connected))
    }

    pub fn set_addin_connected(&self, prog_id: &str, connect: bool) -> ComResult<()> {
        let addins = self.app.get_child("COMAddIns")?;
        let addin = addins.get_indexed("Item", &variant_str(prog_id))?;
        addin.set_property("Connect", variant_bool(connect))
    }

    pub fn active_workbook_name(&self) -> ComResult<String> {
        let wb = self.app.get_child("ActiveWorkbook")?;
        let name = wb.get_property("Name")?;
        variant_get_string(&name)
            .ok_or_else(|| ComError::bridge("ActiveWorkbook.Name is not a string"))
    }

    pub fn activate_window(&self, name: &str) -> ComResult<()> {
        let window = self.app.get_indexed("Windows", &variant_str(name))?;
        window.invoke_method("Activate", &[])?;
        Ok(())
    }

    /// Name of the sheet a workbook-level name refers to.
    pub fn named_range_sheet(&self, name: &str) -> ComResult<String> {
        let wb = self.app.get_child("ActiveWorkbook")?;
        let named = wb.get_indexed("Names", &variant_str(name))?;
        let range = named.get_child("RefersToRange")?;
        let sheet = range.get_child("Parent")?;
        let sheet_name = sheet.get_property("Name")?;
        variant_get_string(&sheet_name)
            .ok_or_else(|| ComError::bridge(format!("sheet name for '{name}' is not a string")))
    }

    pub fn calculate(&self) -> ComResult<()> {
        self.app.invoke_method("Calculate", &[])?;
        Ok(())
    }

    pub fn save_workbook(&self, wb_handle: u64) -> ComResult<()> {
        let wb = self.workbook(wb_handle)?;
        wb.invoke_method("Save", &[])?;
        Ok(())
    }

    pub fn close_workbook(&mut self, wb_handle: u64) -> ComResult<()> {
        let wb = self
            .workbooks
            .remove(&wb_handle)
            .ok_or_else(|| ComError::bridge(format!("Unknown workbook handle: {wb_handle}")))?;
        wb.invoke_method("Close", &[variant_bool(false)])?;
        Ok(())
    }

    /// Shut down: close all workbooks and quit Excel.
    pub fn shutdown(mut self) -> ComResult<()> {
        let handles: Vec<u64> = self.workbooks.keys().copied().collect();
        for h in handles {
            let _ = self.close_workbook(h);
        }
        self.app.invoke_method("Quit", &[])?;
        Ok(())
    }

    fn workbook(&self, wb_handle: u64) -> ComResult<&DispatchObject> {
        self.workbooks
            .get(&wb_handle)
            .ok_or_else(|| ComError::bridge(format!("Unknown workbook handle: {wb_handle}")))
    }
}

/// Convert a protocol value to a COM VARIANT.
fn value_to_variant(value: &Value) -> VARIANT {
    match value {
        Value::Null => variant_empty(),
        Value::Bool(b) => variant_bool(*b),
        Value::Number(n) => variant_f64(*n),
        Value::String(s) => variant_str(s),
        // The add-in API takes scalar arguments only
        Value::Error(_) | Value::Array(_) => variant_empty(),
    }
}

/// Convert a COM VARIANT to a protocol value.
fn variant_to_value(variant: &VARIANT) -> Value {
    if variant_is_empty(variant) {
        Value::Null
    } else if let Some(b) = variant_get_bool(variant) {
        Value::Bool(b)
    } else if let Some(n) = variant_get_f64(variant) {
        Value::Number(n)
    } else if let Some(s) = variant_get_string(variant) {
        Value::String(s)
    } else if let Some(code) = variant_get_error(variant) {
        Value::Error(ValueError { code })
    } else if let Some(array) = variant_get_array(variant) {
        match array {
            SafeArrayContents::Flat(items) => {
                Value::Array(items.iter().map(variant_to_value).collect())
            }
            SafeArrayContents::Rows(rows) => Value::Array(
                rows.iter()
                    .map(|row| Value::Array(row.iter().map(variant_to_value).collect()))
                    .collect(),
            ),
        }
    } else {
        Value::Null
    }
}
