//! Safe wrapper around IDispatch for late-bound COM automation.
//!
//! Excel's object model and the SAP Analysis for Office macros are reached
//! through IDispatch (like VBScript late-binding). Failures keep the HRESULT
//! so the client can tell vendor error codes apart.

#![cfg(windows)]

use std::ffi::c_void;
use std::mem::ManuallyDrop;
use std::ptr;

use windows::{
    core::{BSTR, GUID, HSTRING, PCWSTR},
    Win32::{
        Foundation::{DISP_E_EXCEPTION, VARIANT_BOOL},
        Globalization::GetSystemDefaultLCID,
        System::{
            Com::{
                CLSIDFromProgID, CoCreateInstance, IDispatch, CLSCTX_LOCAL_SERVER, DISPATCH_METHOD,
                DISPATCH_PROPERTYGET, DISPATCH_PROPERTYPUT, DISPPARAMS, EXCEPINFO, SAFEARRAY,
            },
            Ole::{
                SafeArrayGetDim, SafeArrayGetElement, SafeArrayGetLBound, SafeArrayGetUBound,
                DISPID_PROPERTYPUT,
            },
            Variant::{
                VARIANT, VT_ARRAY, VT_BOOL, VT_BSTR, VT_DISPATCH, VT_EMPTY, VT_ERROR, VT_I2,
                VT_I4, VT_NULL, VT_R4, VT_R8, VT_VARIANT,
            },
        },
    },
};

/// A failed COM call.
#[derive(Debug, Clone)]
pub struct ComError {
    /// HRESULT of the failing call, absent for bridge-side failures.
    pub hresult: Option<i32>,
    pub message: String,
}

impl ComError {
    pub fn bridge(message: impl Into<String>) -> Self {
        Self {
            hresult: None,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ComError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.hresult {
            Some(code) => write!(f, "{} (hresult {code})", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

pub type ComResult<T> = Result<T, ComError>;

// -- VARIANT construction helpers --
// The VARIANT struct wraps inner unions in ManuallyDrop, so we use ptr::write
// to set fields without triggering the DerefMut lint.

pub fn variant_empty() -> VARIANT {
    VARIANT::default()
}

pub fn variant_bool(val: bool) -> VARIANT {
    unsafe {
        let mut v = VARIANT::default();
        let inner = &mut *v.Anonymous.Anonymous;
        ptr::write(&mut inner.vt, VT_BOOL);
        ptr::write(
            &mut inner.Anonymous.boolVal,
            VARIANT_BOOL(if val { -1 } else { 0 }),
        );
        v
    }
}

pub fn variant_f64(val: f64) -> VARIANT {
    unsafe {
        let mut v = VARIANT::default();
        let inner = &mut *v.Anonymous.Anonymous;
        ptr::write(&mut inner.vt, VT_R8);
        ptr::write(&mut inner.Anonymous.dblVal, val);
        v
    }
}

pub fn variant_i32(val: i32) -> VARIANT {
    unsafe {
        let mut v = VARIANT::default();
        let inner = &mut *v.Anonymous.Anonymous;
        ptr::write(&mut inner.vt, VT_I4);
        ptr::write(&mut inner.Anonymous.lVal, val);
        v
    }
}

pub fn variant_str(val: &str) -> VARIANT {
    unsafe {
        let bstr = BSTR::from(val);
        let mut v = VARIANT::default();
        let inner = &mut *v.Anonymous.Anonymous;
        ptr::write(&mut inner.vt, VT_BSTR);
        ptr::write(&mut inner.Anonymous.bstrVal, ManuallyDrop::new(bstr));
        v
    }
}

pub fn variant_vt(v: &VARIANT) -> u16 {
    unsafe { v.Anonymous.Anonymous.vt.0 }
}

pub fn variant_get_bool(v: &VARIANT) -> Option<bool> {
    unsafe {
        if v.Anonymous.Anonymous.vt == VT_BOOL {
            Some(v.Anonymous.Anonymous.Anonymous.boolVal.0 != 0)
        } else {
            None
        }
    }
}

pub fn variant_get_f64(v: &VARIANT) -> Option<f64> {
    unsafe {
        let vt = v.Anonymous.Anonymous.vt;
        let anon = &v.Anonymous.Anonymous.Anonymous;
        if vt == VT_R8 {
            Some(anon.dblVal)
        } else if vt == VT_R4 {
            Some(anon.fltVal as f64)
        } else if vt == VT_I4 {
            Some(anon.lVal as f64)
        } else if vt == VT_I2 {
            Some(anon.iVal as f64)
        } else {
            None
        }
    }
}

pub fn variant_get_string(v: &VARIANT) -> Option<String> {
    unsafe {
        if v.Anonymous.Anonymous.vt == VT_BSTR {
            let bstr = &v.Anonymous.Anonymous.Anonymous.bstrVal;
            Some(bstr.to_string())
        } else {
            None
        }
    }
}

pub fn variant_get_error(v: &VARIANT) -> Option<i32> {
    unsafe {
        if v.Anonymous.Anonymous.vt == VT_ERROR {
            Some(v.Anonymous.Anonymous.Anonymous.scode)
        } else {
            None
        }
    }
}

pub fn variant_get_dispatch(v: &VARIANT) -> Option<IDispatch> {
    unsafe {
        if v.Anonymous.Anonymous.vt == VT_DISPATCH {
            let opt_disp: &Option<IDispatch> = &v.Anonymous.Anonymous.Anonymous.pdispVal;
            opt_disp.clone()
        } else {
            None
        }
    }
}

pub fn variant_is_empty(v: &VARIANT) -> bool {
    unsafe {
        let vt = v.Anonymous.Anonymous.vt;
        vt == VT_EMPTY || vt == VT_NULL
    }
}

/// Contents of a `VT_ARRAY | VT_VARIANT` SAFEARRAY.
pub enum SafeArrayContents {
    Flat(Vec<VARIANT>),
    /// Two-dimensional array, first dimension = rows.
    Rows(Vec<Vec<VARIANT>>),
}

/// Unpack a SAFEARRAY of VARIANTs. Returns `None` for anything that is not
/// a one- or two-dimensional VARIANT array.
pub fn variant_get_array(v: &VARIANT) -> Option<SafeArrayContents> {
    unsafe {
        let vt = v.Anonymous.Anonymous.vt;
        if vt.0 != (VT_ARRAY.0 | VT_VARIANT.0) {
            return None;
        }
        let psa: *mut SAFEARRAY = v.Anonymous.Anonymous.Anonymous.parray;
        if psa.is_null() {
            return Some(SafeArrayContents::Flat(Vec::new()));
        }
        match SafeArrayGetDim(psa) {
            1 => {
                let (lo, hi) = bounds(psa, 1)?;
                let mut items = Vec::new();
                for i in lo..=hi {
                    items.push(element(psa, &[i])?);
                }
                Some(SafeArrayContents::Flat(items))
            }
            2 => {
                let (row_lo, row_hi) = bounds(psa, 1)?;
                let (col_lo, col_hi) = bounds(psa, 2)?;
                let mut rows = Vec::new();
                for r in row_lo..=row_hi {
                    let mut row = Vec::new();
                    for c in col_lo..=col_hi {
                        row.push(element(psa, &[r, c])?);
                    }
                    rows.push(row);
                }
                Some(SafeArrayContents::Rows(rows))
            }
            _ => None,
        }
    }
}

unsafe fn bounds(psa: *mut SAFEARRAY, dim: u32) -> Option<(i32, i32)> {
    let lo = SafeArrayGetLBound(psa, dim).ok()?;
    let hi = SafeArrayGetUBound(psa, dim).ok()?;
    Some((lo, hi))
}

unsafe fn element(psa: *mut SAFEARRAY, indices: &[i32]) -> Option<VARIANT> {
    let mut out = VARIANT::default();
    SafeArrayGetElement(psa, indices.as_ptr(), &mut out as *mut VARIANT as *mut c_void).ok()?;
    Some(out)
}

// -- DispatchObject --

/// A wrapper around an IDispatch COM object providing ergonomic access.
#[derive(Clone)]
pub struct DispatchObject {
    inner: IDispatch,
}

impl DispatchObject {
    /// Create a COM object from a ProgID string (e.g., "Excel.Application").
    pub fn create_from_progid(progid: &str) -> ComResult<Self> {
        unsafe {
            let hstr = HSTRING::from(progid);
            let clsid = CLSIDFromProgID(&hstr).map_err(|e| com_error(&e, "CLSIDFromProgID"))?;
            let disp: IDispatch = CoCreateInstance(&clsid, None, CLSCTX_LOCAL_SERVER)
                .map_err(|e| com_error(&e, &format!("CoCreateInstance('{progid}')")))?;
            Ok(Self { inner: disp })
        }
    }

    pub fn from_idispatch(disp: IDispatch) -> Self {
        Self { inner: disp }
    }

    fn get_dispid(&self, name: &str) -> ComResult<i32> {
        unsafe {
            let wide: Vec<u16> = name.encode_utf16().chain(std::iter::once(0)).collect();
            let pcwstr = PCWSTR(wide.as_ptr());
            let names = [pcwstr];
            let mut dispid = 0i32;
            self.inner
                .GetIDsOfNames(
                    &GUID::zeroed(),
                    names.as_ptr(),
                    1,
                    GetSystemDefaultLCID(),
                    &mut dispid,
                )
                .map_err(|e| com_error(&e, &format!("GetIDsOfNames('{name}')")))?;
            Ok(dispid)
        }
    }

    /// Get a property value. Equivalent to VB's `obj.PropertyName`.
    pub fn get_property(&self, name: &str) -> ComResult<VARIANT> {
        self.invoke(name, DISPATCH_PROPERTYGET, &[])
    }

    /// Set a property value. Equivalent to VB's `obj.PropertyName = value`.
    pub fn set_property(&self, name: &str, value: VARIANT) -> ComResult<()> {
        let dispid = self.get_dispid(name)?;
        unsafe {
            let mut args = [value];
            let mut named_args = [DISPID_PROPERTYPUT];
            let params = DISPPARAMS {
                rgvarg: args.as_mut_ptr(),
                rgdispidNamedArgs: named_args.as_mut_ptr(),
                cArgs: 1,
                cNamedArgs: 1,
            };
            let mut except = EXCEPINFO::default();
            self.inner
                .Invoke(
                    dispid,
                    &GUID::zeroed(),
                    GetSystemDefaultLCID(),
                    DISPATCH_PROPERTYPUT,
                    &params,
                    None,
                    Some(&mut except),
                    None,
                )
                .map_err(|e| invoke_error(e, &except, name))?;
            Ok(())
        }
    }

    /// Invoke a method with arguments in natural order.
    pub fn invoke_method(&self, name: &str, args: &[VARIANT]) -> ComResult<VARIANT> {
        self.invoke(name, DISPATCH_METHOD, args)
    }

    /// Get a child object (property that returns an IDispatch).
    pub fn get_child(&self, name: &str) -> ComResult<DispatchObject> {
        let variant = self.get_property(name)?;
        extract_dispatch(&variant, name)
    }

    /// Invoke a method and extract the returned IDispatch object.
    pub fn invoke_child(&self, name: &str, args: &[VARIANT]) -> ComResult<DispatchObject> {
        let variant = self.invoke_method(name, args)?;
        extract_dispatch(&variant, name)
    }

    /// Get an indexed property (e.g. `COMAddIns("SapExcelAddIn")`, `Windows("a.xlsx")`).
    pub fn get_indexed(&self, name: &str, index: &VARIANT) -> ComResult<DispatchObject> {
        let variant = self.invoke(name, DISPATCH_PROPERTYGET, std::slice::from_ref(index))?;
        extract_dispatch(&variant, name)
    }

    fn invoke(
        &self,
        name: &str,
        flags: windows::Win32::System::Com::DISPATCH_FLAGS,
        args: &[VARIANT],
    ) -> ComResult<VARIANT> {
        let dispid = self.get_dispid(name)?;
        unsafe {
            // DISPPARAMS requires arguments in reverse order
            let mut reversed: Vec<VARIANT> = args.iter().rev().cloned().collect();
            let params = DISPPARAMS {
                rgvarg: if reversed.is_empty() {
                    std::ptr::null_mut()
                } else {
                    reversed.as_mut_ptr()
                },
                rgdispidNamedArgs: std::ptr::null_mut(),
                cArgs: reversed.len() as u32,
                cNamedArgs: 0,
            };
            let mut result = VARIANT::default();
            let mut except = EXCEPINFO::default();
            self.inner
                .Invoke(
                    dispid,
                    &GUID::zeroed(),
                    GetSystemDefaultLCID(),
                    flags,
                    &params,
                    Some(&mut result),
                    Some(&mut except),
                    None,
                )
                .map_err(|e| invoke_error(e, &except, name))?;
            Ok(result)
        }
    }
}

fn extract_dispatch(variant: &VARIANT, context: &str) -> ComResult<DispatchObject> {
    if let Some(disp) = variant_get_dispatch(variant) {
        Ok(DispatchObject::from_idispatch(disp))
    } else if variant_is_empty(variant) {
        Err(ComError::bridge(format!("'{context}' returned empty/null")))
    } else {
        let vt = variant_vt(variant);
        Err(ComError::bridge(format!(
            "'{context}' returned non-object VARIANT (VT={vt}), expected VT_DISPATCH"
        )))
    }
}

fn com_error(err: &windows::core::Error, what: &str) -> ComError {
    ComError {
        hresult: Some(err.code().0),
        message: format!("{what} failed: {err}"),
    }
}

/// Build the error for a failed Invoke, including EXCEPINFO details if available.
fn invoke_error(err: windows::core::Error, except: &EXCEPINFO, member_name: &str) -> ComError {
    let code = err.code().0;
    let message = if code == DISP_E_EXCEPTION.0 {
        let desc = if !except.bstrDescription.is_empty() {
            except.bstrDescription.to_string()
        } else {
            String::from("(no description)")
        };
        let source = if !except.bstrSource.is_empty() {
            except.bstrSource.to_string()
        } else {
            String::from("(no source)")
        };
        format!("COM exception in '{member_name}': {desc} (source: {source})")
    } else {
        format!("Invoke('{member_name}') failed: {err}")
    };
    ComError {
        hresult: Some(code),
        message,
    }
}
