//! The `__information` workbook written by the collect use case.

use std::path::{Path, PathBuf};

use rust_xlsxwriter::{Format, Workbook, Worksheet, XlsxError};

use crate::descriptor::DataSourceDescriptor;
use crate::error::{RefreshError, Result};
use crate::restrictions::ObservedRestriction;

pub const DATA_SOURCE_SHEET: &str = "data_source_info";
pub const VARIABLES_FILTERS_SHEET: &str = "variables_filters_info";

const VARIABLES_FILTERS_HEADERS: [&str; 8] = [
    "command",
    "field",
    "field_name",
    "value",
    "data_source",
    "reference_type",
    "data_source_name",
    "data_source_sheet",
];

/// `<info dir>/<stem>__information<suffix>` for `report`.
pub fn information_path(info_dir: &Path, report: &Path) -> PathBuf {
    let stem = report
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let suffix = report
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_else(|| ".xlsx".to_string());
    info_dir.join(format!("{stem}__information{suffix}"))
}

pub fn write_information(
    path: &Path,
    descriptor: &DataSourceDescriptor,
    restrictions: &[ObservedRestriction],
) -> Result<()> {
    build(descriptor, restrictions)
        .and_then(|mut workbook| workbook.save(path))
        .map_err(|e| RefreshError::Export {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    tracing::info!("Exported report information to {}", path.display());
    Ok(())
}

fn build(
    descriptor: &DataSourceDescriptor,
    restrictions: &[ObservedRestriction],
) -> std::result::Result<Workbook, XlsxError> {
    let header = Format::new().set_bold();
    let mut workbook = Workbook::new();

    let info = workbook.add_worksheet().set_name(DATA_SOURCE_SHEET)?;
    write_header(info, &["Key", "Value"], &header)?;
    for (row, (key, value)) in descriptor.pairs().into_iter().enumerate() {
        let row = row as u32 + 1;
        info.write_string(row, 0, key)?;
        info.write_string(row, 1, value)?;
    }

    let table = workbook.add_worksheet().set_name(VARIABLES_FILTERS_SHEET)?;
    write_header(table, &VARIABLES_FILTERS_HEADERS, &header)?;
    for (row, r) in restrictions.iter().enumerate() {
        let cells = [
            r.command.macro_name(),
            r.field.as_str(),
            r.field_name.as_str(),
            r.value.as_str(),
            r.data_source.as_str(),
            ObservedRestriction::REFERENCE_TYPE,
            r.data_source_name.as_str(),
            r.data_source_sheet.as_str(),
        ];
        for (col, cell) in cells.into_iter().enumerate() {
            table.write_string(row as u32 + 1, col as u16, cell)?;
        }
    }

    Ok(workbook)
}

fn write_header(
    sheet: &mut Worksheet,
    headers: &[&str],
    format: &Format,
) -> std::result::Result<(), XlsxError> {
    for (col, name) in headers.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, *name, format)?;
    }
    Ok(())
}
