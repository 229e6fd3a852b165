// Reads the polls from an Excel workbook.

use calamine::{open_workbook, DataType, Reader, Xlsx};

use crate::pollmc::io_common::{excel_serial_to_date, format_float_cell};
use crate::pollmc::*;

pub fn read_excel_polls(path: &str, worksheet_name: &Option<String>) -> PollResult<Builder> {
    let wrange = get_range(path, worksheet_name)?;
    let mut rows = wrange.rows();

    let header: Vec<String> = match rows.next() {
        Some(row) => row
            .iter()
            .map(|cell| cell_to_string(cell, 1))
            .collect::<PollResult<Vec<String>>>()?,
        None => whatever!("The workbook {} is empty", path),
    };
    debug!("read_excel_polls: header: {:?}", header);
    let mut builder = Builder::from_header(&header).context(AggregationSnafu {})?;

    for (idx, row) in rows.enumerate() {
        // The header is on line 1.
        let lineno = idx + 2;
        let fields: Vec<String> = row
            .iter()
            .map(|cell| cell_to_string(cell, lineno))
            .collect::<PollResult<Vec<String>>>()?;
        if fields.iter().all(|f| f.is_empty()) {
            debug!("read_excel_polls: skipping empty line {}", lineno);
            builder.skip_row();
            continue;
        }
        builder.add_row(&fields).context(AggregationSnafu {})?;
    }
    info!(
        "read_excel_polls: read {} polls from {:?}",
        builder.polls().len(),
        path
    );
    Ok(builder)
}

fn cell_to_string(cell: &DataType, lineno: usize) -> PollResult<String> {
    match cell {
        DataType::String(s) => Ok(s.trim().to_string()),
        DataType::Float(x) => Ok(format_float_cell(*x)),
        DataType::Int(i) => Ok(i.to_string()),
        DataType::Bool(b) => Ok(b.to_string()),
        DataType::Empty => Ok(String::new()),
        DataType::DateTime(serial) => match excel_serial_to_date(*serial) {
            Some(d) => Ok(d.format("%Y-%m-%d").to_string()),
            None => ExcelWrongCellTypeSnafu {
                lineno,
                content: format!("{:?}", cell),
            }
            .fail(),
        },
        x => ExcelWrongCellTypeSnafu {
            lineno,
            content: format!("{:?}", x),
        }
        .fail(),
    }
}

fn get_range(path: &str, worksheet_name: &Option<String>) -> PollResult<calamine::Range<DataType>> {
    debug!(
        "read_excel_polls: path: {:?} worksheet: {:?}",
        path, worksheet_name
    );
    let mut workbook: Xlsx<_> = open_workbook(path).context(OpeningExcelSnafu { path })?;

    match worksheet_name {
        Some(sheet) => workbook
            .worksheet_range(sheet)
            .context(EmptyExcelSnafu { path, sheet })?
            .context(OpeningExcelSnafu { path }),
        // Without a name, the first worksheet is used.
        None => workbook
            .worksheet_range_at(0)
            .context(EmptyExcelSnafu {
                path,
                sheet: "#1".to_string(),
            })?
            .context(OpeningExcelSnafu { path }),
    }
}
