use std::fs;
use std::path::Path;

use chrono::{Duration, NaiveDate};
use snafu::ResultExt;

use crate::pollmc::{PollResult, WritingSnafu};

/// Creates the directory that will contain the given file, if needed.
pub fn create_parent_dir(path: &str) -> PollResult<()> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).context(WritingSnafu { path })?;
        }
    }
    Ok(())
}

/// Converts the serial number of a date in a spreadsheet (days since
/// 1899-12-30) to a calendar date. The time of the day is dropped.
pub fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || serial < 1.0 {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    epoch.checked_add_signed(Duration::days(serial.floor() as i64))
}

// Spreadsheets store all the numbers as floats: 2000.0 is written back as 2000.
pub fn format_float_cell(x: f64) -> String {
    if x.fract() == 0.0 && x.abs() < 1e15 {
        format!("{}", x as i64)
    } else {
        format!("{}", x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_dates() {
        assert_eq!(
            excel_serial_to_date(46073.0),
            NaiveDate::from_ymd_opt(2026, 2, 20)
        );
        assert_eq!(
            excel_serial_to_date(46073.75),
            NaiveDate::from_ymd_opt(2026, 2, 20)
        );
        assert_eq!(excel_serial_to_date(f64::NAN), None);
        assert_eq!(excel_serial_to_date(0.0), None);
    }

    #[test]
    fn float_cells() {
        assert_eq!(format_float_cell(2000.0), "2000");
        assert_eq!(format_float_cell(37.5), "37.5");
    }
}
