//! CSV export for simulation step series.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use crate::sim::stepper::SimStep;

/// Schema v1 column header for CSV series export.
const HEADER: &str = "step,at,grid_load_kw,frequency_hz,voltage_v,warning,\
                      device_count,avg_device_power_kw,household_load_kw,\
                      household_generation_kw,household_stored_kwh";

/// Exports a simulation series to a CSV file at the given path.
///
/// Writes a header row followed by one data row per step using the schema v1
/// column layout. Produces deterministic output for identical inputs.
///
/// # Errors
///
/// Returns an `io::Error` if file creation or writing fails.
pub fn export_csv(series: &[SimStep], path: &Path) -> io::Result<()> {
    let file = File::create(path)?;
    let buf = io::BufWriter::new(file);
    write_csv(series, buf)
}

/// Writes a simulation series as CSV to any writer.
///
/// # Errors
///
/// Returns an `io::Error` if writing fails.
pub fn write_csv(series: &[SimStep], writer: impl Write) -> io::Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);

    wtr.write_record(HEADER.split(',').map(str::trim))?;

    for step in series {
        let device_count = step.devices.len();
        let avg_device_kw = if device_count > 0 {
            step.devices.iter().map(|d| d.power_kw).sum::<f64>() / device_count as f64
        } else {
            0.0
        };
        let load: f64 = step.households.iter().map(|h| h.load_kw).sum();
        let generation: f64 = step.households.iter().map(|h| h.generation_kw).sum();
        let stored: f64 = step.households.iter().map(|h| h.stored_kwh).sum();

        wtr.write_record(&[
            step.step.to_string(),
            step.at.to_rfc3339(),
            format!("{:.4}", step.grid.load_kw),
            format!("{:.4}", step.grid.frequency_hz),
            format!("{:.4}", step.grid.voltage_v),
            step.grid.warning.to_string(),
            device_count.to_string(),
            format!("{avg_device_kw:.4}"),
            format!("{load:.4}"),
            format!("{generation:.4}"),
            format!("{stored:.4}"),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use crate::sim::stepper::{DeviceSample, GridSample, HouseholdSample};

    use super::*;

    fn make_step(step: u64) -> SimStep {
        SimStep {
            step,
            at: Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
                + chrono::Duration::seconds(step as i64 * 60),
            devices: vec![
                DeviceSample {
                    device_id: "d1".to_string(),
                    power_kw: 2.0,
                },
                DeviceSample {
                    device_id: "d2".to_string(),
                    power_kw: 1.0,
                },
            ],
            households: vec![HouseholdSample {
                household_id: "h1".to_string(),
                load_kw: 3.0,
                generation_kw: 1.5,
                stored_kwh: 4.0,
            }],
            grid: GridSample {
                load_kw: 3.0,
                frequency_hz: 50.01,
                voltage_v: 229.8,
                warning: false,
            },
        }
    }

    #[test]
    fn header_matches_schema_v1() {
        let series = vec![make_step(0)];
        let mut buf = Vec::new();
        write_csv(&series, &mut buf).ok();
        let output = String::from_utf8(buf).ok();
        let first_line = output.as_deref().unwrap_or("").lines().next().unwrap_or("");
        assert_eq!(
            first_line,
            "step,at,grid_load_kw,frequency_hz,voltage_v,warning,\
             device_count,avg_device_power_kw,household_load_kw,\
             household_generation_kw,household_stored_kwh"
        );
    }

    #[test]
    fn row_count_matches_step_count() {
        let series: Vec<SimStep> = (0..24).map(make_step).collect();
        let mut buf = Vec::new();
        write_csv(&series, &mut buf).ok();
        let output = String::from_utf8(buf).ok();
        let lines: Vec<&str> = output.as_deref().unwrap_or("").lines().collect();
        // 1 header + 24 data rows
        assert_eq!(lines.len(), 25);
    }

    #[test]
    fn deterministic_output() {
        let series: Vec<SimStep> = (0..5).map(make_step).collect();
        let mut buf1 = Vec::new();
        let mut buf2 = Vec::new();
        write_csv(&series, &mut buf1).ok();
        write_csv(&series, &mut buf2).ok();
        assert_eq!(buf1, buf2);
    }

    #[test]
    fn round_trip_parseable() {
        let series: Vec<SimStep> = (0..3).map(make_step).collect();
        let mut buf = Vec::new();
        write_csv(&series, &mut buf).ok();

        let mut rdr = csv::ReaderBuilder::new().from_reader(buf.as_slice());
        let headers = rdr.headers().cloned().ok();
        assert_eq!(headers.as_ref().map(csv::StringRecord::len), Some(11));

        let mut row_count = 0;
        for record in rdr.records() {
            let rec = record.ok();
            assert!(rec.is_some(), "every row should parse");
            let rec = rec.as_ref();
            // numeric columns parse as f64
            for i in [2, 3, 4, 7, 8, 9, 10] {
                let val: Result<f64, _> = rec.unwrap()[i].parse();
                assert!(val.is_ok(), "column {i} should parse as f64");
            }
            let warn: Result<bool, _> = rec.unwrap()[5].parse();
            assert!(warn.is_ok(), "warning column should parse as bool");
            row_count += 1;
        }
        assert_eq!(row_count, 3);
    }

    #[test]
    fn average_device_power_column() {
        let series = vec![make_step(0)];
        let mut buf = Vec::new();
        write_csv(&series, &mut buf).ok();
        let output = String::from_utf8(buf).unwrap_or_default();
        let row = output.lines().nth(1).unwrap_or("");
        // two devices at 2.0 and 1.0 kW average to 1.5
        assert!(row.contains("1.5000"), "row was: {row}");
    }
}
