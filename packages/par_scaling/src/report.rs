//! Renders a measurement table for humans (aligned columns) and for spreadsheets (CSV).

use std::fmt::{self, Display, Write as _};
use std::fs;
use std::path::Path;

use par_scaling::{Error, Measurement, MeasurementTable, Result, efficiency, speedup};

/// Column headers after the problem size column.
const HEADERS: [&str; 5] = ["Backend", "Workers", "Seconds", "Speedup", "Efficiency"];

/// Header of the problem size column in CSV output.
const CSV_SIZE_HEADER: &str = "Files/Digits";

/// One rendered row; absent values are empty strings.
#[derive(Debug)]
struct Row {
    cells: [String; 6],
}

impl Row {
    fn new(table: &MeasurementTable, measurement: &Measurement) -> Self {
        let configuration = measurement.configuration();
        let size = configuration.problem_size();
        let backend = configuration.backend();
        let workers = configuration.workers();

        let seconds = measurement
            .elapsed_seconds()
            .map(|seconds| format!("{seconds:.6}"));
        let speedup = speedup(table, size, backend, workers).map(|value| format!("{value:.3}"));
        let efficiency =
            efficiency(table, size, backend, workers).map(|value| format!("{value:.3}"));

        Self {
            cells: [
                size.to_string(),
                backend.to_string(),
                workers.to_string(),
                seconds.unwrap_or_default(),
                speedup.unwrap_or_default(),
                efficiency.unwrap_or_default(),
            ],
        }
    }
}

/// A measurement table with derived speedup and efficiency, ready to print or save.
#[derive(Debug)]
pub(crate) struct Report {
    size_header: &'static str,
    rows: Vec<Row>,
}

impl Report {
    /// `size_header` names the problem size column in the aligned rendering.
    pub(crate) fn new(table: &MeasurementTable, size_header: &'static str) -> Self {
        Self {
            size_header,
            rows: table
                .iter()
                .map(|measurement| Row::new(table, measurement))
                .collect(),
        }
    }

    pub(crate) fn to_csv(&self) -> String {
        let mut csv = String::new();

        csv.push_str(CSV_SIZE_HEADER);
        for header in HEADERS {
            csv.push(',');
            csv.push_str(header);
        }
        csv.push('\n');

        for row in &self.rows {
            csv.push_str(&row.cells.join(","));
            csv.push('\n');
        }

        csv
    }

    pub(crate) fn write_csv(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_csv()).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    fn headers(&self) -> [&str; 6] {
        let [backend, workers, seconds, speedup, efficiency] = HEADERS;
        [self.size_header, backend, workers, seconds, speedup, efficiency]
    }
}

impl Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headers = self.headers();

        let mut widths = headers.map(|header| header.chars().count());
        for row in &self.rows {
            for (width, cell) in widths.iter_mut().zip(&row.cells) {
                *width = (*width).max(cell.chars().count());
            }
        }

        let mut line = String::new();

        for (column, (header, width)) in headers.iter().zip(widths).enumerate() {
            if column > 0 {
                line.push_str("  ");
            }
            write!(line, "{header:<width$}")?;
        }
        writeln!(f, "{}", line.trim_end())?;

        for row in &self.rows {
            line.clear();

            // Text columns are left-aligned, numbers right-aligned.
            for (column, (cell, width)) in row.cells.iter().zip(widths).enumerate() {
                if column > 0 {
                    line.push_str("  ");
                }

                if column == 1 {
                    write!(line, "{cell:<width$}")?;
                } else {
                    write!(line, "{cell:>width$}")?;
                }
            }
            writeln!(f, "{}", line.trim_end())?;
        }

        Ok(())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::time::Duration;

    use new_zealand::nz;
    use par_scaling::{BackendKind, Configuration};
    use testing::CorpusFixture;

    use super::*;

    fn table() -> MeasurementTable {
        [
            Measurement::new(Configuration::baseline(3), Some(Duration::from_secs(4))),
            Measurement::new(
                Configuration::new(3, BackendKind::MessagePassing, nz!(2)),
                Some(Duration::from_secs(2)),
            ),
            Measurement::new(Configuration::new(3, BackendKind::TaskGraph, nz!(2)), None),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn csv_has_header_and_empty_cells_for_absent_values() {
        let csv = Report::new(&table(), "Digits").to_csv();
        let lines: Vec<_> = csv.lines().collect();

        assert_eq!(
            lines,
            [
                "Files/Digits,Backend,Workers,Seconds,Speedup,Efficiency",
                "3,Sequential,1,4.000000,1.000,1.000",
                "3,MessagePassing,2,2.000000,2.000,1.000",
                "3,TaskGraph,2,,,",
            ]
        );
    }

    #[test]
    fn aligned_rendering_pads_columns() {
        let rendered = Report::new(&table(), "Digits").to_string();
        let lines: Vec<_> = rendered.lines().collect();

        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("Digits  Backend         Workers"));
        assert!(lines[2].starts_with("     3  MessagePassing        2"));
        // Absent values leave the trailing columns blank.
        assert!(lines[3].ends_with("TaskGraph             2"));
    }

    #[test]
    #[cfg_attr(miri, ignore)] // Miri does not support real filesystem access.
    fn csv_is_written_to_file() {
        let fixture = CorpusFixture::new();
        let path = fixture.path().join("results.csv");

        Report::new(&table(), "Digits").write_csv(&path).unwrap();

        let written = fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("Files/Digits,"));
    }

    #[test]
    #[cfg_attr(miri, ignore)] // Miri does not support real filesystem access.
    fn unwritable_path_is_io_error() {
        let fixture = CorpusFixture::new();
        let path = fixture.path().join("missing").join("results.csv");

        assert!(matches!(
            Report::new(&table(), "Files").write_csv(&path),
            Err(Error::Io { .. })
        ));
    }
}
