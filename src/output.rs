use crate::driver::OutputRow;
use std::fs::OpenOptions;
use std::io::Write;

/// CSV writer for box-model output rows.
///
/// Headers come from the first row's flat columns (`time.s`, `ENV.*`,
/// `CONC.*`); every subsequent row is written in the same column order.
pub struct CsvWriter {
    /// Path to the CSV file to write (created/overwritten on first write)
    pub file_path: String,
    header: Option<Vec<String>>,
}

impl CsvWriter {
    pub fn new(file_path: impl Into<String>) -> Self {
        CsvWriter {
            file_path: file_path.into(),
            header: None,
        }
    }

    /// Write all rows in one shot.
    pub fn write_rows(&mut self, rows: &[OutputRow]) -> Result<(), std::io::Error> {
        for row in rows {
            self.append_row(row)?;
        }
        Ok(())
    }

    /// Append one row, writing the header first if this is the first row.
    pub fn append_row(&mut self, row: &OutputRow) -> Result<(), std::io::Error> {
        let columns = row.flat_columns();

        if self.header.is_none() {
            let names: Vec<String> = columns.iter().map(|(name, _)| name.clone()).collect();
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&self.file_path)?;
            writeln!(file, "{}", names.join(","))?;
            self.header = Some(names);
        }

        let header = self.header.as_ref().unwrap();
        let mut values = Vec::with_capacity(header.len());
        for name in header {
            let value = columns
                .iter()
                .find(|(column, _)| column == name)
                .map(|(_, v)| *v)
                .unwrap_or(f64::NAN);
            values.push(format!("{}", value));
        }

        let mut file = OpenOptions::new().append(true).open(&self.file_path)?;
        writeln!(file, "{}", values.join(","))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditions::EnvironmentalState;
    use std::collections::BTreeMap;

    fn sample_row(time_s: f64, x: f64) -> OutputRow {
        let mut concentrations = BTreeMap::new();
        concentrations.insert("X".to_string(), x);
        OutputRow {
            time_s,
            environment: EnvironmentalState {
                temperature_k: 298.15,
                pressure_pa: 101325.0,
                air_density_mol_m3: 40.87,
            },
            concentrations,
        }
    }

    #[test]
    fn test_csv_round_trip() {
        let path = std::env::temp_dir().join("chem_box_csv_writer_test.csv");
        let mut writer = CsvWriter::new(path.to_string_lossy().to_string());
        writer
            .write_rows(&[sample_row(0.0, 1.0), sample_row(20.0, 0.5)])
            .unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("time.s,ENV.temperature.K"));
        assert!(lines[0].contains("CONC.X.mol m-3"));
        assert!(lines[1].starts_with("0,"));
        assert!(lines[2].starts_with("20,"));
        std::fs::remove_file(&path).ok();
    }
}
