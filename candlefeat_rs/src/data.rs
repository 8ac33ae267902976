use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use polars::prelude::*;
use tracing::{debug, info};

use crate::aligned::AlignedSeries;
use crate::config::{HeaderSpec, IndexColumn, SourceConfig};
use crate::error::{FeatureError, Result};
use crate::index::{IndexKey, RowIndex};

/// Columns kept as text when the raw table is loaded; every other column is
/// read as `Float64`.
pub const TEXT_COLUMNS: &[&str] = &["date", "time"];

/// Raw price rows in source order, keyed by a [`RowIndex`].
#[derive(Debug, Clone)]
pub struct PriceTable {
    index: RowIndex,
    frame: DataFrame,
}

impl PriceTable {
    pub fn new(index: RowIndex, frame: DataFrame) -> Result<Self> {
        if index.len() != frame.height() {
            return Err(FeatureError::DataFormat(format!(
                "index has {} keys but the table has {} rows",
                index.len(),
                frame.height()
            )));
        }
        Ok(Self { index, frame })
    }

    pub fn index(&self) -> &RowIndex {
        &self.index
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn height(&self) -> usize {
        self.frame.height()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.frame
            .get_column_names()
            .iter()
            .map(|name| name.to_string())
            .collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.frame.column(name).is_ok()
    }

    /// Numeric column as an aligned series; nulls and NaNs become undefined.
    pub fn float_column(&self, name: &str) -> Result<AlignedSeries<f64>> {
        aligned_float(&self.frame, &self.index, name)
    }

    pub fn string_column(&self, name: &str) -> Result<Vec<Option<String>>> {
        let series = self
            .frame
            .column(name)
            .map_err(|_| FeatureError::MissingColumn(name.to_string()))?
            .cast(&DataType::String)?;
        Ok(series
            .str()?
            .into_iter()
            .map(|value| value.map(str::to_string))
            .collect())
    }

    pub(crate) fn into_parts(self) -> (RowIndex, DataFrame) {
        (self.index, self.frame)
    }
}

pub(crate) fn aligned_float(
    frame: &DataFrame,
    index: &RowIndex,
    name: &str,
) -> Result<AlignedSeries<f64>> {
    let series = frame
        .column(name)
        .map_err(|_| FeatureError::MissingColumn(name.to_string()))?;
    let values = series
        .f64()
        .map_err(|_| FeatureError::DataFormat(format!("column '{name}' must be float")))?
        .into_iter()
        .map(|value| value.filter(|v| !v.is_nan()))
        .collect();
    AlignedSeries::new(name, index.clone(), values)
}

/// Read the delimited source described by `config` into a [`PriceTable`].
///
/// Column names are always taken from `config.names`, assigned by position.
/// A header row in the file is only used to decide how many lines to skip.
pub fn load_price_table(config: &SourceConfig) -> Result<PriceTable> {
    let path = config.data.as_path();
    let skip_rows = leading_rows_to_skip(path, config.header, config.separator)?;
    let file = File::open(path).map_err(|source| FeatureError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut frame = CsvReader::new(file)
        .has_header(false)
        .with_separator(config.separator)
        .with_skip_rows(skip_rows)
        .infer_schema(None)
        .finish()
        .map_err(|err| {
            FeatureError::DataFormat(format!("Unable to parse {}: {err}", path.display()))
        })?;

    if frame.width() != config.names.len() {
        return Err(FeatureError::DataFormat(format!(
            "{} has {} columns but {} names were given ({})",
            path.display(),
            frame.width(),
            config.names.len(),
            config.names.join(", ")
        )));
    }
    frame
        .set_column_names(config.names.as_slice())
        .map_err(|err| FeatureError::DataFormat(format!("Invalid column names: {err}")))?;

    let index_name = match &config.index_col {
        None => None,
        Some(IndexColumn::Name(name)) => Some(name.clone()),
        Some(IndexColumn::Position(position)) => {
            Some(config.names.get(*position).cloned().ok_or_else(|| {
                FeatureError::DataFormat(format!(
                    "index column position {position} is out of range for {} columns",
                    config.names.len()
                ))
            })?)
        }
    };

    for name in &config.names {
        let is_text = TEXT_COLUMNS.contains(&name.as_str()) || index_name.as_ref() == Some(name);
        let target = if is_text {
            DataType::String
        } else {
            DataType::Float64
        };
        let column = frame.column(name)?;
        if column.dtype() == &target {
            continue;
        }
        debug!(column = %name, from = ?column.dtype(), to = ?target, "Casting column");
        let cast = column.strict_cast(&target).map_err(|err| {
            FeatureError::DataFormat(format!("Column '{name}' cannot be read as {target}: {err}"))
        })?;
        frame.with_column(cast)?;
    }

    let index = match index_name {
        None => RowIndex::positional(frame.height()),
        Some(name) => {
            let labels = frame
                .column(&name)
                .map_err(|_| FeatureError::MissingColumn(name.clone()))?
                .cast(&DataType::String)?;
            let index = RowIndex::from_keys(
                labels
                    .str()?
                    .into_iter()
                    .map(|label| IndexKey::Label(label.unwrap_or_default().to_string())),
            );
            frame = frame.drop(&name)?;
            index
        }
    };

    info!(
        rows = frame.height(),
        columns = frame.width(),
        skipped_lines = skip_rows,
        path = %path.display(),
        "Loaded raw price table"
    );
    PriceTable::new(index, frame)
}

fn leading_rows_to_skip(path: &Path, header: HeaderSpec, separator: u8) -> Result<usize> {
    match header {
        HeaderSpec::Absent => Ok(0),
        HeaderSpec::Row(row) => Ok(row + 1),
        HeaderSpec::Infer => {
            let io_error = |source| FeatureError::Io {
                path: path.to_path_buf(),
                source,
            };
            let file = File::open(path).map_err(io_error)?;
            let mut first_line = String::new();
            BufReader::new(file)
                .read_line(&mut first_line)
                .map_err(io_error)?;
            Ok(usize::from(looks_like_header(&first_line, separator)))
        }
    }
}

/// A line is a header when none of its fields reads as a number.
fn looks_like_header(line: &str, separator: u8) -> bool {
    let line = line.trim();
    if line.is_empty() {
        return false;
    }
    line.split(char::from(separator))
        .map(|field| field.trim().trim_matches('"'))
        .all(|field| field.parse::<f64>().is_err())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::tempdir;

    const HEADERLESS: &str = "\
2020.01.02,10:00,1.10,1.20,1.00,1.15,100
2020.01.02,10:05,1.15,1.25,1.05,1.10,250
";

    #[test]
    fn loads_headerless_file_with_default_names() -> Result<()> {
        let temp_dir = tempdir()?;
        let csv_path = temp_dir.path().join("prices.csv");
        std::fs::write(&csv_path, HEADERLESS)?;

        let table = load_price_table(&SourceConfig::new(&csv_path))?;
        assert_eq!(table.height(), 2);
        assert_eq!(
            table.column_names(),
            vec!["date", "time", "open", "high", "low", "close", "volume"]
        );
        assert_eq!(table.frame().column("date")?.dtype(), &DataType::String);
        assert_eq!(table.frame().column("volume")?.dtype(), &DataType::Float64);
        assert_eq!(table.float_column("volume")?.values(), &[Some(100.0), Some(250.0)]);
        assert_eq!(table.index(), &RowIndex::positional(2));
        Ok(())
    }

    #[test]
    fn inferred_header_row_is_skipped() -> Result<()> {
        let temp_dir = tempdir()?;
        let csv_path = temp_dir.path().join("with_header.csv");
        std::fs::write(&csv_path, format!("Date,Time,O,H,L,C,V\n{HEADERLESS}"))?;

        let table = load_price_table(&SourceConfig::new(&csv_path))?;
        assert_eq!(table.height(), 2);
        assert_eq!(table.float_column("open")?.get(0), Some(1.10));
        Ok(())
    }

    #[test]
    fn explicit_header_row_skips_preamble() -> Result<()> {
        let temp_dir = tempdir()?;
        let csv_path = temp_dir.path().join("preamble.csv");
        std::fs::write(&csv_path, format!("exported by terminal\nd,t,o,h,l,c,v\n{HEADERLESS}"))?;

        let config = SourceConfig::new(&csv_path).with_header(HeaderSpec::Row(1));
        let table = load_price_table(&config)?;
        assert_eq!(table.height(), 2);
        Ok(())
    }

    #[test]
    fn column_count_mismatch_is_a_format_error() -> Result<()> {
        let temp_dir = tempdir()?;
        let csv_path = temp_dir.path().join("short.csv");
        std::fs::write(&csv_path, "2020.01.02,10:00,1.1,1.2,1.0,1.15\n")?;

        let err = load_price_table(&SourceConfig::new(&csv_path)).unwrap_err();
        assert!(matches!(err, FeatureError::DataFormat(_)), "got {err:?}");
        Ok(())
    }

    #[test]
    fn missing_source_is_an_io_error() {
        let err = load_price_table(&SourceConfig::new("/definitely/not/here.csv")).unwrap_err();
        assert!(matches!(err, FeatureError::Io { .. }), "got {err:?}");
    }

    #[test]
    fn index_column_becomes_label_keys() -> Result<()> {
        let temp_dir = tempdir()?;
        let csv_path = temp_dir.path().join("labelled.csv");
        std::fs::write(&csv_path, "a,1.0\nb,2.0\n")?;

        let config = SourceConfig::new(&csv_path)
            .with_names(["bar_id", "close"])
            .with_index_col(Some(IndexColumn::Position(0)));
        let table = load_price_table(&config)?;
        assert_eq!(table.column_names(), vec!["close".to_string()]);
        assert_eq!(
            table.index().keys(),
            &[IndexKey::Label("a".into()), IndexKey::Label("b".into())]
        );
        Ok(())
    }

    #[test]
    fn header_sniffing_rules() {
        assert!(looks_like_header("date,time,open,high,low,close,volume\n", b','));
        assert!(!looks_like_header("2020.01.02,10:00,1.1,1.2,1.0,1.15,100", b','));
        assert!(!looks_like_header("", b','));
        assert!(looks_like_header("date;time", b';'));
    }
}
