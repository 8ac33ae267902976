use std::fmt;
use std::sync::Arc;

use chrono::NaiveDateTime;
use tracing::info;

use crate::data::PriceTable;
use crate::error::{FeatureError, Result};

/// Formats accepted for the fused `date time` key, tried in order.
const TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M"];

/// Format used when a timestamp key is rendered back to text.
pub const TIMESTAMP_DISPLAY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Key of a single row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IndexKey {
    /// Default key: the row's position in the source.
    Position(usize),
    /// Value of the column chosen as `index_col` at load time.
    Label(String),
    /// Fused `date` + `time` key produced by [`build_index`].
    Timestamp(NaiveDateTime),
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexKey::Position(position) => write!(f, "{position}"),
            IndexKey::Label(label) => f.write_str(label),
            IndexKey::Timestamp(at) => write!(f, "{}", at.format(TIMESTAMP_DISPLAY_FORMAT)),
        }
    }
}

/// Ordered, immutable row keys shared by a table and every series derived
/// from it. Keys may repeat and are never re-sorted.
#[derive(Debug, Clone)]
pub struct RowIndex {
    keys: Arc<[IndexKey]>,
}

impl RowIndex {
    pub fn positional(len: usize) -> Self {
        Self::from_keys((0..len).map(IndexKey::Position))
    }

    pub fn from_keys(keys: impl IntoIterator<Item = IndexKey>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[IndexKey] {
        &self.keys
    }

    pub fn get(&self, row: usize) -> Option<&IndexKey> {
        self.keys.get(row)
    }

    /// Keys rendered as text, in row order.
    pub fn labels(&self) -> Vec<String> {
        self.keys.iter().map(ToString::to_string).collect()
    }

    /// Keep the keys whose mask entry is true.
    pub fn filter(&self, mask: &[bool]) -> Self {
        Self::from_keys(
            self.keys
                .iter()
                .zip(mask.iter())
                .filter(|(_, keep)| **keep)
                .map(|(key, _)| key.clone()),
        )
    }
}

impl PartialEq for RowIndex {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.keys, &other.keys) || self.keys == other.keys
    }
}

/// Replace the row index of `table` with fused `date time` timestamps and
/// drop the two source columns.
///
/// `.` separators in the date are normalised to `-` before parsing. Rows keep
/// their order; duplicate timestamps are allowed.
pub fn build_index(table: PriceTable) -> Result<PriceTable> {
    let dates = timestamp_part(&table, "date")?;
    let times = timestamp_part(&table, "time")?;

    let mut keys = Vec::with_capacity(dates.len());
    for (row, (date, time)) in dates.into_iter().zip(times).enumerate() {
        let (Some(date), Some(time)) = (date, time) else {
            return Err(FeatureError::MalformedTimestamp {
                row: Some(row),
                reason: "date or time value is empty".to_string(),
            });
        };
        let text = format!("{} {}", date.trim().replace('.', "-"), time.trim());
        let at = parse_timestamp(&text).ok_or_else(|| FeatureError::MalformedTimestamp {
            row: Some(row),
            reason: format!("cannot parse '{text}' as a timestamp"),
        })?;
        keys.push(IndexKey::Timestamp(at));
    }

    let (_, frame) = table.into_parts();
    let frame = frame.drop("date")?.drop("time")?;
    info!(
        rows = keys.len(),
        first = ?keys.first().map(ToString::to_string),
        last = ?keys.last().map(ToString::to_string),
        "Built timestamp index"
    );
    PriceTable::new(RowIndex::from_keys(keys), frame)
}

fn timestamp_part(table: &PriceTable, name: &str) -> Result<Vec<Option<String>>> {
    if !table.has_column(name) {
        return Err(FeatureError::MalformedTimestamp {
            row: None,
            reason: format!("missing '{name}' column"),
        });
    }
    let values = table.string_column(name)?;
    Ok(values
        .into_iter()
        .map(|value| value.filter(|v| !v.trim().is_empty()))
        .collect())
}

fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
}
