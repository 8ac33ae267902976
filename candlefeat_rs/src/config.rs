use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{FeatureError, Result};

/// Column layout of a raw OHLCV export when no other names are given.
pub const DEFAULT_COLUMNS: [&str; 7] = ["date", "time", "open", "high", "low", "close", "volume"];

/// Rolling SMA widths used when the caller does not pick any.
pub const DEFAULT_WINDOW_WIDTHS: [usize; 3] = [3, 5, 10];

fn default_columns() -> Vec<String> {
    DEFAULT_COLUMNS.iter().map(|name| name.to_string()).collect()
}

const fn default_separator() -> u8 {
    b','
}

/// How the loader treats the leading lines of the source.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum HeaderSpec {
    /// Skip the first line when none of its fields parse as a number.
    #[default]
    Infer,
    /// Zero-based line holding the header; it and every line before it are skipped.
    Row(usize),
    /// Every line is data.
    Absent,
}

impl FromStr for HeaderSpec {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "infer" => Ok(HeaderSpec::Infer),
            "none" | "absent" | "no" => Ok(HeaderSpec::Absent),
            other => other
                .parse::<usize>()
                .map(HeaderSpec::Row)
                .map_err(|_| format!("expected 'infer', 'none', or a row number (got '{raw}')")),
        }
    }
}

/// Column promoted to the row index at load time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IndexColumn {
    Position(usize),
    Name(String),
}

impl FromStr for IndexColumn {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err("index column must not be empty".to_string());
        }
        Ok(match raw.parse::<usize>() {
            Ok(position) => IndexColumn::Position(position),
            Err(_) => IndexColumn::Name(raw.to_string()),
        })
    }
}

/// Where the raw table comes from and how to read it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Path to the delimited price export.
    pub data: PathBuf,
    #[serde(default)]
    pub header: HeaderSpec,
    /// Optional column to use as the row index before the timestamp index is built.
    #[serde(default)]
    pub index_col: Option<IndexColumn>,
    /// Names assigned positionally to the source columns.
    #[serde(default = "default_columns")]
    pub names: Vec<String>,
    #[serde(default = "default_separator")]
    pub separator: u8,
}

impl SourceConfig {
    pub fn new(data: impl Into<PathBuf>) -> Self {
        Self {
            data: data.into(),
            header: HeaderSpec::default(),
            index_col: None,
            names: default_columns(),
            separator: default_separator(),
        }
    }

    pub fn with_header(mut self, header: HeaderSpec) -> Self {
        self.header = header;
        self
    }

    pub fn with_index_col(mut self, index_col: Option<IndexColumn>) -> Self {
        self.index_col = index_col;
        self
    }

    pub fn with_names<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_separator(mut self, separator: u8) -> Self {
        self.separator = separator;
        self
    }
}

/// Validated, de-duplicated set of rolling window widths.
///
/// Construction fails fast on zero, negative, or non-integer widths so the
/// extractor never starts on a configuration it cannot honour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<i64>", into = "Vec<usize>")]
pub struct WindowWidths(Vec<usize>);

impl WindowWidths {
    pub fn new(widths: impl IntoIterator<Item = i64>) -> Result<Self> {
        let mut out: Vec<usize> = Vec::new();
        for width in widths {
            if width <= 0 {
                return Err(FeatureError::InvalidWindowWidth(width.to_string()));
            }
            let width = width as usize;
            if out.contains(&width) {
                tracing::warn!(width, "Ignoring duplicate window width");
                continue;
            }
            out.push(width);
        }
        Ok(Self(out))
    }

    /// Parse a comma-separated list such as `3,5,10`. An empty string is an
    /// empty set.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut widths = Vec::new();
        for token in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let width = token
                .parse::<i64>()
                .map_err(|_| FeatureError::InvalidWindowWidth(token.to_string()))?;
            widths.push(width);
        }
        Self::new(widths)
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().copied()
    }
}

impl Default for WindowWidths {
    fn default() -> Self {
        Self(DEFAULT_WINDOW_WIDTHS.to_vec())
    }
}

impl TryFrom<Vec<i64>> for WindowWidths {
    type Error = FeatureError;

    fn try_from(value: Vec<i64>) -> Result<Self> {
        Self::new(value)
    }
}

impl From<WindowWidths> for Vec<usize> {
    fn from(value: WindowWidths) -> Self {
        value.0
    }
}

impl FromStr for WindowWidths {
    type Err = FeatureError;

    fn from_str(raw: &str) -> Result<Self> {
        Self::parse(raw)
    }
}

impl fmt::Display for WindowWidths {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .0
            .iter()
            .map(|w| w.to_string())
            .collect::<Vec<_>>()
            .join(",");
        f.write_str(&joined)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Attach and detach the next-bar label.
    #[default]
    Train,
    /// Features only.
    Predict,
}

impl Mode {
    pub fn builds_labels(self) -> bool {
        matches!(self, Mode::Train)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureConfig {
    #[serde(default)]
    pub window_widths: WindowWidths,
    #[serde(default)]
    pub mode: Mode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub source: SourceConfig,
    #[serde(default)]
    pub features: FeatureConfig,
}

impl PipelineConfig {
    pub fn new(source: SourceConfig) -> Self {
        Self {
            source,
            features: FeatureConfig::default(),
        }
    }
}
