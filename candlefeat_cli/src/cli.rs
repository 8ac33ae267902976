use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand, ValueEnum};

use candlefeat_rs::config::DEFAULT_COLUMNS;
use candlefeat_rs::{
    FeatureConfig, HeaderSpec, IndexColumn, Mode, PipelineConfig, SourceConfig, WindowWidths,
};

#[derive(Parser, Debug)]
#[command(
    name = "candlefeat",
    about = "Candlestick feature extraction for OHLCV exports"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load a price export, extract features, and write the model-ready tables
    #[command(name = "prepare")]
    Prepare(PrepareArgs),
}

#[derive(Parser, Debug)]
pub struct PrepareArgs {
    /// Path to the delimited OHLCV export
    #[arg(long = "csv", value_name = "FILE", value_hint = clap::ValueHint::FilePath)]
    pub csv_path: PathBuf,

    /// Output directory for features.csv, labels.csv, and run_config.json
    #[arg(long = "output-dir", value_hint = clap::ValueHint::DirPath)]
    pub output_dir: PathBuf,

    /// Header handling: `infer`, `none`, or the zero-based header line
    #[arg(long, default_value = "infer")]
    pub header: HeaderSpec,

    /// Column (name or zero-based position) used as the row index at load time
    #[arg(long = "index-col")]
    pub index_col: Option<IndexColumn>,

    /// Comma-separated column names assigned to the source columns in order
    #[arg(long, value_delimiter = ',')]
    pub names: Vec<String>,

    /// Single-byte field separator
    #[arg(long, default_value_t = ',')]
    pub separator: char,

    /// Comma-separated SMA window widths
    #[arg(long = "windows", alias = "window-widths", default_value = "3,5,10")]
    pub windows: String,

    /// Train attaches the next-bar label; predict keeps the final bar
    #[arg(long, value_enum, default_value = "train")]
    pub mode: ModeValue,

    /// Overwrite an existing features.csv whose content differs from this run
    #[arg(long = "ack-new-output", default_value_t = false)]
    pub ack_new_output: bool,

    /// Only log to stdout (skip candlefeat.log in the output directory)
    #[arg(long = "no-file-log", default_value_t = false)]
    pub no_file_log: bool,
}

impl Cli {
    pub fn parse() -> Self {
        <Cli as Parser>::parse()
    }
}

impl PrepareArgs {
    pub fn into_config(self) -> Result<PipelineConfig> {
        if !self.separator.is_ascii() {
            return Err(anyhow!(
                "--separator must be a single ASCII character (got '{}')",
                self.separator
            ));
        }
        let names = if self.names.is_empty() {
            DEFAULT_COLUMNS.iter().map(|name| name.to_string()).collect()
        } else {
            self.names
        };
        let window_widths = WindowWidths::parse(&self.windows)
            .with_context(|| format!("invalid --windows value '{}'", self.windows))?;

        let source = SourceConfig::new(self.csv_path)
            .with_header(self.header)
            .with_index_col(self.index_col)
            .with_names(names)
            .with_separator(self.separator as u8);
        Ok(PipelineConfig {
            source,
            features: FeatureConfig {
                window_widths,
                mode: self.mode.to_mode(),
            },
        })
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum ModeValue {
    Train,
    Predict,
}

impl ModeValue {
    pub fn to_mode(self) -> Mode {
        match self {
            ModeValue::Train => Mode::Train,
            ModeValue::Predict => Mode::Predict,
        }
    }
}
