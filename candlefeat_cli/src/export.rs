use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use candlefeat_rs::features::feature_columns;
use candlefeat_rs::{FeatureSet, PipelineConfig};
use polars::prelude::*;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

pub const FEATURES_FILE: &str = "features.csv";
pub const LABELS_FILE: &str = "labels.csv";
pub const RUN_CONFIG_FILE: &str = "run_config.json";
pub const INDEX_COLUMN: &str = "timestamp";

#[derive(Debug, Clone, Copy, Default)]
pub struct ExportOptions {
    /// Replace an existing features.csv even when its content differs.
    pub ack_new_output: bool,
}

/// Paths produced by one export.
#[derive(Debug, Clone)]
pub struct ExportedFiles {
    pub features: PathBuf,
    pub labels: Option<PathBuf>,
    pub run_config: PathBuf,
    pub features_sha256: String,
}

#[derive(Serialize)]
struct RunRecord<'a> {
    version: &'static str,
    config: &'a PipelineConfig,
    rows: usize,
    columns: Vec<String>,
    engineered_columns: Vec<String>,
    features_sha256: &'a str,
}

/// Write the feature table, the labels (train mode), and the effective
/// configuration into `output_dir`.
pub fn export_feature_set(
    set: &FeatureSet,
    config: &PipelineConfig,
    output_dir: &Path,
    options: ExportOptions,
) -> Result<ExportedFiles> {
    let engineered = feature_columns(set.features.window_widths());
    if let Some(missing) = engineered.iter().find(|name| !set.features.has_column(name)) {
        return Err(anyhow!("Feature table is missing engineered column '{missing}'"));
    }

    fs::create_dir_all(output_dir)
        .with_context(|| format!("Unable to create {}", output_dir.display()))?;

    let mut features = indexed_features(set)?;
    let (rendered, new_hash) = render_csv(&mut features)?;
    let features_path = output_dir.join(FEATURES_FILE);
    write_guarded(&features_path, &rendered, &new_hash, options)?;

    let labels_path = output_dir.join(LABELS_FILE);
    let labels = match &set.labels {
        Some(labels) => {
            let mut frame = DataFrame::new(vec![
                Series::new(INDEX_COLUMN, labels.index().labels()),
                labels.clone().into_series(),
            ])?;
            let (rendered, _) = render_csv(&mut frame)?;
            fs::write(&labels_path, rendered)
                .with_context(|| format!("Unable to write {}", labels_path.display()))?;
            info!(rows = frame.height(), path = %labels_path.display(), "Labels written");
            Some(labels_path)
        }
        None => {
            if labels_path.exists() {
                fs::remove_file(&labels_path).with_context(|| {
                    format!("Unable to remove stale {}", labels_path.display())
                })?;
                info!(path = %labels_path.display(), "Removed labels from a previous train run");
            }
            None
        }
    };

    let run_config = output_dir.join(RUN_CONFIG_FILE);
    let record = RunRecord {
        version: env!("CARGO_PKG_VERSION"),
        config,
        rows: set.height(),
        columns: set.features.column_names(),
        engineered_columns: engineered,
        features_sha256: &new_hash,
    };
    let json = serde_json::to_string_pretty(&record)?;
    fs::write(&run_config, json)
        .with_context(|| format!("Unable to write {}", run_config.display()))?;

    Ok(ExportedFiles {
        features: features_path,
        labels,
        run_config,
        features_sha256: new_hash,
    })
}

/// Feature frame with the row index rendered as the leading column.
fn indexed_features(set: &FeatureSet) -> Result<DataFrame> {
    let mut frame = set.features.frame().clone();
    let index = Series::new(INDEX_COLUMN, set.features.index().labels());
    frame
        .insert_column(0, index)
        .with_context(|| "Failed to attach the index column")?;
    Ok(frame)
}

fn render_csv(frame: &mut DataFrame) -> Result<(Vec<u8>, String)> {
    let mut writer = HashingWriter::new(Vec::new());
    CsvWriter::new(&mut writer)
        .include_header(true)
        .finish(frame)
        .with_context(|| "Failed to render CSV")?;
    Ok(writer.finish())
}

fn write_guarded(path: &Path, rendered: &[u8], new_hash: &str, options: ExportOptions) -> Result<()> {
    if path.exists() {
        let old_hash = sha256_file(path)?;
        if old_hash == new_hash {
            info!(
                path = %path.display(),
                sha256 = %new_hash,
                "Feature table unchanged; reusing existing file"
            );
            return Ok(());
        }
        if !options.ack_new_output {
            return Err(anyhow!(
                "Existing {} differs from the newly extracted features.\n\
                 path: {}\n\
                 existing sha256: {}\n\
                 new sha256: {}\n\
                 Rerun with --ack-new-output to overwrite, or choose a fresh --output-dir to keep prior results.",
                FEATURES_FILE,
                path.display(),
                old_hash,
                new_hash
            ));
        }
        warn!(
            existing_hash = %old_hash,
            new_hash = %new_hash,
            path = %path.display(),
            "Feature table hash mismatch; overwriting because ack_new_output=true"
        );
    }

    let mut file =
        File::create(path).with_context(|| format!("Unable to create {}", path.display()))?;
    file.write_all(rendered)
        .with_context(|| format!("Unable to write {}", path.display()))?;
    info!(path = %path.display(), sha256 = %new_hash, "Feature table written");
    Ok(())
}

fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)
        .with_context(|| format!("Unable to open {} for hashing", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Writer that hashes every byte on its way to `inner`.
struct HashingWriter<W: Write> {
    inner: W,
    hasher: Sha256,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
        }
    }

    fn finish(self) -> (W, String) {
        (self.inner, hex::encode(self.hasher.finalize()))
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.hasher.update(&buf[..written]);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candlefeat_rs::{Mode, SourceConfig, WindowWidths, run_pipeline};
    use tempfile::tempdir;

    const CANDLES: &str = "\
2024.03.01,09:00,100.0,101.0,99.0,100.5,10
2024.03.01,09:05,100.5,102.0,100.0,101.5,12
2024.03.01,09:10,101.5,101.8,100.2,100.4,9
2024.03.01,09:15,100.4,100.9,99.7,99.9,14
2024.03.01,09:20,99.9,101.1,99.8,100.8,11
2024.03.01,09:25,100.8,101.6,100.1,101.2,8
";

    fn prepared(dir: &Path, mode: Mode) -> (FeatureSet, PipelineConfig) {
        let csv = dir.join("prices.csv");
        fs::write(&csv, CANDLES).unwrap();
        let mut config = PipelineConfig::new(SourceConfig::new(&csv));
        config.features.window_widths = WindowWidths::new([2]).unwrap();
        config.features.mode = mode;
        (run_pipeline(&config).unwrap(), config)
    }

    #[test]
    fn hashing_writer_matches_file_hash() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("blob.txt");
        let mut writer = HashingWriter::new(Vec::new());
        writer.write_all(b"timestamp,U_D\n").unwrap();
        let (bytes, hash) = writer.finish();
        fs::write(&path, bytes).unwrap();
        assert_eq!(sha256_file(&path).unwrap(), hash);
    }

    #[test]
    fn writes_features_labels_and_config() {
        let dir = tempdir().unwrap();
        let (set, config) = prepared(dir.path(), Mode::Train);
        let out = dir.path().join("out");
        let files = export_feature_set(&set, &config, &out, ExportOptions::default()).unwrap();

        let features = fs::read_to_string(&files.features).unwrap();
        let header = features.lines().next().unwrap();
        assert!(header.starts_with("timestamp,volume,U_D,"), "{header}");
        assert!(features.contains("2024-03-01 09:10:00"));
        assert_eq!(features.lines().count(), set.height() + 1);

        let labels = fs::read_to_string(files.labels.unwrap()).unwrap();
        assert_eq!(labels.lines().next(), Some("timestamp,y"));

        let record: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&files.run_config).unwrap()).unwrap();
        assert_eq!(record["rows"], set.height());
        assert_eq!(record["config"]["features"]["mode"], "train");
        assert_eq!(record["features_sha256"], files.features_sha256.as_str());
        assert_eq!(
            record["engineered_columns"],
            serde_json::json!([
                "U_D",
                "up_shadow",
                "lo_shadow",
                "body",
                "range",
                "price_change",
                "sma_2_change"
            ])
        );
    }

    #[test]
    fn changed_features_require_acknowledgement() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("out");
        let (train, train_config) = prepared(dir.path(), Mode::Train);
        export_feature_set(&train, &train_config, &out, ExportOptions::default()).unwrap();

        // Same run again is a no-op on features.csv.
        export_feature_set(&train, &train_config, &out, ExportOptions::default()).unwrap();

        let (predict, predict_config) = prepared(dir.path(), Mode::Predict);
        let err = export_feature_set(&predict, &predict_config, &out, ExportOptions::default())
            .unwrap_err();
        assert!(err.to_string().contains("--ack-new-output"), "{err}");

        let files = export_feature_set(
            &predict,
            &predict_config,
            &out,
            ExportOptions {
                ack_new_output: true,
            },
        )
        .unwrap();
        assert!(files.labels.is_none());
        assert!(!out.join(LABELS_FILE).exists());
        assert_eq!(sha256_file(&files.features).unwrap(), files.features_sha256);
    }
}
