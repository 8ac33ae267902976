use polars::prelude::*;
use tracing::{info, warn};

use crate::aligned::AlignedSeries;
use crate::config::Mode;
use crate::error::Result;
use crate::features::{FeatureTable, UP_DOWN_COLUMN};

/// Raw price levels removed from the final table; only engineered columns
/// (and pass-through inputs such as `volume`) remain.
pub const RAW_PRICE_COLUMNS: &[&str] = &["price", "high", "low", "open", "close"];

pub const LABEL_COLUMN: &str = "y";

/// Model-ready output of the pipeline.
#[derive(Debug, Clone)]
pub struct FeatureSet {
    pub features: FeatureTable,
    /// Next-bar direction, aligned row for row with `features`. Only present
    /// in train mode.
    pub labels: Option<AlignedSeries<i32>>,
    pub mode: Mode,
}

impl FeatureSet {
    pub fn height(&self) -> usize {
        self.features.height()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// `U_D` of the following row; undefined for the last row.
pub fn next_bar_label(table: &FeatureTable) -> Result<AlignedSeries<i32>> {
    Ok(table
        .int_column(UP_DOWN_COLUMN)?
        .shift(-1)
        .rename(LABEL_COLUMN))
}

/// Turn an extracted feature table into the final feature set.
///
/// In train mode the next-bar label is attached first, so the NaN-drop pass
/// removes both the warmup rows and the trailing row without a label. An
/// empty result is valid output.
pub fn finalize(table: FeatureTable, mode: Mode) -> Result<FeatureSet> {
    let labels = if mode.builds_labels() {
        Some(next_bar_label(&table)?)
    } else {
        None
    };

    let mut keep = defined_rows(table.frame())?;
    if let Some(labels) = &labels {
        for (flag, defined) in keep.iter_mut().zip(labels.defined_mask()) {
            *flag &= defined;
        }
    }
    let dropped = keep.iter().filter(|flag| !**flag).count();

    let (index, frame, window_widths) = table.into_parts();
    let mask = BooleanChunked::from_slice("keep", &keep);
    let mut frame = frame.filter(&mask)?;
    let index = index.filter(&keep);
    for name in RAW_PRICE_COLUMNS {
        if frame.column(name).is_ok() {
            frame = frame.drop(name)?;
        }
    }
    let labels = labels
        .map(|labels| labels.filter(&keep).realign(&index))
        .transpose()?;

    if frame.height() == 0 {
        warn!(
            dropped,
            window_widths = %window_widths,
            "No rows left after dropping undefined values; table is shorter than the feature warmup"
        );
    }
    info!(
        rows = frame.height(),
        dropped,
        columns = frame.width(),
        mode = ?mode,
        "Finalized feature table"
    );

    Ok(FeatureSet {
        features: FeatureTable::new(index, frame, window_widths)?,
        labels,
        mode,
    })
}

/// Rows where every column holds a defined value (not null, not NaN).
fn defined_rows(frame: &DataFrame) -> Result<Vec<bool>> {
    let mut keep = vec![true; frame.height()];
    for series in frame.get_columns() {
        let nulls = series.is_null();
        for (flag, null) in keep.iter_mut().zip(nulls.into_iter()) {
            *flag &= !null.unwrap_or(true);
        }
        if matches!(series.dtype(), DataType::Float32 | DataType::Float64) {
            let values = series.cast(&DataType::Float64)?;
            for (flag, value) in keep.iter_mut().zip(values.f64()?.into_iter()) {
                *flag &= value.is_some_and(|v| !v.is_nan());
            }
        }
    }
    Ok(keep)
}
