use tracing::info;

use crate::config::{Mode, PipelineConfig, SourceConfig, WindowWidths};
use crate::data::{PriceTable, load_price_table};
use crate::error::{FeatureError, Result};
use crate::features::extract;
use crate::finalize::{FeatureSet, finalize};
use crate::index::build_index;

/// Loaded price data plus the stage methods that turn it into features.
///
/// The loaded table is only replaced by [`FeaturePipeline::read_data`] and
/// [`FeaturePipeline::set_datetime_index`]. Feature extraction never writes
/// back into it, so `make_features` can run repeatedly with different
/// settings on one load. An instance is not meant to be shared across
/// threads without external locking.
#[derive(Debug, Clone)]
pub struct FeaturePipeline {
    source: SourceConfig,
    prices: Option<PriceTable>,
}

impl FeaturePipeline {
    pub fn new(source: SourceConfig) -> Self {
        Self {
            source,
            prices: None,
        }
    }

    pub fn source(&self) -> &SourceConfig {
        &self.source
    }

    pub fn prices(&self) -> Option<&PriceTable> {
        self.prices.as_ref()
    }

    /// Read the configured source, replacing any previously loaded table.
    pub fn read_data(&mut self) -> Result<&PriceTable> {
        let table = load_price_table(&self.source)?;
        Ok(&*self.prices.insert(table))
    }

    /// Replace the positional index with `date time` timestamps.
    ///
    /// On failure the previously loaded table is kept as it was.
    pub fn set_datetime_index(&mut self) -> Result<&PriceTable> {
        let loaded = self.prices.clone().ok_or(FeatureError::NotLoaded)?;
        let indexed = build_index(loaded)?;
        Ok(&*self.prices.insert(indexed))
    }

    pub fn make_features(&self, window_widths: &WindowWidths, mode: Mode) -> Result<FeatureSet> {
        let prices = self.prices.as_ref().ok_or(FeatureError::NotLoaded)?;
        let features = extract(prices, window_widths)?;
        finalize(features, mode)
    }
}

/// Run load, index, extract, and finalize for `config`.
pub fn run_pipeline(config: &PipelineConfig) -> Result<FeatureSet> {
    let mut pipeline = FeaturePipeline::new(config.source.clone());
    pipeline.read_data()?;
    pipeline.set_datetime_index()?;
    let set = pipeline.make_features(&config.features.window_widths, config.features.mode)?;
    info!(
        rows = set.height(),
        mode = ?set.mode,
        window_widths = %set.features.window_widths(),
        path = %pipeline.source().data.display(),
        "Feature pipeline finished"
    );
    Ok(set)
}
