pub mod aligned;
pub mod config;
pub mod data;
pub mod error;
pub mod features;
pub mod finalize;
pub mod index;
pub mod pipeline;

pub use aligned::AlignedSeries;
pub use config::{
    FeatureConfig, HeaderSpec, IndexColumn, Mode, PipelineConfig, SourceConfig, WindowWidths,
};
pub use data::{PriceTable, load_price_table};
pub use error::{FeatureError, Result};
pub use features::{FeatureTable, extract};
pub use finalize::{FeatureSet, finalize};
pub use index::{IndexKey, RowIndex, build_index};
pub use pipeline::{FeaturePipeline, run_pipeline};
