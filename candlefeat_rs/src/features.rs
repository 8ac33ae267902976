use polars::prelude::*;
use tracing::{debug, info};

use crate::aligned::AlignedSeries;
use crate::config::WindowWidths;
use crate::data::{PriceTable, aligned_float};
use crate::error::{FeatureError, Result};
use crate::index::RowIndex;

pub const UP_DOWN_COLUMN: &str = "U_D";
pub const PRICE_COLUMN: &str = "price";

/// Row-local features, in the order they are attached.
pub const CANDLE_FEATURES: &[&str] = &[
    UP_DOWN_COLUMN,
    "up_shadow",
    "lo_shadow",
    "body",
    "range",
    PRICE_COLUMN,
    "price_change",
];

pub fn sma_column(width: usize) -> String {
    format!("sma_{width}")
}

pub fn sma_change_column(width: usize) -> String {
    format!("sma_{width}_change")
}

/// Engineered columns that survive finalization for `widths`, in order.
/// Raw input columns that are not dropped (such as `volume`) come first in
/// the final table and are not listed here.
pub fn feature_columns(widths: &WindowWidths) -> Vec<String> {
    CANDLE_FEATURES
        .iter()
        .filter(|name| **name != PRICE_COLUMN)
        .map(|name| name.to_string())
        .chain(widths.iter().map(sma_change_column))
        .collect()
}

/// A price table with its derived feature columns attached.
#[derive(Debug, Clone)]
pub struct FeatureTable {
    index: RowIndex,
    frame: DataFrame,
    window_widths: WindowWidths,
}

impl FeatureTable {
    pub(crate) fn new(index: RowIndex, frame: DataFrame, window_widths: WindowWidths) -> Result<Self> {
        if index.len() != frame.height() {
            return Err(FeatureError::DataFormat(format!(
                "index has {} keys but the feature table has {} rows",
                index.len(),
                frame.height()
            )));
        }
        Ok(Self {
            index,
            frame,
            window_widths,
        })
    }

    pub fn index(&self) -> &RowIndex {
        &self.index
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn window_widths(&self) -> &WindowWidths {
        &self.window_widths
    }

    pub fn height(&self) -> usize {
        self.frame.height()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.height() == 0
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

    pub fn float_column(&self, name: &str) -> Result<AlignedSeries<f64>> {
        aligned_float(&self.frame, &self.index, name)
    }

    pub fn int_column(&self, name: &str) -> Result<AlignedSeries<i32>> {
        let series = self
            .frame
            .column(name)
            .map_err(|_| FeatureError::MissingColumn(name.to_string()))?
            .cast(&DataType::Int32)?;
        let values = series.i32()?.into_iter().collect();
        AlignedSeries::new(name, self.index.clone(), values)
    }

    pub(crate) fn into_parts(self) -> (RowIndex, DataFrame, WindowWidths) {
        (self.index, self.frame, self.window_widths)
    }
}

#[derive(Clone, Copy, Debug)]
struct Candle {
    open: f64,
    high: f64,
    low: f64,
    close: f64,
}

impl Candle {
    fn is_down(&self) -> bool {
        self.open > self.close
    }

    fn median(&self) -> f64 {
        let mut values = [self.open, self.close, self.high, self.low];
        values.sort_by(f64::total_cmp);
        (values[1] + values[2]) / 2.0
    }
}

struct PriceSeries {
    index: RowIndex,
    open: AlignedSeries<f64>,
    high: AlignedSeries<f64>,
    low: AlignedSeries<f64>,
    close: AlignedSeries<f64>,
}

impl PriceSeries {
    fn from_table(table: &PriceTable) -> Result<Self> {
        Ok(Self {
            index: table.index().clone(),
            open: table.float_column("open")?,
            high: table.float_column("high")?,
            low: table.float_column("low")?,
            close: table.float_column("close")?,
        })
    }

    fn candle(&self, row: usize) -> Option<Candle> {
        Some(Candle {
            open: self.open.get(row)?,
            high: self.high.get(row)?,
            low: self.low.get(row)?,
            close: self.close.get(row)?,
        })
    }

    fn per_candle<T: Copy>(&self, name: &str, f: impl Fn(Candle) -> T) -> AlignedSeries<T> {
        AlignedSeries::from_fn(name, &self.index, |row| self.candle(row).map(&f))
    }

    /// Row-local feature that also depends on the candle direction.
    fn per_directed_candle(
        &self,
        name: &str,
        up_down: &AlignedSeries<i32>,
        f: impl Fn(Candle, bool) -> f64,
    ) -> Result<AlignedSeries<f64>> {
        if up_down.index() != &self.index {
            return Err(FeatureError::Misaligned {
                left: up_down.name().to_string(),
                right: "open/high/low/close".to_string(),
            });
        }
        Ok(AlignedSeries::from_fn(name, &self.index, |row| {
            let candle = self.candle(row)?;
            let down = up_down.get(row)? == 1;
            Some(f(candle, down))
        }))
    }
}

/// Derive the feature columns for `table`.
///
/// The input is left untouched: the result is built on a copy of its frame,
/// so extracting again with other widths starts from the same raw rows.
/// The intermediate `sma_{w}` columns only exist to produce
/// `sma_{w}_change` and are not attached.
pub fn extract(table: &PriceTable, window_widths: &WindowWidths) -> Result<FeatureTable> {
    let prices = PriceSeries::from_table(table)?;

    let up_down = up_or_down(&prices);
    let up_shadow = up_shadow(&prices, &up_down)?;
    let lo_shadow = lo_shadow(&prices, &up_down)?;
    let body = body(&prices, &up_down)?;
    let range = candle_range(&prices)?;
    let price = median_price(&prices);
    let price_change = price_change(&price);
    let sma_changes = sma_change(&make_sma(&price, window_widths));

    let mut frame = table.frame().clone();
    frame.with_column(up_down.into_series())?;
    for series in [up_shadow, lo_shadow, body, range, price, price_change]
        .into_iter()
        .chain(sma_changes)
    {
        debug!(
            column = series.name(),
            defined = series.values().iter().filter(|v| v.is_some()).count(),
            "Attaching feature column"
        );
        frame.with_column(series.into_series())?;
    }

    info!(
        rows = frame.height(),
        columns = frame.width(),
        window_widths = %window_widths,
        "Extracted candle features"
    );
    FeatureTable::new(table.index().clone(), frame, window_widths.clone())
}

/// 1 when the candle closed below its open, else 0.
fn up_or_down(prices: &PriceSeries) -> AlignedSeries<i32> {
    prices.per_candle(UP_DOWN_COLUMN, |candle| i32::from(candle.is_down()))
}

/// Negated distance from the high to the close of a down candle, or to the
/// open of any other candle.
fn up_shadow(prices: &PriceSeries, up_down: &AlignedSeries<i32>) -> Result<AlignedSeries<f64>> {
    prices.per_directed_candle("up_shadow", up_down, |candle, down| {
        if down {
            -(candle.high - candle.close)
        } else {
            -(candle.high - candle.open)
        }
    })
}

fn lo_shadow(prices: &PriceSeries, up_down: &AlignedSeries<i32>) -> Result<AlignedSeries<f64>> {
    prices.per_directed_candle("lo_shadow", up_down, |candle, down| {
        if down {
            candle.open - candle.low
        } else {
            candle.close - candle.low
        }
    })
}

// Both directions yield close - open.
fn body(prices: &PriceSeries, up_down: &AlignedSeries<i32>) -> Result<AlignedSeries<f64>> {
    prices.per_directed_candle("body", up_down, |candle, _| candle.close - candle.open)
}

fn candle_range(prices: &PriceSeries) -> Result<AlignedSeries<f64>> {
    prices.high.zip_with(&prices.low, "range", |high, low| high - low)
}

fn median_price(prices: &PriceSeries) -> AlignedSeries<f64> {
    prices.per_candle(PRICE_COLUMN, |candle| candle.median())
}

fn price_change(price: &AlignedSeries<f64>) -> AlignedSeries<f64> {
    price.diff("price_change")
}

/// Trailing simple moving averages of `price`, one per width, named `sma_{w}`.
pub fn make_sma(price: &AlignedSeries<f64>, window_widths: &WindowWidths) -> Vec<AlignedSeries<f64>> {
    window_widths
        .iter()
        .map(|width| price.rolling_mean(width, sma_column(width)))
        .collect()
}

/// Row-over-row change of each SMA, named `{sma}_change`.
pub fn sma_change(smas: &[AlignedSeries<f64>]) -> Vec<AlignedSeries<f64>> {
    smas.iter()
        .map(|sma| sma.diff(format!("{}_change", sma.name())))
        .collect()
}
