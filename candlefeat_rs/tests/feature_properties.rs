use candlefeat_rs::features::{PRICE_COLUMN, make_sma};
use candlefeat_rs::{
    AlignedSeries, IndexKey, Mode, PriceTable, RowIndex, WindowWidths, extract, finalize,
};
use polars::prelude::*;
use proptest::prelude::*;

#[derive(Clone, Debug)]
struct Bar {
    open: f64,
    high: f64,
    low: f64,
    close: f64,
}

/// Bars that respect low <= min(open, close) and high >= max(open, close).
fn valid_bar() -> impl Strategy<Value = Bar> {
    (50.0f64..150.0, -2.0f64..2.0, 0.0f64..1.5, 0.0f64..1.5).prop_map(
        |(open, move_by, wick_up, wick_down)| {
            let close = open + move_by;
            Bar {
                open,
                high: open.max(close) + wick_up,
                low: open.min(close) - wick_down,
                close,
            }
        },
    )
}

fn candles(max_len: usize) -> impl Strategy<Value = Vec<Bar>> {
    prop::collection::vec(valid_bar(), 0..=max_len)
}

fn table(bars: &[Bar]) -> PriceTable {
    let frame = DataFrame::new(vec![
        Series::new("open", bars.iter().map(|b| b.open).collect::<Vec<_>>()),
        Series::new("high", bars.iter().map(|b| b.high).collect::<Vec<_>>()),
        Series::new("low", bars.iter().map(|b| b.low).collect::<Vec<_>>()),
        Series::new("close", bars.iter().map(|b| b.close).collect::<Vec<_>>()),
        Series::new("volume", vec![1.0; bars.len()]),
    ])
    .unwrap();
    PriceTable::new(RowIndex::positional(bars.len()), frame).unwrap()
}

fn position(key: &IndexKey) -> usize {
    match key {
        IndexKey::Position(row) => *row,
        other => panic!("expected positional key, got {other:?}"),
    }
}

proptest! {
    #[test]
    fn sma_is_the_trailing_mean(prices in prop::collection::vec(1.0f64..100.0, 0..40), width in 1i64..12) {
        let index = RowIndex::positional(prices.len());
        let price = AlignedSeries::new(PRICE_COLUMN, index, prices.iter().copied().map(Some).collect()).unwrap();
        let widths = WindowWidths::new([width]).unwrap();
        let sma = make_sma(&price, &widths).remove(0);
        let w = width as usize;

        prop_assert_eq!(sma.name(), format!("sma_{w}"));
        for row in 0..prices.len() {
            match sma.get(row) {
                None => prop_assert!(row + 1 < w),
                Some(value) => {
                    prop_assert!(row + 1 >= w);
                    let expected = prices[row + 1 - w..=row].iter().sum::<f64>() / w as f64;
                    prop_assert!((value - expected).abs() < 1e-9);
                }
            }
        }
    }

    #[test]
    fn row_local_features_match_their_definitions(bars in candles(30)) {
        let features = extract(&table(&bars), &WindowWidths::default()).unwrap();
        let up_down = features.int_column("U_D").unwrap();
        let range = features.float_column("range").unwrap();
        let price = features.float_column("price").unwrap();
        let price_change = features.float_column("price_change").unwrap();

        for (row, bar) in bars.iter().enumerate() {
            prop_assert_eq!(up_down.get(row), Some(i32::from(bar.open > bar.close)));
            let r = range.get(row).unwrap();
            prop_assert_eq!(r, bar.high - bar.low);
            prop_assert!(r >= 0.0);
            if row == 0 {
                prop_assert_eq!(price_change.get(row), None);
            } else {
                let expected = price.get(row).unwrap() - price.get(row - 1).unwrap();
                prop_assert_eq!(price_change.get(row), Some(expected));
            }
        }
    }

    #[test]
    fn train_labels_stay_aligned_after_pruning(bars in candles(40), widths in prop::collection::vec(1i64..8, 0..3)) {
        let widths = WindowWidths::new(widths).unwrap();
        let extracted = extract(&table(&bars), &widths).unwrap();
        let before = extracted.int_column("U_D").unwrap();
        let set = finalize(extracted, Mode::Train).unwrap();
        let labels = set.labels.clone().unwrap();

        prop_assert_eq!(labels.index(), set.features.index());
        prop_assert_eq!(labels.len(), set.height());
        let longest = widths.iter().max().unwrap_or(1);
        // Warmup: price_change needs one prior row, sma_{w}_change needs w.
        let first_row = longest.max(1);
        let expected_rows = bars.len().saturating_sub(first_row + 1);
        prop_assert_eq!(set.height(), expected_rows);
        for (key, label) in labels.iter() {
            let row = position(key);
            prop_assert!(label.is_some());
            prop_assert_eq!(label, before.get(row + 1));
        }
    }

    #[test]
    fn extraction_is_idempotent(bars in candles(25), widths in prop::collection::vec(1i64..6, 0..4)) {
        let widths = WindowWidths::new(widths).unwrap();
        let source = table(&bars);
        let first = extract(&source, &widths).unwrap();
        let second = extract(&source, &widths).unwrap();
        prop_assert!(first.frame().equals_missing(second.frame()));
    }
}
