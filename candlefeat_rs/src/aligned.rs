//! Values paired with the row index they belong to.
//!
//! Shifts, rolling windows, and element-wise arithmetic all go through
//! [`AlignedSeries`], so an operation between two series either runs on the
//! same row keys or fails with [`FeatureError::Misaligned`].

use polars::prelude::*;

use crate::error::{FeatureError, Result};
use crate::index::{IndexKey, RowIndex};

/// A named column of optional values aligned with a [`RowIndex`]. `None`
/// marks an undefined value.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedSeries<T> {
    name: String,
    index: RowIndex,
    values: Vec<Option<T>>,
}

impl<T: Copy> AlignedSeries<T> {
    pub fn new(name: impl Into<String>, index: RowIndex, values: Vec<Option<T>>) -> Result<Self> {
        let name = name.into();
        if values.len() != index.len() {
            return Err(FeatureError::DataFormat(format!(
                "series '{name}' has {} values for an index of {} rows",
                values.len(),
                index.len()
            )));
        }
        Ok(Self {
            name,
            index,
            values,
        })
    }

    /// Build a series row by row over `index`.
    pub fn from_fn(
        name: impl Into<String>,
        index: &RowIndex,
        f: impl FnMut(usize) -> Option<T>,
    ) -> Self {
        Self {
            name: name.into(),
            index: index.clone(),
            values: (0..index.len()).map(f).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rename(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn index(&self) -> &RowIndex {
        &self.index
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[Option<T>] {
        &self.values
    }

    pub fn get(&self, row: usize) -> Option<T> {
        self.values.get(row).copied().flatten()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&IndexKey, Option<T>)> + '_ {
        self.index.keys().iter().zip(self.values.iter().copied())
    }

    pub fn defined_mask(&self) -> Vec<bool> {
        self.values.iter().map(Option::is_some).collect()
    }

    /// Move values by `periods` rows: positive lags (row `i` takes row
    /// `i - periods`), negative leads. Rows shifted in from outside the
    /// table are undefined.
    pub fn shift(&self, periods: isize) -> Self {
        let len = self.values.len() as isize;
        let values = (0..len)
            .map(|row| {
                let source = row - periods;
                if (0..len).contains(&source) {
                    self.values[source as usize]
                } else {
                    None
                }
            })
            .collect();
        Self {
            name: self.name.clone(),
            index: self.index.clone(),
            values,
        }
    }

    pub fn map<U: Copy>(&self, name: impl Into<String>, f: impl Fn(T) -> U) -> AlignedSeries<U> {
        AlignedSeries {
            name: name.into(),
            index: self.index.clone(),
            values: self.values.iter().map(|value| value.map(&f)).collect(),
        }
    }

    /// Combine two series row by row; undefined on either side stays undefined.
    pub fn zip_with<U: Copy, R: Copy>(
        &self,
        other: &AlignedSeries<U>,
        name: impl Into<String>,
        f: impl Fn(T, U) -> R,
    ) -> Result<AlignedSeries<R>> {
        if self.index != other.index {
            return Err(FeatureError::Misaligned {
                left: self.name.clone(),
                right: other.name.clone(),
            });
        }
        Ok(AlignedSeries {
            name: name.into(),
            index: self.index.clone(),
            values: self
                .values
                .iter()
                .zip(other.values.iter())
                .map(|(left, right)| match (left, right) {
                    (Some(l), Some(r)) => Some(f(*l, *r)),
                    _ => None,
                })
                .collect(),
        })
    }

    /// Keep the rows whose mask entry is true, index included.
    pub fn filter(&self, mask: &[bool]) -> Self {
        Self {
            name: self.name.clone(),
            index: self.index.filter(mask),
            values: self
                .values
                .iter()
                .zip(mask.iter())
                .filter(|(_, keep)| **keep)
                .map(|(value, _)| *value)
                .collect(),
        }
    }

    /// Reattach the values to another index of the same length and keys.
    pub(crate) fn realign(mut self, index: &RowIndex) -> Result<Self> {
        if &self.index != index {
            return Err(FeatureError::Misaligned {
                left: self.name,
                right: "table index".to_string(),
            });
        }
        self.index = index.clone();
        Ok(self)
    }
}

impl AlignedSeries<f64> {
    /// Trailing mean over exactly `window` rows ending at each row.
    ///
    /// The first `window - 1` rows, and any row whose window holds an
    /// undefined value, are undefined.
    pub fn rolling_mean(&self, window: usize, name: impl Into<String>) -> Self {
        let values = (0..self.values.len())
            .map(|row| {
                if window == 0 || row + 1 < window {
                    return None;
                }
                self.values[row + 1 - window..=row]
                    .iter()
                    .try_fold(0.0, |sum, value| value.map(|v| sum + v))
                    .map(|sum| sum / window as f64)
            })
            .collect();
        Self {
            name: name.into(),
            index: self.index.clone(),
            values,
        }
    }

    /// `self[i] - self[i - 1]`; undefined at the first row.
    pub fn diff(&self, name: impl Into<String>) -> Self {
        let previous = self.shift(1);
        let values = self
            .values
            .iter()
            .zip(previous.values.iter())
            .map(|(current, prev)| match (current, prev) {
                (Some(c), Some(p)) => Some(c - p),
                _ => None,
            })
            .collect();
        Self {
            name: name.into(),
            index: self.index.clone(),
            values,
        }
    }

    pub fn into_series(self) -> Series {
        Series::new(&self.name, self.values)
    }
}

impl AlignedSeries<i32> {
    pub fn into_series(self) -> Series {
        Series::new(&self.name, self.values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(values: &[Option<f64>]) -> AlignedSeries<f64> {
        AlignedSeries::new("x", RowIndex::positional(values.len()), values.to_vec()).unwrap()
    }

    #[test]
    fn shift_lags_and_leads() {
        let x = series(&[Some(1.0), Some(2.0), Some(3.0)]);
        assert_eq!(x.shift(1).values(), &[None, Some(1.0), Some(2.0)]);
        assert_eq!(x.shift(-1).values(), &[Some(2.0), Some(3.0), None]);
        assert_eq!(x.shift(5).values(), &[None, None, None]);
        assert_eq!(x.shift(0).values(), x.values());
    }

    #[test]
    fn rolling_mean_needs_a_full_window() {
        let x = series(&[Some(1.0), Some(2.0), Some(3.0), Some(6.0)]);
        let sma = x.rolling_mean(3, "sma_3");
        assert_eq!(sma.name(), "sma_3");
        assert_eq!(sma.values(), &[None, None, Some(2.0), Some(11.0 / 3.0)]);
        assert!(x.rolling_mean(5, "sma_5").values().iter().all(Option::is_none));
    }

    #[test]
    fn rolling_mean_propagates_gaps() {
        let x = series(&[Some(1.0), None, Some(3.0), Some(5.0), Some(7.0)]);
        let sma = x.rolling_mean(2, "sma_2");
        assert_eq!(sma.values(), &[None, None, None, Some(4.0), Some(6.0)]);
    }

    #[test]
    fn diff_is_undefined_at_the_boundary() {
        let x = series(&[Some(1.0), Some(4.0), None, Some(2.0)]);
        assert_eq!(x.diff("d").values(), &[None, Some(3.0), None, None]);
    }

    #[test]
    fn zip_with_refuses_different_indexes() {
        let left = series(&[Some(1.0), Some(2.0)]);
        let right = AlignedSeries::new(
            "y",
            RowIndex::from_keys([IndexKey::Label("a".into()), IndexKey::Label("b".into())]),
            vec![Some(1.0), Some(1.0)],
        )
        .unwrap();
        assert!(matches!(
            left.zip_with(&right, "z", |a, b| a + b),
            Err(FeatureError::Misaligned { .. })
        ));

        let same = series(&[Some(3.0), None]);
        let summed = left.zip_with(&same, "z", |a, b| a + b).unwrap();
        assert_eq!(summed.values(), &[Some(4.0), None]);
    }

    #[test]
    fn filter_keeps_keys_with_values() {
        let x = series(&[Some(1.0), None, Some(3.0)]);
        let kept = x.filter(&x.defined_mask());
        assert_eq!(kept.values(), &[Some(1.0), Some(3.0)]);
        assert_eq!(
            kept.index().keys(),
            &[IndexKey::Position(0), IndexKey::Position(2)]
        );
    }

    #[test]
    fn new_rejects_length_mismatch() {
        assert!(AlignedSeries::<f64>::new("x", RowIndex::positional(2), vec![Some(1.0)]).is_err());
    }
}
