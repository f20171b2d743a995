use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Symbol, Timeframe, UtcDateTime, ValidationError};

/// OHLCV bar. Symbol and timeframe are carried by the enclosing series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bar {
    pub ts: UtcDateTime,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Bar {
    pub fn new(
        ts: UtcDateTime,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
    ) -> Result<Self, ValidationError> {
        validate_non_negative("open", open)?;
        validate_non_negative("high", high)?;
        validate_non_negative("low", low)?;
        validate_non_negative("close", close)?;
        validate_non_negative("volume", volume)?;

        if high < low {
            return Err(ValidationError::InvalidBarRange);
        }

        if open < low || open > high || close < low || close > high {
            return Err(ValidationError::InvalidBarBounds);
        }

        Ok(Self {
            ts,
            open,
            high,
            low,
            close,
            volume,
        })
    }
}

/// Bars for one symbol and timeframe.
///
/// Series built through [`BarSeries::new`] are sorted ascending with unique
/// timestamps; sources may hand back unordered data and rely on that.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarSeries {
    pub symbol: Symbol,
    pub timeframe: Timeframe,
    pub bars: Vec<Bar>,
}

impl BarSeries {
    /// Build a series, sorting by timestamp and keeping the first bar seen
    /// for each timestamp.
    pub fn new(symbol: Symbol, timeframe: Timeframe, bars: Vec<Bar>) -> Self {
        let mut series = Self {
            symbol,
            timeframe,
            bars,
        };
        series.normalize();
        series
    }

    pub fn empty(symbol: Symbol, timeframe: Timeframe) -> Self {
        Self::new(symbol, timeframe, Vec::new())
    }

    fn normalize(&mut self) {
        // stable sort keeps the first occurrence of a duplicate in front
        self.bars.sort_by_key(|bar| bar.ts);
        self.bars.dedup_by_key(|bar| bar.ts);
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn first_ts(&self) -> Option<UtcDateTime> {
        self.bars.first().map(|bar| bar.ts)
    }

    pub fn last_ts(&self) -> Option<UtcDateTime> {
        self.bars.last().map(|bar| bar.ts)
    }

    /// Bars with `start <= ts <= end`.
    pub fn filter_range(&self, start: UtcDateTime, end: UtcDateTime) -> Self {
        Self {
            symbol: self.symbol.clone(),
            timeframe: self.timeframe,
            bars: self
                .bars
                .iter()
                .filter(|bar| bar.ts >= start && bar.ts <= end)
                .cloned()
                .collect(),
        }
    }

    /// Bars with `ts >= since`.
    pub fn tail_since(&self, since: UtcDateTime) -> Self {
        Self {
            symbol: self.symbol.clone(),
            timeframe: self.timeframe,
            bars: self.bars.iter().filter(|bar| bar.ts >= since).cloned().collect(),
        }
    }

    /// Merge `other` into this series; bars already present win.
    pub fn merge(&mut self, other: Self) {
        self.bars.extend(other.bars);
        self.normalize();
    }
}

fn validate_non_negative(field: &'static str, value: Decimal) -> Result<(), ValidationError> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(ValidationError::NegativeValue { field });
    }
    Ok(())
}
