//! External market-data fetcher contract
//!
//! The exchange client itself lives outside this crate; the data layer
//! only needs two read-only operations, supplied through
//! [`MarketDataSource`]. Fetches are plain blocking calls; a failure
//! propagates to the caller, there is no retry policy.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::db::Record;
use crate::error::Result;

/// Candle time-bucket size understood by the exchange API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Granularity {
    OneMinute,
    FiveMinutes,
    FifteenMinutes,
    ThirtyMinutes,
    OneHour,
    TwoHour,
    SixHour,
    OneDay,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::OneMinute => "ONE_MINUTE",
            Granularity::FiveMinutes => "FIVE_MINUTES",
            Granularity::FifteenMinutes => "FIFTEEN_MINUTES",
            Granularity::ThirtyMinutes => "THIRTY_MINUTES",
            Granularity::OneHour => "ONE_HOUR",
            Granularity::TwoHour => "TWO_HOUR",
            Granularity::SixHour => "SIX_HOUR",
            Granularity::OneDay => "ONE_DAY",
        }
    }

    /// Bucket width in seconds
    pub fn seconds(&self) -> i64 {
        match self {
            Granularity::OneMinute => 60,
            Granularity::FiveMinutes => 5 * 60,
            Granularity::FifteenMinutes => 15 * 60,
            Granularity::ThirtyMinutes => 30 * 60,
            Granularity::OneHour => 60 * 60,
            Granularity::TwoHour => 2 * 60 * 60,
            Granularity::SixHour => 6 * 60 * 60,
            Granularity::OneDay => 24 * 60 * 60,
        }
    }

    /// Number of buckets covering `[start, end]`, both ends included.
    /// Used to size fetch windows and to decide whether a cached range
    /// is complete.
    pub fn expected_count(&self, start: NaiveDateTime, end: NaiveDateTime) -> i64 {
        if end < start {
            return 0;
        }
        (end - start).num_seconds() / self.seconds() + 1
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Read-only view of an exchange's historical data, used as the
/// cache-miss fallback behind the candle tables.
///
/// Returned records carry the raw API field sets:
/// candles `{start, open, high, low, close, volume, trading_pair}`,
/// trades `{trade_id, product_id, price, size, time, side, bid?, ask?,
/// exchange?}`. Values may arrive as text; the typed models coerce them.
pub trait MarketDataSource {
    fn fetch_candles(
        &self,
        trading_pair: &str,
        granularity: Granularity,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Record>>;

    fn fetch_trades(
        &self,
        trading_pair: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Record>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn dt(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    #[test]
    fn expected_count_is_inclusive() {
        let start = dt(2024, 12, 1, 0, 0);
        assert_eq!(Granularity::OneDay.expected_count(start, dt(2024, 12, 1, 0, 0)), 1);
        assert_eq!(Granularity::OneDay.expected_count(start, dt(2024, 12, 3, 0, 0)), 3);
        assert_eq!(
            Granularity::OneMinute.expected_count(start, dt(2024, 12, 1, 1, 30)),
            91
        );
        assert_eq!(Granularity::OneDay.expected_count(dt(2024, 12, 3, 0, 0), start), 0);
    }

    #[test]
    fn granularity_labels() {
        assert_eq!(Granularity::OneMinute.as_str(), "ONE_MINUTE");
        assert_eq!(Granularity::OneDay.to_string(), "ONE_DAY");
        assert_eq!(Granularity::SixHour.seconds(), 21600);
    }
}
