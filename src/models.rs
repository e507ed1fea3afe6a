//! Typed record models: predictions, candles and market trades
//!
//! Each model offers two constructors: `from_record` coerces and validates
//! a heterogeneous [`Record`] (store read, mirror replay or exchange API
//! payload), while `new` takes already-typed fields and skips string
//! coercion. Both enforce the domain invariants; a failed construction
//! returns an error and never leaks a half-built value.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::db::{Record, SqlValue};
use crate::error::{MyWowError, Result};

// Record field extraction. Absent fields are MissingData; present but
// unparseable fields are InvalidData.

fn req<'a>(record: &'a Record, field: &str) -> Result<&'a SqlValue> {
    match record.get(field) {
        None | Some(SqlValue::Null) => Err(MyWowError::MissingData(field.to_string())),
        Some(value) => Ok(value),
    }
}

fn req_text(record: &Record, field: &str) -> Result<String> {
    let value = req(record, field)?;
    match value {
        SqlValue::Text(s) => Ok(s.clone()),
        SqlValue::Int(i) => Ok(i.to_string()),
        _ => Err(MyWowError::InvalidData(format!(
            "{field}: expected text, got {value:?}"
        ))),
    }
}

fn req_f64(record: &Record, field: &str) -> Result<f64> {
    let value = req(record, field)?;
    match value {
        SqlValue::Real(r) => Ok(*r),
        SqlValue::Int(i) => Ok(*i as f64),
        SqlValue::Text(s) => s
            .parse::<f64>()
            .map_err(|_| MyWowError::InvalidData(format!("{field}: not a number: {s}"))),
        _ => Err(MyWowError::InvalidData(format!(
            "{field}: expected a number, got {value:?}"
        ))),
    }
}

fn req_i64(record: &Record, field: &str) -> Result<i64> {
    let value = req(record, field)?;
    match value {
        SqlValue::Int(i) => Ok(*i),
        SqlValue::Text(s) => s
            .parse::<i64>()
            .map_err(|_| MyWowError::InvalidData(format!("{field}: not an integer: {s}"))),
        _ => Err(MyWowError::InvalidData(format!(
            "{field}: expected an integer, got {value:?}"
        ))),
    }
}

fn req_date(record: &Record, field: &str) -> Result<NaiveDate> {
    let value = req(record, field)?;
    match value {
        SqlValue::Date(d) => Ok(*d),
        SqlValue::DateTime(dt) => Ok(dt.date()),
        SqlValue::Text(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map_err(|_| MyWowError::InvalidData(format!("{field}: not a date: {s}"))),
        _ => Err(MyWowError::InvalidData(format!(
            "{field}: expected a date, got {value:?}"
        ))),
    }
}

fn req_datetime(record: &Record, field: &str) -> Result<NaiveDateTime> {
    let value = req(record, field)?;
    match value {
        SqlValue::DateTime(dt) => Ok(*dt),
        SqlValue::Text(s) => NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
            .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%SZ"))
            .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
            .map_err(|_| MyWowError::InvalidData(format!("{field}: not a datetime: {s}"))),
        _ => Err(MyWowError::InvalidData(format!(
            "{field}: expected a datetime, got {value:?}"
        ))),
    }
}

fn opt_f64(record: &Record, field: &str, default: f64) -> Result<f64> {
    match record.get(field) {
        None | Some(SqlValue::Null) => Ok(default),
        Some(_) => req_f64(record, field),
    }
}

fn opt_text(record: &Record, field: &str, default: &str) -> String {
    match record.get(field) {
        Some(SqlValue::Text(s)) if !s.is_empty() => s.clone(),
        _ => default.to_string(),
    }
}

/// Check a carried id against the derived one; corrupt mirror or API data
/// shows up as a mismatch here.
fn check_carried_id(record: &Record, field: &str, derived: &str) -> Result<()> {
    if let Some(carried) = record.get(field).and_then(SqlValue::as_str) {
        if carried != derived {
            return Err(MyWowError::InvalidData(format!(
                "{field} mismatch: carried {carried}, derived {derived}"
            )));
        }
    }
    Ok(())
}

fn symbol_of(trading_pair: &str) -> String {
    trading_pair
        .split('-')
        .next()
        .unwrap_or(trading_pair)
        .to_string()
}

/// A user-entered price forecast over a date range. Exists only while
/// open; closing moves it to a [`PredictionResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub symbol: String,
    pub trading_pair: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub start_price: f64,
    pub end_price: f64,
    pub buy_price: f64,
    pub sell_price: f64,
}

impl Prediction {
    /// Typed constructor for internal callers; enforces the domain
    /// invariants without any string coercion.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: String,
        trading_pair: String,
        start_date: NaiveDate,
        end_date: NaiveDate,
        start_price: f64,
        end_price: f64,
        buy_price: f64,
        sell_price: f64,
    ) -> Result<Self> {
        let prediction = Prediction {
            symbol,
            trading_pair,
            start_date,
            end_date,
            start_price,
            end_price,
            buy_price,
            sell_price,
        };
        prediction.validate()?;
        Ok(prediction)
    }

    /// Coercing constructor for rows, mirror lines and API payloads
    pub fn from_record(record: &Record) -> Result<Self> {
        let prediction = Prediction::new(
            req_text(record, "symbol")?,
            req_text(record, "trading_pair")?,
            req_date(record, "start_date")?,
            req_date(record, "end_date")?,
            req_f64(record, "start_price")?,
            req_f64(record, "end_price")?,
            req_f64(record, "buy_price")?,
            req_f64(record, "sell_price")?,
        )?;
        check_carried_id(record, "prediction_id", &prediction.id())?;
        Ok(prediction)
    }

    fn validate(&self) -> Result<()> {
        if self.symbol.is_empty() || self.trading_pair.is_empty() {
            return Err(MyWowError::InvalidData(
                "symbol and trading_pair must not be empty".to_string(),
            ));
        }
        if self.end_date < self.start_date {
            return Err(MyWowError::InvalidData(format!(
                "end_date {} before start_date {}",
                self.end_date, self.start_date
            )));
        }
        if self.start_price <= 0.0 || self.end_price <= 0.0 {
            return Err(MyWowError::InvalidData(
                "start_price and end_price must be positive".to_string(),
            ));
        }
        if self.buy_price < 0.0 || self.sell_price < 0.0 {
            return Err(MyWowError::InvalidData(
                "buy_price and sell_price must not be negative".to_string(),
            ));
        }
        Ok(())
    }

    /// Deterministic primary key:
    /// `{symbol}-{start MMDD}{end MMDD}-{start year}`
    pub fn id(&self) -> String {
        format!(
            "{}-{}{}-{}",
            self.symbol,
            self.start_date.format("%m%d"),
            self.end_date.format("%m%d"),
            self.start_date.format("%Y"),
        )
    }

    /// True once the end date has passed the given day
    pub fn expired(&self, today: NaiveDate) -> bool {
        today > self.end_date
    }

    /// Close the prediction with the actual closing price
    pub fn close(&self, close_price: f64) -> Result<PredictionResult> {
        PredictionResult::new(self.clone(), close_price)
    }

    /// Values in `predictions` column order
    pub fn to_row(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::from(self.id()),
            SqlValue::from(self.symbol.clone()),
            SqlValue::from(self.trading_pair.clone()),
            SqlValue::from(self.start_date),
            SqlValue::from(self.end_date),
            SqlValue::from(self.start_price),
            SqlValue::from(self.end_price),
            SqlValue::from(self.buy_price),
            SqlValue::from(self.sell_price),
        ]
    }

    pub fn to_record(&self) -> Record {
        let mut record = Record::new();
        record.insert("prediction_id".to_string(), SqlValue::from(self.id()));
        record.insert("symbol".to_string(), SqlValue::from(self.symbol.clone()));
        record.insert(
            "trading_pair".to_string(),
            SqlValue::from(self.trading_pair.clone()),
        );
        record.insert("start_date".to_string(), SqlValue::from(self.start_date));
        record.insert("end_date".to_string(), SqlValue::from(self.end_date));
        record.insert("start_price".to_string(), SqlValue::from(self.start_price));
        record.insert("end_price".to_string(), SqlValue::from(self.end_price));
        record.insert("buy_price".to_string(), SqlValue::from(self.buy_price));
        record.insert("sell_price".to_string(), SqlValue::from(self.sell_price));
        record
    }

    /// Human-readable field list for UI consumption
    pub fn to_display(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Prediction", self.id()),
            ("Symbol", self.symbol.clone()),
            ("Trading Pair", self.trading_pair.clone()),
            ("Start Date", self.start_date.format("%Y-%m-%d").to_string()),
            ("End Date", self.end_date.format("%Y-%m-%d").to_string()),
            ("Start Price", format!("{:.2}", self.start_price)),
            ("End Price", format!("{:.2}", self.end_price)),
            ("Buy Price", format!("{:.2}", self.buy_price)),
            ("Sell Price", format!("{:.2}", self.sell_price)),
        ]
    }
}

/// A closed-out prediction annotated with the actual closing price.
/// Mutually exclusive with its source prediction row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub prediction: Prediction,
    pub close_price: f64,
}

impl PredictionResult {
    pub fn new(prediction: Prediction, close_price: f64) -> Result<Self> {
        if close_price < 0.0 {
            return Err(MyWowError::InvalidData(
                "close_price must not be negative".to_string(),
            ));
        }
        Ok(PredictionResult {
            prediction,
            close_price,
        })
    }

    pub fn from_record(record: &Record) -> Result<Self> {
        let prediction = Prediction::from_record(record)?;
        let close_price = req_f64(record, "close_price")?;
        PredictionResult::new(prediction, close_price)
    }

    /// Same id scheme as the source prediction
    pub fn id(&self) -> String {
        self.prediction.id()
    }

    /// Values in `results` column order
    pub fn to_row(&self) -> Vec<SqlValue> {
        let mut row = self.prediction.to_row();
        row.push(SqlValue::from(self.close_price));
        row
    }

    pub fn to_record(&self) -> Record {
        let mut record = self.prediction.to_record();
        record.insert("close_price".to_string(), SqlValue::from(self.close_price));
        record
    }

    pub fn to_display(&self) -> Vec<(&'static str, String)> {
        let mut fields = self.prediction.to_display();
        fields.push(("Close Price", format!("{:.2}", self.close_price)));
        fields
    }
}

/// An OHLCV aggregate over one time bucket of a trading pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub start: i64,
    pub time: NaiveDateTime,
    pub trading_pair: String,
    pub symbol: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// Highest high across the queried range, attached by the candle
    /// cache for chart scaling
    pub range_high: Option<f64>,
    /// Lowest low across the queried range
    pub range_low: Option<f64>,
}

impl Candle {
    pub fn new(
        start: i64,
        trading_pair: String,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Result<Self> {
        let time = DateTime::from_timestamp(start, 0)
            .ok_or_else(|| MyWowError::InvalidData(format!("bad unix timestamp: {start}")))?
            .naive_utc();
        if trading_pair.is_empty() {
            return Err(MyWowError::InvalidData(
                "trading_pair must not be empty".to_string(),
            ));
        }
        let symbol = symbol_of(&trading_pair);
        Ok(Candle {
            start,
            time,
            trading_pair,
            symbol,
            open,
            high,
            low,
            close,
            volume,
            range_high: None,
            range_low: None,
        })
    }

    pub fn from_record(record: &Record) -> Result<Self> {
        let candle = Candle::new(
            req_i64(record, "start")?,
            req_text(record, "trading_pair")?,
            req_f64(record, "open")?,
            req_f64(record, "high")?,
            req_f64(record, "low")?,
            req_f64(record, "close")?,
            req_f64(record, "volume")?,
        )?;
        check_carried_id(record, "candle_id", &candle.id())?;
        Ok(candle)
    }

    /// Deterministic primary key: `{symbol}-{unix start}`
    pub fn id(&self) -> String {
        format!("{}-{}", self.symbol, self.start)
    }

    pub fn date(&self) -> NaiveDate {
        self.time.date()
    }

    /// Values in `candles` (daily, DATE-keyed) column order
    pub fn to_daily_row(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::from(self.id()),
            SqlValue::from(self.date()),
            SqlValue::from(self.start),
            SqlValue::from(self.trading_pair.clone()),
            SqlValue::from(self.open),
            SqlValue::from(self.high),
            SqlValue::from(self.low),
            SqlValue::from(self.close),
            SqlValue::from(self.volume),
        ]
    }

    /// Values in `market_candles` (minute, DATETIME-keyed) column order
    pub fn to_minute_row(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::from(self.id()),
            SqlValue::from(self.time),
            SqlValue::from(self.start),
            SqlValue::from(self.trading_pair.clone()),
            SqlValue::from(self.open),
            SqlValue::from(self.high),
            SqlValue::from(self.low),
            SqlValue::from(self.close),
            SqlValue::from(self.volume),
        ]
    }

    pub fn to_daily_record(&self) -> Record {
        let mut record = self.common_record();
        record.insert("date".to_string(), SqlValue::from(self.date()));
        record
    }

    pub fn to_minute_record(&self) -> Record {
        let mut record = self.common_record();
        record.insert("time".to_string(), SqlValue::from(self.time));
        record
    }

    fn common_record(&self) -> Record {
        let mut record = Record::new();
        record.insert("candle_id".to_string(), SqlValue::from(self.id()));
        record.insert("start".to_string(), SqlValue::from(self.start));
        record.insert(
            "trading_pair".to_string(),
            SqlValue::from(self.trading_pair.clone()),
        );
        record.insert("open".to_string(), SqlValue::from(self.open));
        record.insert("high".to_string(), SqlValue::from(self.high));
        record.insert("low".to_string(), SqlValue::from(self.low));
        record.insert("close".to_string(), SqlValue::from(self.close));
        record.insert("volume".to_string(), SqlValue::from(self.volume));
        record
    }

    pub fn to_display(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Candle", self.id()),
            ("Date", self.time.format("%Y-%m-%d %H:%M").to_string()),
            ("Trading Pair", self.trading_pair.clone()),
            ("Open", format!("{:.2}", self.open)),
            ("High", format!("{:.2}", self.high)),
            ("Low", format!("{:.2}", self.low)),
            ("Close", format!("{:.2}", self.close)),
            ("Volume", format!("{:.4}", self.volume)),
        ]
    }
}

/// Attach `(range_high, range_low)` across the whole set to every candle.
/// Used purely for downstream chart scaling.
pub fn attach_range(candles: &mut [Candle]) {
    if candles.is_empty() {
        return;
    }
    let range_high = candles.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let range_low = candles.iter().map(|c| c.low).fold(f64::MAX, f64::min);
    for candle in candles {
        candle.range_high = Some(range_high);
        candle.range_low = Some(range_low);
    }
}

/// Side of a market trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "BUY" => Ok(TradeSide::Buy),
            "SELL" => Ok(TradeSide::Sell),
            other => Err(MyWowError::InvalidData(format!("unknown side: {other}"))),
        }
    }
}

/// A single exchange-reported trade. The id is exchange-assigned, not
/// derived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketTrade {
    pub trade_id: String,
    pub trading_pair: String,
    pub symbol: String,
    pub price: f64,
    pub size: f64,
    pub time: NaiveDateTime,
    pub side: TradeSide,
    pub bid: f64,
    pub ask: f64,
    pub exchange: String,
}

impl MarketTrade {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        trade_id: String,
        trading_pair: String,
        price: f64,
        size: f64,
        time: NaiveDateTime,
        side: TradeSide,
        bid: f64,
        ask: f64,
        exchange: String,
    ) -> Result<Self> {
        if trade_id.is_empty() {
            return Err(MyWowError::MissingData("trade_id".to_string()));
        }
        if trading_pair.is_empty() {
            return Err(MyWowError::InvalidData(
                "trading_pair must not be empty".to_string(),
            ));
        }
        if price < 0.0 || size < 0.0 {
            return Err(MyWowError::InvalidData(
                "price and size must not be negative".to_string(),
            ));
        }
        let symbol = symbol_of(&trading_pair);
        Ok(MarketTrade {
            trade_id,
            trading_pair,
            symbol,
            price,
            size,
            time,
            side,
            bid,
            ask,
            exchange,
        })
    }

    pub fn from_record(record: &Record) -> Result<Self> {
        // Exchange payloads say product_id, our own rows say trading_pair
        let trading_pair = match record.get("trading_pair") {
            Some(_) => req_text(record, "trading_pair")?,
            None => req_text(record, "product_id")?,
        };
        MarketTrade::new(
            req_text(record, "trade_id")?,
            trading_pair,
            req_f64(record, "price")?,
            req_f64(record, "size")?,
            req_datetime(record, "time")?,
            TradeSide::parse(&req_text(record, "side")?)?,
            opt_f64(record, "bid", 0.0)?,
            opt_f64(record, "ask", 0.0)?,
            opt_text(record, "exchange", "unknown"),
        )
    }

    /// Signed notional: negative for sells
    pub fn total(&self) -> f64 {
        let sign = match self.side {
            TradeSide::Buy => 1.0,
            TradeSide::Sell => -1.0,
        };
        self.price * self.size * sign
    }

    /// Values in `market_trades` column order
    pub fn to_row(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::from(self.trade_id.clone()),
            SqlValue::from(self.trading_pair.clone()),
            SqlValue::from(self.price),
            SqlValue::from(self.size),
            SqlValue::from(self.time),
            SqlValue::from(self.side.as_str()),
            SqlValue::from(self.bid),
            SqlValue::from(self.ask),
            SqlValue::from(self.exchange.clone()),
        ]
    }

    pub fn to_record(&self) -> Record {
        let mut record = Record::new();
        record.insert(
            "trade_id".to_string(),
            SqlValue::from(self.trade_id.clone()),
        );
        record.insert(
            "trading_pair".to_string(),
            SqlValue::from(self.trading_pair.clone()),
        );
        record.insert("price".to_string(), SqlValue::from(self.price));
        record.insert("size".to_string(), SqlValue::from(self.size));
        record.insert("time".to_string(), SqlValue::from(self.time));
        record.insert("side".to_string(), SqlValue::from(self.side.as_str()));
        record.insert("bid".to_string(), SqlValue::from(self.bid));
        record.insert("ask".to_string(), SqlValue::from(self.ask));
        record.insert(
            "exchange".to_string(),
            SqlValue::from(self.exchange.clone()),
        );
        record
    }

    pub fn to_display(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Trade", self.trade_id.clone()),
            ("Trading Pair", self.trading_pair.clone()),
            ("Time", self.time.format("%Y-%m-%d %H:%M:%S").to_string()),
            ("Side", self.side.as_str().to_string()),
            ("Price", format!("{:.2}", self.price)),
            ("Size", format!("{:.6}", self.size)),
            ("Total", format!("{:.2}", self.total())),
            ("Exchange", self.exchange.clone()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn valid_prediction() -> Prediction {
        Prediction::new(
            "BTC".to_string(),
            "BTC-USD".to_string(),
            date(2024, 12, 1),
            date(2024, 12, 31),
            95000.0,
            100000.0,
            94000.0,
            101000.0,
        )
        .unwrap()
    }

    #[test]
    fn prediction_id_is_deterministic() {
        let p = valid_prediction();
        assert_eq!(p.id(), "BTC-12011231-2024");
        assert_eq!(p.id(), valid_prediction().id());

        let mut other = valid_prediction();
        other.symbol = "ETH".to_string();
        assert_ne!(other.id(), p.id());

        let mut shifted = valid_prediction();
        shifted.end_date = date(2024, 12, 30);
        assert_ne!(shifted.id(), p.id());
    }

    #[test]
    fn prediction_rejects_inverted_dates() {
        let err = Prediction::new(
            "BTC".to_string(),
            "BTC-USD".to_string(),
            date(2024, 12, 31),
            date(2024, 12, 1),
            95000.0,
            100000.0,
            0.0,
            0.0,
        );
        assert!(matches!(err, Err(MyWowError::InvalidData(_))));
    }

    #[test]
    fn prediction_rejects_non_positive_prices() {
        let err = Prediction::new(
            "BTC".to_string(),
            "BTC-USD".to_string(),
            date(2024, 12, 1),
            date(2024, 12, 31),
            0.0,
            100000.0,
            0.0,
            0.0,
        );
        assert!(matches!(err, Err(MyWowError::InvalidData(_))));

        let err = Prediction::new(
            "BTC".to_string(),
            "BTC-USD".to_string(),
            date(2024, 12, 1),
            date(2024, 12, 31),
            95000.0,
            100000.0,
            -1.0,
            0.0,
        );
        assert!(matches!(err, Err(MyWowError::InvalidData(_))));
    }

    #[test]
    fn prediction_from_record_coerces_strings() {
        let mut record = Record::new();
        record.insert("symbol".to_string(), SqlValue::from("BTC"));
        record.insert("trading_pair".to_string(), SqlValue::from("BTC-USD"));
        record.insert("start_date".to_string(), SqlValue::from("2024-12-01"));
        record.insert("end_date".to_string(), SqlValue::from("2024-12-31"));
        record.insert("start_price".to_string(), SqlValue::from("95000"));
        record.insert("end_price".to_string(), SqlValue::from("100000"));
        record.insert("buy_price".to_string(), SqlValue::from("94000"));
        record.insert("sell_price".to_string(), SqlValue::from("101000"));

        let p = Prediction::from_record(&record).unwrap();
        assert_eq!(p, valid_prediction());
    }

    #[test]
    fn prediction_missing_field() {
        let mut record = valid_prediction().to_record();
        record.remove("end_date");
        assert!(matches!(
            Prediction::from_record(&record),
            Err(MyWowError::MissingData(_))
        ));
    }

    #[test]
    fn carried_id_mismatch_is_rejected() {
        let mut record = valid_prediction().to_record();
        record.insert(
            "prediction_id".to_string(),
            SqlValue::from("ETH-12011231-2024"),
        );
        assert!(matches!(
            Prediction::from_record(&record),
            Err(MyWowError::InvalidData(_))
        ));

        // agreeing id passes
        let record = valid_prediction().to_record();
        assert!(Prediction::from_record(&record).is_ok());
    }

    #[test]
    fn typed_and_record_constructors_agree_on_id() {
        let typed = valid_prediction();
        let parsed = Prediction::from_record(&typed.to_record()).unwrap();
        assert_eq!(typed.id(), parsed.id());
    }

    #[test]
    fn result_requires_non_negative_close() {
        let p = valid_prediction();
        assert!(p.close(105.5).is_ok());
        assert!(matches!(
            p.close(-0.5),
            Err(MyWowError::InvalidData(_))
        ));
    }

    #[test]
    fn result_row_extends_prediction_row() {
        let result = valid_prediction().close(99123.0).unwrap();
        let row = result.to_row();
        assert_eq!(row.len(), 10);
        assert_eq!(row[9], SqlValue::Real(99123.0));
        assert_eq!(result.id(), "BTC-12011231-2024");
    }

    #[test]
    fn candle_id_and_date_derive_from_start() {
        let candle =
            Candle::new(1733011200, "BTC-USD".to_string(), 1.0, 2.0, 0.5, 1.5, 10.0).unwrap();
        assert_eq!(candle.id(), "BTC-1733011200");
        assert_eq!(candle.date(), date(2024, 12, 1));
        assert_eq!(candle.symbol, "BTC");
    }

    #[test]
    fn candle_from_api_record() {
        let record = crate::db::record_from_json(&serde_json::json!({
            "start": 1733011200,
            "trading_pair": "BTC-USD",
            "open": "95000.5",
            "high": "96000",
            "low": "94000",
            "close": "95500",
            "volume": "12.5",
        }))
        .unwrap();
        let candle = Candle::from_record(&record).unwrap();
        assert_eq!(candle.open, 95000.5);
        assert_eq!(candle.id(), "BTC-1733011200");
    }

    #[test]
    fn attach_range_covers_whole_set() {
        let mut candles = vec![
            Candle::new(1733011200, "BTC-USD".to_string(), 9.0, 10.0, 8.0, 9.5, 1.0).unwrap(),
            Candle::new(1733097600, "BTC-USD".to_string(), 9.5, 12.0, 9.0, 11.0, 1.0).unwrap(),
        ];
        attach_range(&mut candles);
        for candle in &candles {
            assert_eq!(candle.range_high, Some(12.0));
            assert_eq!(candle.range_low, Some(8.0));
        }
    }

    #[test]
    fn trade_total_is_signed() {
        let time = date(2024, 12, 1).and_hms_opt(10, 30, 0).unwrap();
        let buy = MarketTrade::new(
            "t1".to_string(),
            "BTC-USD".to_string(),
            100.0,
            0.5,
            time,
            TradeSide::Buy,
            0.0,
            0.0,
            "coinbase".to_string(),
        )
        .unwrap();
        assert_eq!(buy.total(), 50.0);

        let sell = MarketTrade::new(
            "t2".to_string(),
            "BTC-USD".to_string(),
            100.0,
            0.5,
            time,
            TradeSide::Sell,
            0.0,
            0.0,
            "coinbase".to_string(),
        )
        .unwrap();
        assert_eq!(sell.total(), -50.0);
    }

    #[test]
    fn trade_from_api_record_defaults() {
        let record = crate::db::record_from_json(&serde_json::json!({
            "trade_id": "812345",
            "product_id": "SWELL-USD",
            "price": "0.0123",
            "size": "1500",
            "time": "2025-02-10T01:30:00Z",
            "side": "SELL",
        }))
        .unwrap();
        let trade = MarketTrade::from_record(&record).unwrap();
        assert_eq!(trade.trading_pair, "SWELL-USD");
        assert_eq!(trade.symbol, "SWELL");
        assert_eq!(trade.bid, 0.0);
        assert_eq!(trade.exchange, "unknown");
        assert_eq!(trade.side, TradeSide::Sell);
        assert!(trade.total() < 0.0);
    }

    #[test]
    fn trade_rejects_unknown_side() {
        let mut record = crate::db::record_from_json(&serde_json::json!({
            "trade_id": "812345",
            "product_id": "SWELL-USD",
            "price": "0.0123",
            "size": "1500",
            "time": "2025-02-10T01:30:00Z",
        }))
        .unwrap();
        record.insert("side".to_string(), SqlValue::from("HOLD"));
        assert!(matches!(
            MarketTrade::from_record(&record),
            Err(MyWowError::InvalidData(_))
        ));
    }
}
