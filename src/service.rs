//! Prediction lifecycle service
//!
//! Thin orchestration over the schema registry: create, list, expire and
//! delete predictions, with the local candle tables acting as a cache in
//! front of the external market-data fetcher.

use chrono::{Local, NaiveDate, NaiveDateTime};
use log::{info, warn};

use crate::db::{InsertOutcome, Record, SqlValue, Where};
use crate::error::Result;
use crate::market::{Granularity, MarketDataSource};
use crate::models::{attach_range, Candle, MarketTrade, Prediction, PredictionResult};
use crate::schema::{SetupService, CANDLES, MARKET_CANDLES, MARKET_TRADES, PREDICTIONS, RESULTS};

pub struct PredictionService {
    registry: SetupService,
    source: Box<dyn MarketDataSource>,
    predictions_updated: bool,
}

impl PredictionService {
    pub fn new(registry: SetupService, source: Box<dyn MarketDataSource>) -> Self {
        PredictionService {
            registry,
            source,
            predictions_updated: false,
        }
    }

    pub fn registry(&self) -> &SetupService {
        &self.registry
    }

    /// Record a new prediction. A prediction with the same derived id is
    /// skipped, not overwritten.
    pub fn add_prediction(&self, prediction: &Prediction) -> Result<InsertOutcome> {
        self.registry.add_item(PREDICTIONS, &prediction.to_record())
    }

    /// All open predictions, oldest first
    pub fn get_predictions(&self) -> Result<Vec<Prediction>> {
        let rows = self
            .registry
            .get_items(PREDICTIONS, -1, &Where::new(), Some("start_date ASC"), None)?;
        rows.iter().map(Prediction::from_record).collect()
    }

    /// All closed-out predictions, oldest first
    pub fn get_results(&self) -> Result<Vec<PredictionResult>> {
        let rows = self
            .registry
            .get_items(RESULTS, -1, &Where::new(), Some("start_date ASC"), None)?;
        rows.iter().map(PredictionResult::from_record).collect()
    }

    /// Delete a prediction by its (symbol, start_date) compound match.
    /// Returns the number of rows removed.
    pub fn remove_prediction(&self, symbol: &str, start_date: NaiveDate) -> Result<usize> {
        self.registry.remove_item(
            PREDICTIONS,
            &[
                ("symbol", SqlValue::from(symbol)),
                ("start_date", SqlValue::from(start_date)),
            ],
        )
    }

    /// Close every prediction whose end date has passed, writing a
    /// result row and deleting the prediction. Runs at most once per
    /// process; later calls are no-ops. Returns the number closed.
    pub fn update_predictions(&mut self) -> Result<usize> {
        self.update_predictions_as_of(Local::now().date_naive())
    }

    fn update_predictions_as_of(&mut self, today: NaiveDate) -> Result<usize> {
        if self.predictions_updated {
            return Ok(0);
        }

        let mut closed = 0;
        for prediction in self.get_predictions()? {
            if !prediction.expired(today) {
                continue;
            }

            let candles = self.get_candles(
                &prediction.trading_pair,
                prediction.start_date,
                prediction.end_date,
            )?;
            let Some(last) = candles.last() else {
                warn!(
                    "no candle data for {}, leaving prediction open",
                    prediction.id()
                );
                continue;
            };

            let result = prediction.close(last.close)?;
            self.registry.add_item(RESULTS, &result.to_record())?;
            self.registry.remove_item(
                PREDICTIONS,
                &[("prediction_id", SqlValue::from(prediction.id()))],
            )?;
            info!(
                "closed prediction {} at {}",
                prediction.id(),
                last.close
            );
            closed += 1;
        }

        self.predictions_updated = true;
        Ok(closed)
    }

    /// Daily candles over `[start_date, end_date]`, both days included.
    ///
    /// Cache-first: the local candle table is queried, and only when it
    /// holds fewer rows than the range requires is the external fetcher
    /// called; fetched candles are persisted before the re-query. Every
    /// returned candle carries the `(range_high, range_low)` of the set.
    pub fn get_candles(
        &self,
        trading_pair: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<Candle>> {
        let start = day_start(start_date);
        let expected = Granularity::OneDay.expected_count(start, day_start(end_date));

        let mut candles = self.query_candles(trading_pair, start_date, end_date)?;
        if (candles.len() as i64) < expected {
            let fetched = self.source.fetch_candles(
                trading_pair,
                Granularity::OneDay,
                start,
                day_end(end_date),
            )?;
            for mut record in fetched {
                ensure_pair(&mut record, trading_pair);
                let candle = Candle::from_record(&record)?;
                self.registry.add_item(CANDLES, &candle.to_daily_record())?;
            }
            candles = self.query_candles(trading_pair, start_date, end_date)?;
        }

        attach_range(&mut candles);
        Ok(candles)
    }

    fn query_candles(
        &self,
        trading_pair: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<Candle>> {
        let clause = Where::new()
            .eq("trading_pair", SqlValue::from(trading_pair))
            .between(
                "date",
                SqlValue::from(start_date),
                SqlValue::from(end_date),
            );
        let rows = self
            .registry
            .get_items(CANDLES, -1, &clause, Some("start ASC"), None)?;
        rows.iter().map(Candle::from_record).collect()
    }

    /// Stored market trades in `[start, end]`, both ends included,
    /// ordered by time
    pub fn get_market_trades(
        &self,
        trading_pair: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<MarketTrade>> {
        let clause = Where::new()
            .eq("trading_pair", SqlValue::from(trading_pair))
            .between("time", SqlValue::from(start), SqlValue::from(end));
        let rows = self
            .registry
            .get_items(MARKET_TRADES, -1, &clause, Some("time ASC"), None)?;
        rows.iter().map(MarketTrade::from_record).collect()
    }

    /// Pull an analysis window of trades and minute candles from the
    /// fetcher into the local tables. Returns `(trades, candles)`
    /// inserted; rows already present are skipped.
    pub fn fetch_and_upload_market_data(
        &self,
        trading_pair: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<(usize, usize)> {
        let mut trades_inserted = 0;
        for mut record in self.source.fetch_trades(trading_pair, start, end)? {
            ensure_pair(&mut record, trading_pair);
            let trade = MarketTrade::from_record(&record)?;
            if self.registry.add_item(MARKET_TRADES, &trade.to_record())? == InsertOutcome::Inserted
            {
                trades_inserted += 1;
            }
        }

        let mut candles_inserted = 0;
        let fetched =
            self.source
                .fetch_candles(trading_pair, Granularity::OneMinute, start, end)?;
        for mut record in fetched {
            ensure_pair(&mut record, trading_pair);
            let candle = Candle::from_record(&record)?;
            if self
                .registry
                .add_item(MARKET_CANDLES, &candle.to_minute_record())?
                == InsertOutcome::Inserted
            {
                candles_inserted += 1;
            }
        }

        info!(
            "uploaded market data for {trading_pair}: {trades_inserted} trades, {candles_inserted} candles"
        );
        Ok((trades_inserted, candles_inserted))
    }
}

// Some API payloads key the pair as product_id or omit it entirely;
// the models expect trading_pair.
fn ensure_pair(record: &mut Record, trading_pair: &str) {
    if !record.contains_key("trading_pair") {
        record.insert(
            "trading_pair".to_string(),
            SqlValue::from(trading_pair),
        );
    }
}

fn day_start(date: NaiveDate) -> NaiveDateTime {
    date.and_hms_opt(0, 0, 0).unwrap_or_default()
}

fn day_end(date: NaiveDate) -> NaiveDateTime {
    date.and_hms_opt(23, 59, 59).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use std::cell::Cell;
    use std::rc::Rc;
    use tempfile::TempDir;

    struct MockSource {
        candles: Vec<Record>,
        trades: Vec<Record>,
        candle_calls: Rc<Cell<usize>>,
        trade_calls: Rc<Cell<usize>>,
    }

    impl MarketDataSource for MockSource {
        fn fetch_candles(
            &self,
            _trading_pair: &str,
            _granularity: Granularity,
            _start: NaiveDateTime,
            _end: NaiveDateTime,
        ) -> Result<Vec<Record>> {
            self.candle_calls.set(self.candle_calls.get() + 1);
            Ok(self.candles.clone())
        }

        fn fetch_trades(
            &self,
            _trading_pair: &str,
            _start: NaiveDateTime,
            _end: NaiveDateTime,
        ) -> Result<Vec<Record>> {
            self.trade_calls.set(self.trade_calls.get() + 1);
            Ok(self.trades.clone())
        }
    }

    struct Harness {
        service: PredictionService,
        candle_calls: Rc<Cell<usize>>,
        trade_calls: Rc<Cell<usize>>,
        _dir: TempDir,
    }

    fn harness(candles: Vec<Record>, trades: Vec<Record>) -> Harness {
        let dir = TempDir::new().unwrap();
        let registry = SetupService::new(Database::open_in_memory().unwrap(), dir.path());
        registry.setup().unwrap();

        let candle_calls = Rc::new(Cell::new(0));
        let trade_calls = Rc::new(Cell::new(0));
        let source = MockSource {
            candles,
            trades,
            candle_calls: Rc::clone(&candle_calls),
            trade_calls: Rc::clone(&trade_calls),
        };
        Harness {
            service: PredictionService::new(registry, Box::new(source)),
            candle_calls,
            trade_calls,
            _dir: dir,
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn unix_of(d: NaiveDate) -> i64 {
        d.and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp()
    }

    fn api_candle(d: NaiveDate, high: f64, low: f64, close: f64) -> Record {
        crate::db::record_from_json(&serde_json::json!({
            "start": unix_of(d),
            "trading_pair": "BTC-USD",
            "open": (high + low) / 2.0,
            "high": high,
            "low": low,
            "close": close,
            "volume": 10.0,
        }))
        .unwrap()
    }

    fn stored_candle(service: &PredictionService, d: NaiveDate, close: f64) {
        let candle = Candle::new(unix_of(d), "BTC-USD".to_string(), close, close, close, close, 1.0)
            .unwrap();
        service
            .registry()
            .add_item(CANDLES, &candle.to_daily_record())
            .unwrap();
    }

    fn prediction(start: NaiveDate, end: NaiveDate) -> Prediction {
        Prediction::new(
            "BTC".to_string(),
            "BTC-USD".to_string(),
            start,
            end,
            95000.0,
            100000.0,
            94000.0,
            101000.0,
        )
        .unwrap()
    }

    #[test]
    fn cache_fill_fetches_exactly_once() {
        let d0 = date(2024, 12, 1);
        let d1 = date(2024, 12, 2);
        let h = harness(
            vec![api_candle(d0, 10.0, 8.0, 9.5), api_candle(d1, 12.0, 9.0, 11.0)],
            Vec::new(),
        );

        let candles = h.service.get_candles("BTC-USD", d0, d1).unwrap();
        assert_eq!(h.candle_calls.get(), 1);
        assert_eq!(candles.len(), 2);
        for candle in &candles {
            assert_eq!(candle.range_high, Some(12.0));
            assert_eq!(candle.range_low, Some(8.0));
        }

        // second lookup is served from the cache
        let again = h.service.get_candles("BTC-USD", d0, d1).unwrap();
        assert_eq!(h.candle_calls.get(), 1);
        assert_eq!(again.len(), 2);
    }

    #[test]
    fn candle_range_is_inclusive_of_both_ends() {
        let h = harness(Vec::new(), Vec::new());
        let d0 = date(2024, 12, 1);
        let d1 = date(2024, 12, 2);
        stored_candle(&h.service, d0, 9.0);
        stored_candle(&h.service, d1, 10.0);
        stored_candle(&h.service, date(2024, 12, 3), 11.0); // d1 + 1 day, excluded

        let candles = h.service.get_candles("BTC-USD", d0, d1).unwrap();
        assert_eq!(h.candle_calls.get(), 0);
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].date(), d0);
        assert_eq!(candles[1].date(), d1);
    }

    #[test]
    fn expired_prediction_is_closed() {
        let h = harness(Vec::new(), Vec::new());
        let start = date(2024, 12, 1);
        let end = date(2024, 12, 2);
        stored_candle(&h.service, start, 101.0);
        stored_candle(&h.service, end, 105.5);

        let mut service = h.service;
        service.add_prediction(&prediction(start, end)).unwrap();

        let closed = service.update_predictions_as_of(date(2024, 12, 3)).unwrap();
        assert_eq!(closed, 1);

        let results = service.get_results().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].close_price, 105.5);
        assert_eq!(results[0].id(), "BTC-12011202-2024");
        assert!(service.get_predictions().unwrap().is_empty());
    }

    #[test]
    fn update_runs_once_per_process() {
        let h = harness(Vec::new(), Vec::new());
        let start = date(2024, 12, 1);
        let end = date(2024, 12, 2);
        stored_candle(&h.service, end, 105.5);

        let mut service = h.service;
        service.add_prediction(&prediction(start, end)).unwrap();
        assert_eq!(
            service.update_predictions_as_of(date(2024, 12, 3)).unwrap(),
            1
        );
        // flag set; a second pass does nothing
        assert_eq!(
            service.update_predictions_as_of(date(2024, 12, 3)).unwrap(),
            0
        );
    }

    #[test]
    fn expired_prediction_without_candles_stays_open() {
        // fetcher has nothing for the range either
        let h = harness(Vec::new(), Vec::new());
        let start = date(2024, 12, 1);
        let end = date(2024, 12, 2);

        let mut service = h.service;
        service.add_prediction(&prediction(start, end)).unwrap();

        let closed = service.update_predictions_as_of(date(2024, 12, 3)).unwrap();
        assert_eq!(closed, 0);
        assert_eq!(h.candle_calls.get(), 1);
        assert_eq!(service.get_predictions().unwrap().len(), 1);
        assert!(service.get_results().unwrap().is_empty());
    }

    #[test]
    fn open_predictions_are_left_alone() {
        let h = harness(Vec::new(), Vec::new());
        let start = date(2024, 12, 1);
        let end = date(2024, 12, 10);

        let mut service = h.service;
        service.add_prediction(&prediction(start, end)).unwrap();
        let closed = service.update_predictions_as_of(date(2024, 12, 5)).unwrap();
        assert_eq!(closed, 0);
        assert_eq!(service.get_predictions().unwrap().len(), 1);
        assert!(service.get_results().unwrap().is_empty());
        assert_eq!(h.candle_calls.get(), 0);
    }

    #[test]
    fn duplicate_prediction_is_skipped() {
        let h = harness(Vec::new(), Vec::new());
        let p = prediction(date(2024, 12, 1), date(2024, 12, 2));
        assert_eq!(
            h.service.add_prediction(&p).unwrap(),
            InsertOutcome::Inserted
        );
        assert_eq!(
            h.service.add_prediction(&p).unwrap(),
            InsertOutcome::SkippedDuplicate
        );
    }

    #[test]
    fn remove_prediction_matches_symbol_and_start() {
        let h = harness(Vec::new(), Vec::new());
        let p = prediction(date(2024, 12, 1), date(2024, 12, 2));
        h.service.add_prediction(&p).unwrap();

        assert_eq!(
            h.service
                .remove_prediction("BTC", date(2024, 11, 30))
                .unwrap(),
            0
        );
        assert_eq!(
            h.service
                .remove_prediction("BTC", date(2024, 12, 1))
                .unwrap(),
            1
        );
        assert!(h.service.get_predictions().unwrap().is_empty());
    }

    #[test]
    fn market_data_upload_and_readback() {
        let start = date(2025, 2, 10).and_hms_opt(1, 30, 0).unwrap();
        let end = date(2025, 2, 10).and_hms_opt(3, 0, 0).unwrap();

        let trade = crate::db::record_from_json(&serde_json::json!({
            "trade_id": "812345",
            "product_id": "BTC-USD",
            "price": "95000",
            "size": "0.5",
            "time": "2025-02-10T01:45:00Z",
            "side": "BUY",
        }))
        .unwrap();
        let minute_candle = crate::db::record_from_json(&serde_json::json!({
            "start": start.and_utc().timestamp(),
            "trading_pair": "BTC-USD",
            "open": 95000.0,
            "high": 95100.0,
            "low": 94900.0,
            "close": 95050.0,
            "volume": 3.5,
        }))
        .unwrap();

        let h = harness(vec![minute_candle], vec![trade]);
        let (trades, candles) = h
            .service
            .fetch_and_upload_market_data("BTC-USD", start, end)
            .unwrap();
        assert_eq!((trades, candles), (1, 1));
        assert_eq!(h.trade_calls.get(), 1);

        // re-upload skips rows already present
        let (trades, candles) = h
            .service
            .fetch_and_upload_market_data("BTC-USD", start, end)
            .unwrap();
        assert_eq!((trades, candles), (0, 0));

        let trades = h.service.get_market_trades("BTC-USD", start, end).unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].total(), 47500.0);
    }
}
