//! CSV price history adapter.
//!
//! Files carry a `timestamp,price` header. Timestamps are RFC 3339 or unix
//! seconds.

use crate::domain::error::TraderError;
use crate::domain::price::{PricePoint, PriceSeries};
use crate::ports::price_port::PriceSource;
use chrono::{DateTime, TimeZone, Utc};
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

pub struct CsvPriceSource {
    path: PathBuf,
}

impl CsvPriceSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, TraderError> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    raw.parse::<i64>()
        .ok()
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .ok_or_else(|| TraderError::Data {
            reason: format!("invalid timestamp '{raw}'"),
        })
}

impl PriceSource for CsvPriceSource {
    fn load_series(&self) -> Result<PriceSeries, TraderError> {
        let content = fs::read_to_string(&self.path).map_err(|e| TraderError::Data {
            reason: format!("failed to read {}: {}", self.path.display(), e),
        })?;

        let mut rdr = csv::Reader::from_reader(content.as_bytes());
        let mut points = Vec::new();

        for result in rdr.records() {
            let record = result.map_err(|e| TraderError::Data {
                reason: format!("CSV parse error: {}", e),
            })?;

            let timestamp = parse_timestamp(record.get(0).ok_or_else(|| TraderError::Data {
                reason: "missing timestamp column".into(),
            })?)?;

            let price: f64 = record
                .get(1)
                .ok_or_else(|| TraderError::Data {
                    reason: "missing price column".into(),
                })?
                .trim()
                .parse()
                .map_err(|e| TraderError::Data {
                    reason: format!("invalid price value: {}", e),
                })?;

            points.push(PricePoint::new(timestamp, price));
        }

        points.sort_by_key(|p| p.timestamp);
        let (series, dropped) = PriceSeries::from_points_lossy(points);
        if dropped > 0 {
            warn!(dropped, path = %self.path.display(), "dropped unusable price rows");
        }
        if series.is_empty() {
            return Err(TraderError::Data {
                reason: format!("{} holds no usable prices", self.path.display()),
            });
        }
        info!(points = series.len(), path = %self.path.display(), "loaded price history");
        Ok(series)
    }
}
