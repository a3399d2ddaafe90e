//! Historical price source port.

use crate::domain::error::TraderError;
use crate::domain::price::PriceSeries;

pub trait PriceSource {
    /// Full history, strictly time-ordered.
    fn load_series(&self) -> Result<PriceSeries, TraderError>;
}
