//! CSV model report adapter: one row per model, in priority order.

use std::path::Path;

use crate::domain::error::TraderError;
use crate::domain::model::ModelSet;
use crate::ports::report_port::ReportPort;

pub struct CsvModelReport;

const HEADER: [&str; 9] = [
    "id",
    "signature",
    "shape",
    "outcome_increment",
    "occurrences",
    "win_rate",
    "enabled",
    "live_wins",
    "live_losses",
];

fn io_error(e: csv::Error) -> TraderError {
    TraderError::Io(std::io::Error::other(e))
}

impl ReportPort for CsvModelReport {
    fn write_models(&self, models: &ModelSet, output_path: &Path) -> Result<(), TraderError> {
        let mut wtr = csv::Writer::from_path(output_path).map_err(io_error)?;
        wtr.write_record(HEADER).map_err(io_error)?;

        let increments = models.increments();
        for model in models.models() {
            let outcome = increments
                .get(model.signature.outcome)
                .map(|v| v.to_string())
                .unwrap_or_default();
            wtr.write_record([
                model.id.to_string(),
                model.signature.encode(),
                model.signature.describe(increments),
                outcome,
                model.occurrence_count.to_string(),
                format!("{:.4}", model.win_rate),
                model.enabled().to_string(),
                model.live_wins().to_string(),
                model.live_losses().to_string(),
            ])
            .map_err(io_error)?;
        }
        wtr.flush()?;
        Ok(())
    }
}
