//! Model report port trait.

use std::path::Path;

use crate::domain::error::TraderError;
use crate::domain::model::ModelSet;

/// Port for writing the activated model set.
pub trait ReportPort {
    fn write_models(&self, models: &ModelSet, output_path: &Path) -> Result<(), TraderError>;
}
