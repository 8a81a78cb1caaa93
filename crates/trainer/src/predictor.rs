//! Batched inference and prediction output

use crate::device::Placement;
use crate::errors::{PipelineError, Result};
use crate::loader::BatchLoader;
use crate::model::Regressor;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

/// One prediction per test row, in input order
pub fn predict(
    model: &Regressor,
    loader: &mut BatchLoader<'_>,
    placement: &Placement,
) -> Result<Vec<f32>> {
    if loader.is_shuffled() {
        return Err(PipelineError::config(
            "prediction requires an unshuffled loader",
        ));
    }
    if loader.width() != model.input_dim() {
        return Err(PipelineError::config(format!(
            "test data has {} features, model expects {}",
            loader.width(),
            model.input_dim()
        )));
    }

    let mut preds = Vec::with_capacity(loader.len());
    for batch in loader.batches() {
        let placed = placement.bind(&batch);
        preds.extend(model.forward(&placed)?);
    }

    if preds.len() != loader.len() {
        return Err(PipelineError::InsufficientData(format!(
            "produced {} predictions for {} rows",
            preds.len(),
            loader.len()
        )));
    }
    Ok(preds)
}

/// Header `id,<target_name>`, then one `<row>,<value>` record per prediction
pub fn write_csv<W: Write>(writer: W, preds: &[f32], target_name: &str) -> csv::Result<()> {
    let mut writer = csv::Writer::from_writer(writer);
    writer.write_record(["id", target_name])?;
    for (id, value) in preds.iter().enumerate() {
        writer.write_record([id.to_string(), value.to_string()])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_predictions<P: AsRef<Path>>(path: P, preds: &[f32], target_name: &str) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
    }
    let file = File::create(path).map_err(|e| PipelineError::io(path, e))?;
    write_csv(BufWriter::new(file), preds, target_name)
        .map_err(|e| PipelineError::io(path, e.into()))?;

    info!("Saved {} predictions to {}", preds.len(), path.display());
    Ok(())
}
