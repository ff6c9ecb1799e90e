//! Parquet persistence for training datasets.
//!
//! One row per example: a `features` list of width `d`, a `labels` list of
//! width `k` (one column per labelling mode, the authoritative mode first),
//! and a scalar `weight`. The dataset's info header travels in the file
//! metadata under `granita:info`.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow_array::{Array, FixedSizeListArray, Float64Array, Int8Array, RecordBatch, RecordBatchReader};
use arrow_schema::{DataType, Field, Schema};
use granita_core::TrainingSet;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::file::properties::WriterProperties;
use parquet::format::KeyValue;

use crate::errors::VolumeProviderError;

const INFO_KEY: &str = "granita:info";
const FEATURES_COLUMN: &str = "features";
const LABELS_COLUMN: &str = "labels";
const WEIGHTS_COLUMN: &str = "weights";

/// A training dataset read back from disk.
#[derive(Clone, Debug, PartialEq)]
pub struct TrainingTable {
    /// Feature width per example.
    pub dim: usize,
    /// Label columns per example.
    pub label_modes: usize,
    /// Row-major `n x dim` features.
    pub features: Vec<f64>,
    /// Row-major `n x label_modes` labels.
    pub labels: Vec<i8>,
    /// Per-example weights.
    pub weights: Vec<f64>,
    /// The provenance header.
    pub info: String,
}

impl TrainingTable {
    /// Returns the number of examples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    /// Returns whether the table holds no examples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

/// Writes a training set produced by the learning engine.
///
/// # Errors
/// Returns [`VolumeProviderError::EmptyTrainingSet`] for empty datasets and
/// other [`VolumeProviderError`] variants when the file cannot be written.
pub fn write_training_set(
    path: impl AsRef<Path>,
    set: &TrainingSet,
) -> Result<(), VolumeProviderError> {
    if set.is_empty() || set.dim() == 0 {
        return Err(VolumeProviderError::EmptyTrainingSet);
    }

    let feature_child = Arc::new(Field::new("item", DataType::Float64, false));
    let features = FixedSizeListArray::try_new(
        Arc::clone(&feature_child),
        set.dim() as i32,
        Arc::new(Float64Array::from(set.features().to_vec())),
        None,
    )?;
    let label_child = Arc::new(Field::new("item", DataType::Int8, false));
    let labels = FixedSizeListArray::try_new(
        Arc::clone(&label_child),
        set.label_modes() as i32,
        Arc::new(Int8Array::from(set.labels().to_vec())),
        None,
    )?;
    let weights = Float64Array::from(set.weights().to_vec());

    let schema = Arc::new(Schema::new(vec![
        Field::new(
            FEATURES_COLUMN,
            DataType::FixedSizeList(feature_child, set.dim() as i32),
            false,
        ),
        Field::new(
            LABELS_COLUMN,
            DataType::FixedSizeList(label_child, set.label_modes() as i32),
            false,
        ),
        Field::new(WEIGHTS_COLUMN, DataType::Float64, false),
    ]));
    let batch = RecordBatch::try_new(
        Arc::clone(&schema),
        vec![Arc::new(features), Arc::new(labels), Arc::new(weights)],
    )?;

    let properties = WriterProperties::builder()
        .set_key_value_metadata(Some(vec![KeyValue::new(
            INFO_KEY.to_owned(),
            set.info().to_owned(),
        )]))
        .build();
    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, schema, Some(properties))?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

/// Reads a training dataset written by [`write_training_set`].
///
/// # Errors
/// Returns [`VolumeProviderError`] when the file is missing a column or a
/// column has the wrong type.
pub fn read_training_set(path: impl AsRef<Path>) -> Result<TrainingTable, VolumeProviderError> {
    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let info = builder
        .metadata()
        .file_metadata()
        .key_value_metadata()
        .and_then(|pairs| {
            pairs
                .iter()
                .find(|pair| pair.key == INFO_KEY)
                .and_then(|pair| pair.value.clone())
        })
        .unwrap_or_default();
    let reader = builder.build()?;
    let schema = reader.schema();

    let mut table = TrainingTable {
        dim: 0,
        label_modes: 0,
        features: Vec::new(),
        labels: Vec::new(),
        weights: Vec::new(),
        info,
    };
    for batch in reader {
        let batch = batch?;
        read_feature_column(&batch, schema.index_of(FEATURES_COLUMN), &mut table)?;
        read_label_column(&batch, schema.index_of(LABELS_COLUMN), &mut table)?;
        read_weight_column(&batch, schema.index_of(WEIGHTS_COLUMN), &mut table)?;
    }
    Ok(table)
}

fn read_feature_column(
    batch: &RecordBatch,
    column: Result<usize, arrow_schema::ArrowError>,
    table: &mut TrainingTable,
) -> Result<(), VolumeProviderError> {
    let column = column.map_err(|_| VolumeProviderError::ColumnNotFound {
        column: FEATURES_COLUMN.to_owned(),
    })?;
    let list = crate::volumes::downcast_list(batch.column(column), FEATURES_COLUMN)?;
    table.dim = list.value_length() as usize;
    for row in 0..list.len() {
        let slice = list.value(row);
        let floats = slice.as_any().downcast_ref::<Float64Array>().ok_or_else(|| {
            VolumeProviderError::InvalidListValueType {
                expected: DataType::Float64,
                actual: slice.data_type().clone(),
            }
        })?;
        table.features.extend(floats.iter().map(|value| value.unwrap_or(0.0)));
    }
    Ok(())
}

fn read_label_column(
    batch: &RecordBatch,
    column: Result<usize, arrow_schema::ArrowError>,
    table: &mut TrainingTable,
) -> Result<(), VolumeProviderError> {
    let column = column.map_err(|_| VolumeProviderError::ColumnNotFound {
        column: LABELS_COLUMN.to_owned(),
    })?;
    let list = crate::volumes::downcast_list(batch.column(column), LABELS_COLUMN)?;
    table.label_modes = list.value_length() as usize;
    for row in 0..list.len() {
        let slice = list.value(row);
        let labels = slice.as_any().downcast_ref::<Int8Array>().ok_or_else(|| {
            VolumeProviderError::InvalidListValueType {
                expected: DataType::Int8,
                actual: slice.data_type().clone(),
            }
        })?;
        table.labels.extend(labels.iter().map(|value| value.unwrap_or(0)));
    }
    Ok(())
}

fn read_weight_column(
    batch: &RecordBatch,
    column: Result<usize, arrow_schema::ArrowError>,
    table: &mut TrainingTable,
) -> Result<(), VolumeProviderError> {
    let column = column.map_err(|_| VolumeProviderError::ColumnNotFound {
        column: WEIGHTS_COLUMN.to_owned(),
    })?;
    let weights = batch
        .column(column)
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| VolumeProviderError::InvalidColumnType {
            column: WEIGHTS_COLUMN.to_owned(),
            actual: batch.column(column).data_type().clone(),
        })?;
    table.weights.extend(weights.iter().map(|value| value.unwrap_or(1.0)));
    Ok(())
}
