//! Parquet persistence for dense volumes.
//!
//! A volume file holds one `values` column of `FixedSizeList` rows, one list
//! per innermost slice, and records the full N-dimensional shape in the file
//! metadata under `granita:shape`. Labels travel as signed 64-bit integers
//! and are validated into the unsigned 32-bit label range on read, so
//! foreign files with negative labels are rejected rather than wrapped.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow_array::{Array, ArrayRef, FixedSizeListArray, Float32Array, Int64Array, RecordBatch, RecordBatchReader};
use arrow_schema::{DataType, Field, Schema};
use ndarray::{ArrayD, IxDyn};
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::file::properties::WriterProperties;
use parquet::format::KeyValue;

use crate::errors::VolumeProviderError;

pub(crate) const SHAPE_KEY: &str = "granita:shape";
pub(crate) const VALUES_COLUMN: &str = "values";

/// Writes an integer label volume.
///
/// # Errors
/// Returns [`VolumeProviderError`] when the volume is empty or the file
/// cannot be written.
pub fn write_labels(path: impl AsRef<Path>, volume: &ArrayD<u32>) -> Result<(), VolumeProviderError> {
    let shape = validated_shape(volume.shape())?;
    let values: Vec<i64> = volume.iter().map(|&label| i64::from(label)).collect();
    write_values(path, &shape, Arc::new(Int64Array::from(values)), DataType::Int64)
}

/// Reads an integer label volume.
///
/// # Errors
/// Returns [`VolumeProviderError`] when the file is malformed, the shape
/// metadata is missing or inconsistent, or a label falls outside the
/// unsigned 32-bit range.
pub fn read_labels(path: impl AsRef<Path>) -> Result<ArrayD<u32>, VolumeProviderError> {
    let (shape, values) = read_i64_values(path)?;
    let mut labels = Vec::with_capacity(values.len());
    for (row, value) in values.into_iter().enumerate() {
        let label = u32::try_from(value)
            .map_err(|_| VolumeProviderError::LabelOutOfRange { value, row })?;
        labels.push(label);
    }
    Ok(ArrayD::from_shape_vec(IxDyn(&shape), labels)
        .expect("shape consistency is validated on read"))
}

/// Writes a probability volume (optionally carrying a channel axis).
///
/// # Errors
/// Returns [`VolumeProviderError`] when the volume is empty or the file
/// cannot be written.
pub fn write_probabilities(
    path: impl AsRef<Path>,
    volume: &ArrayD<f32>,
) -> Result<(), VolumeProviderError> {
    let shape = validated_shape(volume.shape())?;
    let values: Vec<f32> = volume.iter().copied().collect();
    write_values(path, &shape, Arc::new(Float32Array::from(values)), DataType::Float32)
}

/// Reads a probability volume.
///
/// # Errors
/// Returns [`VolumeProviderError`] when the file is malformed or the shape
/// metadata is missing or inconsistent.
pub fn read_probabilities(path: impl AsRef<Path>) -> Result<ArrayD<f32>, VolumeProviderError> {
    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let shape = shape_from_metadata(&builder)?;
    let reader = builder.build()?;
    let schema = reader.schema();
    let column =
        schema
            .index_of(VALUES_COLUMN)
            .map_err(|_| VolumeProviderError::ColumnNotFound {
                column: VALUES_COLUMN.to_owned(),
            })?;

    let mut values = Vec::new();
    for batch in reader {
        let batch = batch?;
        let list = downcast_list(batch.column(column), VALUES_COLUMN)?;
        for row in 0..list.len() {
            if list.is_null(row) {
                return Err(VolumeProviderError::NullRow { row: values.len() });
            }
            let slice = list.value(row);
            let floats = slice.as_any().downcast_ref::<Float32Array>().ok_or_else(|| {
                VolumeProviderError::InvalidListValueType {
                    expected: DataType::Float32,
                    actual: slice.data_type().clone(),
                }
            })?;
            values.extend(floats.iter().map(|value| value.unwrap_or(0.0)));
        }
    }
    check_shape(&shape, values.len())?;
    Ok(ArrayD::from_shape_vec(IxDyn(&shape), values)
        .expect("shape consistency is validated on read"))
}

fn validated_shape(shape: &[usize]) -> Result<Vec<usize>, VolumeProviderError> {
    if shape.is_empty() || shape.iter().any(|&extent| extent == 0) {
        return Err(VolumeProviderError::EmptyVolume);
    }
    Ok(shape.to_vec())
}

fn write_values(
    path: impl AsRef<Path>,
    shape: &[usize],
    values: ArrayRef,
    child_type: DataType,
) -> Result<(), VolumeProviderError> {
    let width = *shape.last().unwrap_or(&1);
    let child = Arc::new(Field::new("item", child_type, false));
    let list = FixedSizeListArray::try_new(Arc::clone(&child), width as i32, values, None)?;
    let schema = Arc::new(Schema::new(vec![Field::new(
        VALUES_COLUMN,
        DataType::FixedSizeList(child, width as i32),
        false,
    )]));
    let batch = RecordBatch::try_new(Arc::clone(&schema), vec![Arc::new(list)])?;

    let shape_string = shape
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",");
    let properties = WriterProperties::builder()
        .set_key_value_metadata(Some(vec![KeyValue::new(SHAPE_KEY.to_owned(), shape_string)]))
        .build();

    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, schema, Some(properties))?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

fn read_i64_values(
    path: impl AsRef<Path>,
) -> Result<(Vec<usize>, Vec<i64>), VolumeProviderError> {
    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let shape = shape_from_metadata(&builder)?;
    let reader = builder.build()?;
    let schema = reader.schema();
    let column =
        schema
            .index_of(VALUES_COLUMN)
            .map_err(|_| VolumeProviderError::ColumnNotFound {
                column: VALUES_COLUMN.to_owned(),
            })?;

    let mut values = Vec::new();
    for batch in reader {
        let batch = batch?;
        let list = downcast_list(batch.column(column), VALUES_COLUMN)?;
        for row in 0..list.len() {
            if list.is_null(row) {
                return Err(VolumeProviderError::NullRow { row: values.len() });
            }
            let slice = list.value(row);
            let integers = slice.as_any().downcast_ref::<Int64Array>().ok_or_else(|| {
                VolumeProviderError::InvalidListValueType {
                    expected: DataType::Int64,
                    actual: slice.data_type().clone(),
                }
            })?;
            values.extend(integers.iter().map(|value| value.unwrap_or(0)));
        }
    }
    check_shape(&shape, values.len())?;
    Ok((shape, values))
}

pub(crate) fn downcast_list<'a>(
    column: &'a ArrayRef,
    name: &str,
) -> Result<&'a FixedSizeListArray, VolumeProviderError> {
    column
        .as_any()
        .downcast_ref::<FixedSizeListArray>()
        .ok_or_else(|| VolumeProviderError::InvalidColumnType {
            column: name.to_owned(),
            actual: column.data_type().clone(),
        })
}

pub(crate) fn shape_from_metadata<R>(
    builder: &ParquetRecordBatchReaderBuilder<R>,
) -> Result<Vec<usize>, VolumeProviderError>
where
    R: parquet::file::reader::ChunkReader,
{
    let raw = builder
        .metadata()
        .file_metadata()
        .key_value_metadata()
        .and_then(|pairs| {
            pairs
                .iter()
                .find(|pair| pair.key == SHAPE_KEY)
                .and_then(|pair| pair.value.clone())
        })
        .ok_or(VolumeProviderError::MissingMetadata { key: SHAPE_KEY })?;
    let shape: Vec<usize> = raw
        .split(',')
        .map(|extent| extent.trim().parse::<usize>())
        .collect::<Result<_, _>>()
        .map_err(|_| VolumeProviderError::InvalidShapeMetadata { raw: raw.clone() })?;
    if shape.is_empty() || shape.iter().any(|&extent| extent == 0) {
        return Err(VolumeProviderError::InvalidShapeMetadata { raw });
    }
    Ok(shape)
}

fn check_shape(shape: &[usize], actual: usize) -> Result<(), VolumeProviderError> {
    let expected: usize = shape.iter().product();
    if expected != actual {
        return Err(VolumeProviderError::ShapeMismatch {
            shape: shape.to_vec(),
            expected,
            actual,
        });
    }
    Ok(())
}
