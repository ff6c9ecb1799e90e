use arrow_schema::{ArrowError, DataType};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VolumeProviderError {
    #[error("column `{column}` not found in Parquet schema")]
    ColumnNotFound { column: String },
    #[error("column `{column}` must be a FixedSizeList but found {actual:?}")]
    InvalidColumnType { column: String, actual: DataType },
    #[error("FixedSizeList child type must be {expected:?} but found {actual:?}")]
    InvalidListValueType { expected: DataType, actual: DataType },
    #[error("file carries no `{key}` metadata")]
    MissingMetadata { key: &'static str },
    #[error("malformed shape metadata `{raw}`")]
    InvalidShapeMetadata { raw: String },
    #[error("shape {shape:?} implies {expected} values but the file holds {actual}")]
    ShapeMismatch {
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },
    #[error("label {value} at row {row} is outside the unsigned 32-bit range")]
    LabelOutOfRange { value: i64, row: usize },
    #[error("row {row} is null")]
    NullRow { row: usize },
    #[error("a volume must have at least one axis and one voxel")]
    EmptyVolume,
    #[error("cannot persist an empty training set")]
    EmptyTrainingSet,
    #[error("arrow error: {0}")]
    Arrow(#[from] ArrowError),
    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
