//! Parquet-backed persistence for granita volumes and training data.
//!
//! This crate is the I/O seam around the core engine: label volumes,
//! probability maps, and exclusion volumes are stored as single-column
//! Parquet files with the N-dimensional shape in the file metadata, and
//! training datasets as three-column tables with the info header alongside.

mod errors;
mod training;
mod volumes;

pub use crate::{
    errors::VolumeProviderError,
    training::{TrainingTable, read_training_set, write_training_set},
    volumes::{read_labels, read_probabilities, write_labels, write_probabilities},
};

#[cfg(test)]
mod tests;
