//! Error types for the granita core library.
//!
//! Defines the error enums exposed by the public API, each paired with a
//! stable machine-readable code enum for logging and metrics surfaces.

use std::fmt;

use thiserror::Error;

/// Errors raised while validating or indexing dense volumes.
#[non_exhaustive]
#[derive(Clone, Debug, Error, PartialEq)]
pub enum VolumeError {
    /// A companion volume did not match the label volume's spatial shape.
    #[error("spatial shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        /// Spatial shape of the label volume.
        expected: Vec<usize>,
        /// Shape of the offending companion volume.
        got: Vec<usize>,
    },
    /// The volume contained no voxels.
    #[error("volume contains no voxels")]
    EmptyVolume,
    /// A probability map carried zero channels.
    #[error("probability map has a zero-width channel axis")]
    EmptyChannelAxis,
}

/// Stable codes describing [`RagError`] variants.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum RagErrorCode {
    /// An input volume was malformed.
    InvalidVolume,
    /// A node id did not resolve to a live region.
    MissingNode,
    /// An edge id did not resolve to a live adjacency.
    MissingEdge,
    /// A feature manager produced non-finite values or broke additivity.
    FeatureContract,
    /// A feature manager or priority name was not registered.
    UnknownPlugin,
    /// A plugin option string could not be parsed.
    InvalidPluginOption,
}

impl RagErrorCode {
    /// Returns the symbolic identifier for logging and metrics surfaces.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidVolume => "RAG_INVALID_VOLUME",
            Self::MissingNode => "RAG_MISSING_NODE",
            Self::MissingEdge => "RAG_MISSING_EDGE",
            Self::FeatureContract => "RAG_FEATURE_CONTRACT",
            Self::UnknownPlugin => "RAG_UNKNOWN_PLUGIN",
            Self::InvalidPluginOption => "RAG_INVALID_PLUGIN_OPTION",
        }
    }
}

impl fmt::Display for RagErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type produced by region adjacency graph operations.
#[non_exhaustive]
#[derive(Clone, Debug, Error, PartialEq)]
pub enum RagError {
    /// An input volume was malformed.
    #[error(transparent)]
    Volume(#[from] VolumeError),
    /// A node id did not resolve to a live region.
    #[error("node {id} does not exist")]
    MissingNode {
        /// The offending node id.
        id: u32,
    },
    /// An edge id did not resolve to a live adjacency.
    #[error("edge {edge} does not exist")]
    MissingEdge {
        /// The offending edge id.
        edge: usize,
    },
    /// A feature manager produced non-finite values or broke additivity.
    #[error("feature contract violated in {context}")]
    FeatureContract {
        /// Where the violation was observed.
        context: &'static str,
    },
    /// A feature manager or priority name was not registered.
    #[error("unknown plugin `{name}`")]
    UnknownPlugin {
        /// The unrecognised registry name.
        name: String,
    },
    /// A plugin option string could not be parsed.
    #[error("invalid plugin option `{option}`: {reason}")]
    InvalidPluginOption {
        /// The offending `key=value` fragment.
        option: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl RagError {
    /// Retrieve the stable [`RagErrorCode`] for this error.
    #[must_use]
    pub const fn code(&self) -> RagErrorCode {
        match self {
            Self::Volume(_) => RagErrorCode::InvalidVolume,
            Self::MissingNode { .. } => RagErrorCode::MissingNode,
            Self::MissingEdge { .. } => RagErrorCode::MissingEdge,
            Self::FeatureContract { .. } => RagErrorCode::FeatureContract,
            Self::UnknownPlugin { .. } => RagErrorCode::UnknownPlugin,
            Self::InvalidPluginOption { .. } => RagErrorCode::InvalidPluginOption,
        }
    }
}

/// Stable codes describing [`LearnError`] variants.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum LearnErrorCode {
    /// A graph operation failed during learning.
    Rag,
    /// The ground truth volume was unusable.
    InvalidGroundTruth,
    /// Learning finished without collecting a single example.
    NoExamples,
    /// A classifier fit was requested on inconsistent data.
    MalformedDataset,
}

impl LearnErrorCode {
    /// Returns the symbolic identifier for logging and metrics surfaces.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rag => "LEARN_RAG_FAILURE",
            Self::InvalidGroundTruth => "LEARN_INVALID_GROUND_TRUTH",
            Self::NoExamples => "LEARN_NO_EXAMPLES",
            Self::MalformedDataset => "LEARN_MALFORMED_DATASET",
        }
    }
}

impl fmt::Display for LearnErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type produced by the learning engine.
#[non_exhaustive]
#[derive(Clone, Debug, Error, PartialEq)]
pub enum LearnError {
    /// A graph operation failed during learning.
    #[error(transparent)]
    Rag(#[from] RagError),
    /// The ground truth volume was unusable.
    #[error("ground truth is unusable: {reason}")]
    InvalidGroundTruth {
        /// Why the ground truth was rejected.
        reason: String,
    },
    /// Learning finished without collecting a single example.
    #[error("no training examples were collected")]
    NoExamples,
    /// A classifier fit was requested on inconsistent data.
    #[error("dataset is malformed: {reason}")]
    MalformedDataset {
        /// Why the dataset was rejected.
        reason: String,
    },
}

impl LearnError {
    /// Retrieve the stable [`LearnErrorCode`] for this error.
    #[must_use]
    pub const fn code(&self) -> LearnErrorCode {
        match self {
            Self::Rag(_) => LearnErrorCode::Rag,
            Self::InvalidGroundTruth { .. } => LearnErrorCode::InvalidGroundTruth,
            Self::NoExamples => LearnErrorCode::NoExamples,
            Self::MalformedDataset { .. } => LearnErrorCode::MalformedDataset,
        }
    }

    /// Retrieve the inner [`RagErrorCode`] when the error originated in the graph.
    #[must_use]
    pub const fn rag_code(&self) -> Option<RagErrorCode> {
        match self {
            Self::Rag(inner) => Some(inner.code()),
            _ => None,
        }
    }
}

/// Convenient alias for results returned by graph operations.
pub type Result<T> = core::result::Result<T, RagError>;
