use thiserror::Error;

/// Everything that can go wrong while building, training or evaluating a model.
#[derive(Error, Debug)]
pub enum SideTuneError {
    #[error("shape mismatch in {context}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        context: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("dataset is empty: {0}")]
    EmptyDataset(String),

    #[error("index {index} out of range for {len} samples")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("label {label} out of range for {num_classes} classes")]
    LabelOutOfRange { label: usize, num_classes: usize },

    #[error("model expects {expected} input, got {actual}")]
    InputKind {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("{0}: backward called without a preceding forward pass")]
    MissingForward(&'static str),

    #[error("class {0} has no training samples")]
    MissingClass(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

impl SideTuneError {
    pub fn shape(context: impl Into<String>, expected: &[usize], actual: &[usize]) -> Self {
        SideTuneError::ShapeMismatch {
            context: context.into(),
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SideTuneError>;
