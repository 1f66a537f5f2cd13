use serde::{Deserialize, Serialize};

use crate::error::{Result, SideTuneError};
use crate::math::tensor::Tensor;

/// What a model consumes for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Input {
    /// `(3, height, width)` normalized page image.
    Image(Tensor),
    /// `(sequence_length, embedding_dim)` pre-vectorized text.
    Text(Tensor),
    ImageText { image: Tensor, text: Tensor },
}

impl Input {
    pub fn kind(&self) -> &'static str {
        match self {
            Input::Image(_) => "image",
            Input::Text(_) => "text",
            Input::ImageText { .. } => "image+text",
        }
    }

    pub fn expect_image(&self) -> Result<&Tensor> {
        match self {
            Input::Image(image) => Ok(image),
            other => Err(SideTuneError::InputKind { expected: "image", actual: other.kind() }),
        }
    }

    pub fn expect_text(&self) -> Result<&Tensor> {
        match self {
            Input::Text(text) => Ok(text),
            other => Err(SideTuneError::InputKind { expected: "text", actual: other.kind() }),
        }
    }

    pub fn expect_image_text(&self) -> Result<(&Tensor, &Tensor)> {
        match self {
            Input::ImageText { image, text } => Ok((image, text)),
            other => Err(SideTuneError::InputKind { expected: "image+text", actual: other.kind() }),
        }
    }
}

/// One labelled example.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub input: Input,
    pub label: usize,
}

impl Sample {
    pub fn new(input: Input, label: usize) -> Sample {
        Sample { input, label }
    }
}
