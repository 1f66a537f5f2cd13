use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SideTuneError};
use crate::layers::{ActivationLayer, Conv2d, ConvConfig, GlobalMaxPool, Module, Param, Sequential};
use crate::math::tensor::Tensor;

/// Shape of the convolutional text encoder.
///
/// Each window slides a `(window, embedding_dim)` kernel down the token axis
/// with `stride`, followed by ReLU and max-pool over time. The branch output
/// concatenates every window's `channels` maxima.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBranchConfig {
    pub sequence_length: usize,
    pub embedding_dim: usize,
    pub channels: usize,
    pub windows: Vec<usize>,
    pub stride: usize,
}

impl Default for TextBranchConfig {
    fn default() -> Self {
        TextBranchConfig {
            sequence_length: 500,
            embedding_dim: 300,
            channels: 512,
            windows: vec![250, 125, 62],
            stride: 2,
        }
    }
}

impl TextBranchConfig {
    pub fn output_dim(&self) -> usize {
        self.channels * self.windows.len()
    }

    pub fn validate(&self) -> Result<()> {
        if self.windows.is_empty() || self.channels == 0 || self.stride == 0 || self.embedding_dim == 0 {
            return Err(SideTuneError::InvalidConfig(
                "text branch needs windows, channels, stride and embedding_dim".into(),
            ));
        }
        if let Some(w) = self.windows.iter().find(|&&w| w == 0 || w > self.sequence_length) {
            return Err(SideTuneError::InvalidConfig(format!(
                "text window {} does not fit a sequence of {} tokens",
                w, self.sequence_length
            )));
        }
        Ok(())
    }

    pub fn build<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<TextConvBranch> {
        self.validate()?;
        let mut branches = Vec::with_capacity(self.windows.len());
        for &window in &self.windows {
            let conv = ConvConfig::rect(1, self.channels, (window, self.embedding_dim)).stride(self.stride);
            branches.push(
                Sequential::new()
                    .with(Conv2d::new(conv, rng)?)
                    .with(ActivationLayer::relu())
                    .with(GlobalMaxPool::new()),
            );
        }
        Ok(TextConvBranch { config: self.clone(), branches })
    }
}

/// Parallel multi-window convolutions over a `(sequence_length, embedding_dim)`
/// matrix, producing one `output_dim` vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextConvBranch {
    config: TextBranchConfig,
    branches: Vec<Sequential>,
}

impl TextConvBranch {
    pub fn config(&self) -> &TextBranchConfig {
        &self.config
    }

    pub fn output_dim(&self) -> usize {
        self.config.output_dim()
    }

    fn check_input(&self, input: &Tensor) -> Result<()> {
        let expected = [self.config.sequence_length, self.config.embedding_dim];
        if input.shape() != expected {
            return Err(SideTuneError::shape("text input", &expected, input.shape()));
        }
        Ok(())
    }
}

impl Module for TextConvBranch {
    fn infer(&self, input: &Tensor) -> Result<Tensor> {
        self.check_input(input)?;
        let parts = self.branches.iter().map(|b| b.infer(input)).collect::<Result<Vec<_>>>()?;
        Ok(Tensor::concat(&parts))
    }

    fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        self.check_input(input)?;
        let parts = self.branches.iter_mut().map(|b| b.forward(input)).collect::<Result<Vec<_>>>()?;
        Ok(Tensor::concat(&parts))
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let channels = self.config.channels;
        if grad_output.len() != self.output_dim() {
            return Err(SideTuneError::shape("text branch gradient", &[self.output_dim()], grad_output.shape()));
        }
        let mut grad_input = Tensor::zeros(&[self.config.sequence_length, self.config.embedding_dim]);
        for (branch, chunk) in self.branches.iter_mut().zip(grad_output.data().chunks(channels)) {
            let g = branch.backward(&Tensor::vector(chunk))?;
            grad_input.add_scaled(&g.reshape(grad_input.shape())?, 1.0)?;
        }
        Ok(grad_input)
    }

    fn params(&self) -> Vec<&Param> {
        self.branches.iter().flat_map(|b| b.params()).collect()
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        self.branches.iter_mut().flat_map(|b| b.params_mut()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::gradcheck::check_module;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    pub(crate) fn small() -> TextBranchConfig {
        TextBranchConfig { sequence_length: 12, embedding_dim: 4, channels: 3, windows: vec![6, 3], stride: 2 }
    }

    #[test]
    fn default_matches_the_document_text_encoder() {
        let cfg = TextBranchConfig::default();
        assert_eq!(cfg.output_dim(), 1536);
        assert_eq!(cfg.windows, vec![250, 125, 62]);
    }

    #[test]
    fn output_concatenates_every_window() {
        let mut rng = StdRng::seed_from_u64(0);
        let branch = small().build(&mut rng).unwrap();
        let x = Tensor::uniform(&[12, 4], 1.0, &mut rng);
        let out = branch.infer(&x).unwrap();
        assert_eq!(out.shape(), &[6]);
        assert!(out.data().iter().all(|v| *v >= 0.0));
    }

    #[test]
    fn wrong_sequence_shape_is_rejected() {
        let branch = small().build(&mut StdRng::seed_from_u64(0)).unwrap();
        assert!(branch.infer(&Tensor::zeros(&[10, 4])).is_err());
    }

    #[test]
    fn oversized_window_is_invalid() {
        let cfg = TextBranchConfig { windows: vec![13], ..small() };
        assert!(cfg.build(&mut StdRng::seed_from_u64(0)).is_err());
    }

    #[test]
    fn gradients_match_finite_differences() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut branch = small().build(&mut rng).unwrap();
        let x = Tensor::uniform(&[12, 4], 1.0, &mut rng);
        check_module(&mut branch, &x);
    }
}
