use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SideTuneError};
use crate::layers::module::{Module, Param};
use crate::math::tensor::Tensor;

/// Geometry of a 2-D convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    /// (height, width)
    pub kernel: (usize, usize),
    pub stride: (usize, usize),
    pub padding: (usize, usize),
    /// `groups == in_channels == out_channels` gives a depthwise convolution.
    pub groups: usize,
    pub bias: bool,
}

impl ConvConfig {
    /// Square kernel, stride 1, no padding, one group, with bias.
    pub fn new(in_channels: usize, out_channels: usize, kernel: usize) -> ConvConfig {
        ConvConfig::rect(in_channels, out_channels, (kernel, kernel))
    }

    pub fn rect(in_channels: usize, out_channels: usize, kernel: (usize, usize)) -> ConvConfig {
        ConvConfig {
            in_channels,
            out_channels,
            kernel,
            stride: (1, 1),
            padding: (0, 0),
            groups: 1,
            bias: true,
        }
    }

    pub fn stride(mut self, stride: usize) -> ConvConfig {
        self.stride = (stride, stride);
        self
    }

    pub fn padding(mut self, padding: usize) -> ConvConfig {
        self.padding = (padding, padding);
        self
    }

    pub fn groups(mut self, groups: usize) -> ConvConfig {
        self.groups = groups;
        self
    }

    pub fn no_bias(mut self) -> ConvConfig {
        self.bias = false;
        self
    }

    fn validate(&self) -> Result<()> {
        let (kh, kw) = self.kernel;
        let (sh, sw) = self.stride;
        if kh == 0 || kw == 0 || sh == 0 || sw == 0 {
            return Err(SideTuneError::InvalidConfig(format!(
                "conv kernel {:?} and stride {:?} must be positive",
                self.kernel, self.stride
            )));
        }
        if self.groups == 0
            || self.in_channels % self.groups != 0
            || self.out_channels % self.groups != 0
        {
            return Err(SideTuneError::InvalidConfig(format!(
                "conv channels {}->{} not divisible into {} groups",
                self.in_channels, self.out_channels, self.groups
            )));
        }
        Ok(())
    }
}

/// 2-D convolution over a single `(channels, height, width)` sample.
///
/// A rank-2 input `(rows, cols)` is read as one channel, which is how the
/// text branch slides `(window, embedding_dim)` kernels over a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conv2d {
    pub config: ConvConfig,
    /// Shape `(out_channels, in_channels / groups, kh, kw)`.
    pub weight: Param,
    pub bias: Option<Param>,
    #[serde(skip)]
    input: Option<Tensor>,
}

struct Geometry {
    c: usize,
    h: usize,
    w: usize,
    oh: usize,
    ow: usize,
}

impl Conv2d {
    pub fn new<R: Rng + ?Sized>(config: ConvConfig, rng: &mut R) -> Result<Conv2d> {
        config.validate()?;
        let (kh, kw) = config.kernel;
        let cin_g = config.in_channels / config.groups;
        let weight = Tensor::he_normal(&[config.out_channels, cin_g, kh, kw], cin_g * kh * kw, rng);
        let bias = config.bias.then(|| Param::new(Tensor::zeros(&[config.out_channels])));
        Ok(Conv2d { config, weight: Param::new(weight), bias, input: None })
    }

    fn geometry(&self, input: &Tensor) -> Result<Geometry> {
        let (c, h, w) = input.dims3()?;
        let cfg = &self.config;
        let (kh, kw) = cfg.kernel;
        let (ph, pw) = cfg.padding;
        if c != cfg.in_channels || h + 2 * ph < kh || w + 2 * pw < kw {
            return Err(SideTuneError::shape(
                "conv2d input",
                &[cfg.in_channels, kh.saturating_sub(2 * ph), kw.saturating_sub(2 * pw)],
                input.shape(),
            ));
        }
        let oh = (h + 2 * ph - kh) / cfg.stride.0 + 1;
        let ow = (w + 2 * pw - kw) / cfg.stride.1 + 1;
        Ok(Geometry { c, h, w, oh, ow })
    }

    /// Calls `visit(out_index, weight_index, input_index)` for every
    /// multiply-accumulate of the convolution, skipping padded positions.
    fn for_each_tap<F>(&self, g: &Geometry, mut visit: F)
    where
        F: FnMut(usize, usize, usize),
    {
        let cfg = &self.config;
        let (kh, kw) = cfg.kernel;
        let (sh, sw) = cfg.stride;
        let (ph, pw) = cfg.padding;
        let cin_g = cfg.in_channels / cfg.groups;
        let cout_g = cfg.out_channels / cfg.groups;
        debug_assert_eq!(g.c, cfg.in_channels);

        for oc in 0..cfg.out_channels {
            let group = oc / cout_g;
            for oy in 0..g.oh {
                for ox in 0..g.ow {
                    let out_idx = (oc * g.oh + oy) * g.ow + ox;
                    for ic in 0..cin_g {
                        let c = group * cin_g + ic;
                        for ky in 0..kh {
                            let iy = oy * sh + ky;
                            if iy < ph || iy - ph >= g.h {
                                continue;
                            }
                            let iy = iy - ph;
                            for kx in 0..kw {
                                let ix = ox * sw + kx;
                                if ix < pw || ix - pw >= g.w {
                                    continue;
                                }
                                let ix = ix - pw;
                                let w_idx = ((oc * cin_g + ic) * kh + ky) * kw + kx;
                                let x_idx = (c * g.h + iy) * g.w + ix;
                                visit(out_idx, w_idx, x_idx);
                            }
                        }
                    }
                }
            }
        }
    }

    fn apply(&self, input: &Tensor) -> Result<Tensor> {
        let g = self.geometry(input)?;
        let out_c = self.config.out_channels;
        let mut out = vec![0.0; out_c * g.oh * g.ow];
        if let Some(bias) = &self.bias {
            let b = bias.value.data();
            for (oc, chunk) in out.chunks_mut(g.oh * g.ow).enumerate() {
                chunk.iter_mut().for_each(|v| *v = b[oc]);
            }
        }
        let w = self.weight.value.data();
        let x = input.data();
        self.for_each_tap(&g, |o, wi, xi| out[o] += w[wi] * x[xi]);
        Tensor::from_vec(&[out_c, g.oh, g.ow], out)
    }
}

impl Module for Conv2d {
    fn infer(&self, input: &Tensor) -> Result<Tensor> {
        self.apply(input)
    }

    fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        let out = self.apply(input)?;
        self.input = Some(input.clone());
        Ok(out)
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let input = self.input.take().ok_or(SideTuneError::MissingForward("conv2d"))?;
        let g = self.geometry(&input)?;
        let out_c = self.config.out_channels;
        if grad_output.len() != out_c * g.oh * g.ow {
            return Err(SideTuneError::shape("conv2d gradient", &[out_c, g.oh, g.ow], grad_output.shape()));
        }
        let go = grad_output.data();
        let x = input.data();

        if let Some(bias) = self.bias.as_mut() {
            let bg = bias.grad_mut();
            for (oc, chunk) in go.chunks(g.oh * g.ow).enumerate() {
                bg[oc] += chunk.iter().sum::<f64>();
            }
        }

        let mut weight_grad = vec![0.0; self.weight.numel()];
        let mut grad_input = vec![0.0; input.len()];
        let w = self.weight.value.data();
        self.for_each_tap(&g, |o, wi, xi| {
            weight_grad[wi] += go[o] * x[xi];
            grad_input[xi] += go[o] * w[wi];
        });
        for (acc, d) in self.weight.grad_mut().iter_mut().zip(weight_grad) {
            *acc += d;
        }
        Tensor::from_vec(input.shape(), grad_input)
    }

    fn params(&self) -> Vec<&Param> {
        let mut params = vec![&self.weight];
        params.extend(self.bias.as_ref());
        params
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        let mut params = vec![&mut self.weight];
        params.extend(self.bias.as_mut());
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::gradcheck::check_module;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn output_geometry_follows_stride_and_padding() {
        let mut rng = StdRng::seed_from_u64(0);
        let conv = Conv2d::new(ConvConfig::new(3, 8, 7).stride(2).padding(3), &mut rng).unwrap();
        let y = conv.infer(&Tensor::zeros(&[3, 32, 32])).unwrap();
        assert_eq!(y.shape(), &[8, 16, 16]);
    }

    #[test]
    fn text_window_collapses_embedding_axis() {
        let mut rng = StdRng::seed_from_u64(0);
        let conv = Conv2d::new(ConvConfig::rect(1, 4, (5, 6)).stride(2), &mut rng).unwrap();
        let y = conv.infer(&Tensor::zeros(&[20, 6])).unwrap();
        assert_eq!(y.shape(), &[4, 8, 1]);
    }

    #[test]
    fn box_filter_sums_neighbourhood() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut conv = Conv2d::new(ConvConfig::new(1, 1, 2), &mut rng).unwrap();
        conv.weight.value = Tensor::full(&[1, 1, 2, 2], 1.0);
        let x = Tensor::from_vec(&[1, 2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let y = conv.infer(&x).unwrap();
        assert_eq!(y.shape(), &[1, 1, 2]);
        assert_eq!(y.data(), &[12.0, 16.0]);
    }

    #[test]
    fn rejects_bad_groups_and_small_inputs() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(Conv2d::new(ConvConfig::new(3, 4, 1).groups(2), &mut rng).is_err());
        let conv = Conv2d::new(ConvConfig::new(1, 1, 5), &mut rng).unwrap();
        assert!(conv.infer(&Tensor::zeros(&[1, 3, 3])).is_err());
        assert!(conv.infer(&Tensor::zeros(&[2, 8, 8])).is_err());
    }

    #[test]
    fn gradients_match_finite_differences() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut conv = Conv2d::new(ConvConfig::new(2, 3, 3).stride(2).padding(1), &mut rng).unwrap();
        let input = Tensor::uniform(&[2, 5, 5], 1.0, &mut rng);
        check_module(&mut conv, &input);
    }

    #[test]
    fn depthwise_gradients_match_finite_differences() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut conv = Conv2d::new(ConvConfig::new(3, 3, 3).padding(1).groups(3).no_bias(), &mut rng).unwrap();
        let input = Tensor::uniform(&[3, 4, 4], 1.0, &mut rng);
        check_module(&mut conv, &input);
    }
}
