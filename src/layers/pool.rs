use serde::{Deserialize, Serialize};

use crate::error::{Result, SideTuneError};
use crate::layers::module::Module;
use crate::math::tensor::Tensor;

/// Windowed max pooling; padded positions never win.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaxPool2d {
    pub kernel: usize,
    pub stride: usize,
    pub padding: usize,
    /// (input shape, flat input index chosen for every output element)
    #[serde(skip)]
    winners: Option<(Vec<usize>, Vec<usize>)>,
}

impl MaxPool2d {
    pub fn new(kernel: usize, stride: usize, padding: usize) -> MaxPool2d {
        MaxPool2d { kernel, stride, padding, winners: None }
    }

    fn apply(&self, input: &Tensor) -> Result<(Tensor, Vec<usize>)> {
        let (c, h, w) = input.dims3()?;
        let (k, s, p) = (self.kernel, self.stride.max(1), self.padding);
        if k == 0 || h + 2 * p < k || w + 2 * p < k || p >= k {
            return Err(SideTuneError::shape("max pool input", &[c, k, k], input.shape()));
        }
        let oh = (h + 2 * p - k) / s + 1;
        let ow = (w + 2 * p - k) / s + 1;
        let x = input.data();
        let mut out = Vec::with_capacity(c * oh * ow);
        let mut winners = Vec::with_capacity(c * oh * ow);
        for ch in 0..c {
            for oy in 0..oh {
                for ox in 0..ow {
                    let mut best = f64::NEG_INFINITY;
                    let mut best_idx = None;
                    for ky in 0..k {
                        let iy = oy * s + ky;
                        if iy < p || iy - p >= h {
                            continue;
                        }
                        for kx in 0..k {
                            let ix = ox * s + kx;
                            if ix < p || ix - p >= w {
                                continue;
                            }
                            let idx = (ch * h + iy - p) * w + ix - p;
                            if best_idx.is_none() || x[idx] > best {
                                best = x[idx];
                                best_idx = Some(idx);
                            }
                        }
                    }
                    // p < k guarantees at least one real tap per window.
                    let idx = best_idx.unwrap_or(ch * h * w);
                    out.push(x[idx]);
                    winners.push(idx);
                }
            }
        }
        Ok((Tensor::from_vec(&[c, oh, ow], out)?, winners))
    }
}

impl Module for MaxPool2d {
    fn infer(&self, input: &Tensor) -> Result<Tensor> {
        Ok(self.apply(input)?.0)
    }

    fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        let (out, winners) = self.apply(input)?;
        self.winners = Some((input.shape().to_vec(), winners));
        Ok(out)
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let (shape, winners) = self.winners.take().ok_or(SideTuneError::MissingForward("max_pool"))?;
        scatter(&shape, &winners, grad_output, "max pool gradient")
    }
}

/// Averages each channel over its spatial extent: `(C, H, W) -> (C)`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalAvgPool {
    #[serde(skip)]
    input_shape: Option<Vec<usize>>,
}

impl GlobalAvgPool {
    pub fn new() -> GlobalAvgPool {
        GlobalAvgPool::default()
    }
}

impl Module for GlobalAvgPool {
    fn infer(&self, input: &Tensor) -> Result<Tensor> {
        let (c, h, w) = input.dims3()?;
        let plane = (h * w).max(1);
        let means: Vec<f64> = input
            .data()
            .chunks(plane)
            .take(c)
            .map(|chunk| chunk.iter().sum::<f64>() / plane as f64)
            .collect();
        Ok(Tensor::vector(&means))
    }

    fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        let out = self.infer(input)?;
        self.input_shape = Some(input.shape().to_vec());
        Ok(out)
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let shape = self.input_shape.take().ok_or(SideTuneError::MissingForward("global_avg_pool"))?;
        let probe = Tensor::zeros(&shape);
        let (c, h, w) = probe.dims3()?;
        if grad_output.len() != c {
            return Err(SideTuneError::shape("global avg pool gradient", &[c], grad_output.shape()));
        }
        let plane = h * w;
        let scale = 1.0 / plane.max(1) as f64;
        let data: Vec<f64> = grad_output
            .data()
            .iter()
            .flat_map(|&g| std::iter::repeat(g * scale).take(plane))
            .collect();
        Tensor::from_vec(&shape, data)
    }
}

/// Max over all spatial positions of each channel: `(C, H, W) -> (C)`.
///
/// Applied to text convolutions this is max-pool-over-time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalMaxPool {
    #[serde(skip)]
    winners: Option<(Vec<usize>, Vec<usize>)>,
}

impl GlobalMaxPool {
    pub fn new() -> GlobalMaxPool {
        GlobalMaxPool::default()
    }

    fn apply(&self, input: &Tensor) -> Result<(Tensor, Vec<usize>)> {
        let (c, h, w) = input.dims3()?;
        let plane = h * w;
        if plane == 0 {
            return Err(SideTuneError::shape("global max pool input", &[c, 1, 1], input.shape()));
        }
        let x = input.data();
        let winners: Vec<usize> = (0..c)
            .map(|ch| {
                let base = ch * plane;
                let local = Tensor::vector(&x[base..base + plane]).argmax();
                base + local
            })
            .collect();
        let out: Vec<f64> = winners.iter().map(|&i| x[i]).collect();
        Ok((Tensor::vector(&out), winners))
    }
}

impl Module for GlobalMaxPool {
    fn infer(&self, input: &Tensor) -> Result<Tensor> {
        Ok(self.apply(input)?.0)
    }

    fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        let (out, winners) = self.apply(input)?;
        self.winners = Some((input.shape().to_vec(), winners));
        Ok(out)
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let (shape, winners) = self.winners.take().ok_or(SideTuneError::MissingForward("global_max_pool"))?;
        scatter(&shape, &winners, grad_output, "global max pool gradient")
    }
}

/// Routes each output gradient back to the input position that produced it.
fn scatter(shape: &[usize], winners: &[usize], grad_output: &Tensor, context: &str) -> Result<Tensor> {
    if grad_output.len() != winners.len() {
        return Err(SideTuneError::shape(context, &[winners.len()], grad_output.shape()));
    }
    let mut grad_input = Tensor::zeros(shape);
    let gi = grad_input.data_mut();
    for (&idx, &g) in winners.iter().zip(grad_output.data()) {
        gi[idx] += g;
    }
    Ok(grad_input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::gradcheck::check_module;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn max_pool_picks_window_maximum() {
        let x = Tensor::from_vec(&[1, 2, 2], vec![1.0, 4.0, 3.0, 2.0]).unwrap();
        let mut pool = MaxPool2d::new(2, 2, 0);
        let y = pool.forward(&x).unwrap();
        assert_eq!(y.data(), &[4.0]);
        let g = pool.backward(&Tensor::vector(&[1.0])).unwrap();
        assert_eq!(g.data(), &[0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn padded_max_pool_halves_resolution() {
        let pool = MaxPool2d::new(3, 2, 1);
        let y = pool.infer(&Tensor::full(&[2, 8, 8], -1.0)).unwrap();
        assert_eq!(y.shape(), &[2, 4, 4]);
        assert!(y.data().iter().all(|&v| v == -1.0));
    }

    #[test]
    fn global_max_pool_is_max_over_time() {
        let x = Tensor::from_vec(&[2, 3, 1], vec![0.1, 0.9, 0.2, -1.0, -3.0, -2.0]).unwrap();
        let mut pool = GlobalMaxPool::new();
        assert_eq!(pool.forward(&x).unwrap().data(), &[0.9, -1.0]);
        let g = pool.backward(&Tensor::vector(&[2.0, 3.0])).unwrap();
        assert_eq!(g.data(), &[0.0, 2.0, 0.0, 3.0, 0.0, 0.0]);
    }

    #[test]
    fn global_avg_pool_gradients_match_finite_differences() {
        let mut rng = StdRng::seed_from_u64(7);
        let input = Tensor::uniform(&[3, 2, 3], 1.0, &mut rng);
        let mut pool = GlobalAvgPool::new();
        assert_eq!(pool.infer(&input).unwrap().shape(), &[3]);
        check_module(&mut pool, &input);
    }
}
