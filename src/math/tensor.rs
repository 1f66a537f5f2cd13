use rand::Rng;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::error::{Result, SideTuneError};

/// Dense row-major `f64` tensor of arbitrary rank.
///
/// Per-sample activations are rank 3 `(channels, height, width)`, text inputs
/// are rank 2 `(sequence_length, embedding_dim)` and feature vectors rank 1.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f64>,
}

impl Tensor {
    pub fn zeros(shape: &[usize]) -> Tensor {
        Tensor::full(shape, 0.0)
    }

    pub fn full(shape: &[usize], value: f64) -> Tensor {
        Tensor {
            shape: shape.to_vec(),
            data: vec![value; shape.iter().product()],
        }
    }

    pub fn from_vec(shape: &[usize], data: Vec<f64>) -> Result<Tensor> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(SideTuneError::shape("tensor construction", &[expected], &[data.len()]));
        }
        Ok(Tensor { shape: shape.to_vec(), data })
    }

    /// Rank-1 tensor over `values`.
    pub fn vector(values: &[f64]) -> Tensor {
        Tensor { shape: vec![values.len()], data: values.to_vec() }
    }

    /// Samples a single value from N(0, 1) using the Box-Muller transform.
    fn sample_standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
        // 1 - U keeps both samples in (0, 1] so ln() never sees zero.
        let u1: f64 = 1.0 - rng.gen::<f64>();
        let u2: f64 = 1.0 - rng.gen::<f64>();
        (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
    }

    /// He initialization: samples from N(0, sqrt(2 / fan_in)).
    ///
    /// Recommended before ReLU layers. The variance 2/fan_in accounts for
    /// the fact that ReLU zeroes half of its inputs on average.
    pub fn he_normal<R: Rng + ?Sized>(shape: &[usize], fan_in: usize, rng: &mut R) -> Tensor {
        let std_dev = (2.0 / fan_in.max(1) as f64).sqrt();
        let mut res = Tensor::zeros(shape);
        for x in res.data.iter_mut() {
            *x = Tensor::sample_standard_normal(rng) * std_dev;
        }
        res
    }

    /// Uniform samples in `[-bound, bound]`.
    pub fn uniform<R: Rng + ?Sized>(shape: &[usize], bound: f64, rng: &mut R) -> Tensor {
        let mut res = Tensor::zeros(shape);
        for x in res.data.iter_mut() {
            *x = (rng.gen::<f64>() * 2.0 - 1.0) * bound;
        }
        res
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Interprets the tensor as `(channels, height, width)`.
    ///
    /// Rank 2 tensors are read as a single channel, rank 1 as `(n, 1, 1)`.
    pub fn dims3(&self) -> Result<(usize, usize, usize)> {
        match self.shape.as_slice() {
            [c, h, w] => Ok((*c, *h, *w)),
            [h, w] => Ok((1, *h, *w)),
            [n] => Ok((*n, 1, 1)),
            other => Err(SideTuneError::shape("rank-3 view", &[0, 0, 0], other)),
        }
    }

    pub fn reshape(&self, shape: &[usize]) -> Result<Tensor> {
        let expected: usize = shape.iter().product();
        if expected != self.data.len() {
            return Err(SideTuneError::shape("reshape", shape, &self.shape));
        }
        Ok(Tensor { shape: shape.to_vec(), data: self.data.clone() })
    }

    pub fn map<F>(&self, functor: F) -> Tensor
    where
        F: Fn(f64) -> f64,
    {
        Tensor {
            shape: self.shape.clone(),
            data: self.data.iter().map(|&x| functor(x)).collect(),
        }
    }

    /// Element-wise combination of two same-shape tensors.
    pub fn zip_with<F>(&self, other: &Tensor, functor: F) -> Result<Tensor>
    where
        F: Fn(f64, f64) -> f64,
    {
        self.check_same_shape(other, "element-wise op")?;
        Ok(Tensor {
            shape: self.shape.clone(),
            data: self.data.iter().zip(other.data.iter()).map(|(&a, &b)| functor(a, b)).collect(),
        })
    }

    pub fn scale(&self, k: f64) -> Tensor {
        self.map(|x| x * k)
    }

    /// `self += k * other`, in place.
    pub fn add_scaled(&mut self, other: &Tensor, k: f64) -> Result<()> {
        self.check_same_shape(other, "accumulate")?;
        for (a, b) in self.data.iter_mut().zip(other.data.iter()) {
            *a += k * b;
        }
        Ok(())
    }

    pub fn fill(&mut self, value: f64) {
        self.data.iter_mut().for_each(|x| *x = value);
    }

    pub fn sum(&self) -> f64 {
        self.data.iter().sum()
    }

    pub fn mean(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.sum() / self.data.len() as f64
    }

    /// Index of the largest element. Ties go to the lowest index and NaNs
    /// never win.
    pub fn argmax(&self) -> usize {
        let mut idx = 0;
        let mut best = f64::NEG_INFINITY;
        for (i, &v) in self.data.iter().enumerate() {
            if v > best {
                best = v;
                idx = i;
            }
        }
        idx
    }

    /// Concatenates rank-1 tensors end to end.
    pub fn concat(parts: &[Tensor]) -> Tensor {
        let data: Vec<f64> = parts.iter().flat_map(|t| t.data.iter().copied()).collect();
        Tensor { shape: vec![data.len()], data }
    }

    pub fn check_same_shape(&self, other: &Tensor, context: &str) -> Result<()> {
        if self.shape != other.shape {
            return Err(SideTuneError::shape(context, &self.shape, &other.shape));
        }
        Ok(())
    }
}
