//! Burn inference backend for affinity scoring.
//!
//! This module provides a `BurnOracle` that implements `AffinityOracle`
//! for running siamese affinity models built with the Burn framework.
//!
//! # Example
//!
//! ```ignore
//! use celltrack_rs::integration::{BurnAffinityModel, BurnOracle};
//! use burn::backend::NdArray;
//!
//! // Implement BurnAffinityModel for your classifier
//! struct MySiamese { /* ... */ }
//!
//! impl BurnAffinityModel<NdArray> for MySiamese {
//!     fn forward(&self, inputs: Vec<(Tensor<NdArray, 3>, Tensor<NdArray, 3>)>) -> Tensor<NdArray, 2> {
//!         // Run inference
//!     }
//! }
//!
//! let model = MySiamese::load("model.bin");
//! let oracle = BurnOracle::new(model, Default::default());
//! ```

use crate::tracker::{AffinityBatch, AffinityOracle};
use burn::prelude::*;
use burn::tensor::Tensor;
use burn::tensor::activation::softmax;
use ndarray::Array2;
use thiserror::Error;

/// Error type for Burn scoring failures.
#[derive(Debug, Clone, Error)]
pub enum BurnOracleError {
    /// Model output does not have one row of three scores per pair.
    #[error("invalid output dimensions: expected {expected:?}, got {got:?}")]
    InvalidOutputDimensions {
        expected: (usize, usize),
        got: (usize, usize),
    },
    /// Preprocessing failed.
    #[error("preprocessing error: {0}")]
    PreprocessingError(String),
    /// Postprocessing failed.
    #[error("postprocessing error: {0}")]
    PostprocessingError(String),
}

/// Trait for Burn-based affinity models.
///
/// Implement this trait for your specific model architecture.
pub trait BurnAffinityModel<B: Backend>: Send + Sync {
    /// Run forward pass on the stacked pair inputs.
    ///
    /// # Arguments
    /// * `inputs` - One `(track, candidate)` pair of tensors per enabled
    ///   feature, in canonical feature order. Track tensors have shape
    ///   `[K, W, F]` and candidate tensors `[K, 1, F]`, where `F` is the
    ///   flattened per-frame feature size.
    ///
    /// # Returns
    /// Tensor of shape `[K, 3]` with (continuation, unrelated, division)
    /// scores.
    fn forward(&self, inputs: Vec<(Tensor<B, 3>, Tensor<B, 3>)>) -> Tensor<B, 2>;

    /// Whether the forward pass returns logits that still need a softmax.
    fn outputs_logits(&self) -> bool {
        false
    }
}

/// Burn-based affinity oracle implementing `AffinityOracle`.
pub struct BurnOracle<B: Backend, M: BurnAffinityModel<B>> {
    model: M,
    device: B::Device,
}

impl<B: Backend, M: BurnAffinityModel<B>> BurnOracle<B, M> {
    /// Create a new Burn oracle with the given model and device.
    pub fn new(model: M, device: B::Device) -> Self {
        Self { model, device }
    }

    /// Flatten an `[K, W, ..shape]` array into a `[K, W, F]` tensor.
    fn to_tensor(&self, array: &ndarray::ArrayD<f32>) -> Result<Tensor<B, 3>, BurnOracleError> {
        let shape = array.shape();
        if shape.len() < 2 {
            return Err(BurnOracleError::PreprocessingError(format!(
                "feature batch of rank {} has no pair and window axes",
                shape.len()
            )));
        }
        let (pairs, window) = (shape[0], shape[1]);
        let flat: usize = shape[2..].iter().product();
        let data: Vec<f32> = array.iter().copied().collect();
        Ok(Tensor::<B, 1>::from_floats(data.as_slice(), &self.device).reshape([pairs, window, flat]))
    }

    /// Convert the model output to a `[K, 3]` array.
    fn postprocess(&self, output: Tensor<B, 2>, pairs: usize) -> Result<Array2<f32>, BurnOracleError> {
        let [rows, cols] = output.dims();
        if (rows, cols) != (pairs, 3) {
            return Err(BurnOracleError::InvalidOutputDimensions {
                expected: (pairs, 3),
                got: (rows, cols),
            });
        }
        let output = if self.model.outputs_logits() {
            softmax(output, 1)
        } else {
            output
        };
        let values = output
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| BurnOracleError::PostprocessingError(format!("{:?}", e)))?;
        Array2::from_shape_vec((pairs, 3), values)
            .map_err(|e| BurnOracleError::PostprocessingError(e.to_string()))
    }
}

impl<B: Backend, M: BurnAffinityModel<B>> AffinityOracle for BurnOracle<B, M> {
    type Error = BurnOracleError;

    fn predict(&mut self, batch: &AffinityBatch) -> Result<Array2<f32>, Self::Error> {
        let inputs = batch
            .features
            .values()
            .map(|f| Ok((self.to_tensor(&f.track)?, self.to_tensor(&f.candidate)?)))
            .collect::<Result<Vec<_>, BurnOracleError>>()?;
        let output = self.model.forward(inputs);
        self.postprocess(output, batch.len())
    }
}
