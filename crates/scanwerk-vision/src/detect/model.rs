// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// `rten`-backed saliency network.
//
// # Feature Gate
//
// Only compiled with the `ml` feature:
//
// ```toml
// scanwerk-vision = { path = "crates/scanwerk-vision", features = ["ml"] }
// ```
//
// # Model
//
// A single exported graph taking a `1×3×320×320` float32 tensor (ImageNet
// normalised, planar RGB) and producing one `320×320` logit map (any leading
// unit dimensions are ignored). Convert ONNX exports with `rten-convert`.

use std::path::Path;

use rten::Model;
use rten_tensor::prelude::*;
use rten_tensor::{NdTensorView, Tensor};
use scanwerk_core::error::{Result, ScanwerkError};
use tracing::{debug, info, instrument};

use super::saliency::SaliencyModel;

/// A saliency network loaded into the `rten` runtime.
pub struct RtenSaliencyModel {
    model: Model,
}

impl RtenSaliencyModel {
    /// Load a `.rten` model file. Blocking; callers that need a deadline run
    /// this on a blocking worker under a timeout.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ScanwerkError::ModelLoad(format!(
                "model not found at {}",
                path.display()
            )));
        }
        let model = Model::load_file(path).map_err(|err| {
            ScanwerkError::ModelLoad(format!("failed to load {}: {}", path.display(), err))
        })?;
        info!(
            inputs = model.input_ids().len(),
            outputs = model.output_ids().len(),
            "Saliency model loaded"
        );
        Ok(Self { model })
    }
}

impl SaliencyModel for RtenSaliencyModel {
    fn infer(&mut self, input: &[f32], size: usize, logits: &mut Vec<f32>) -> Result<()> {
        let view = NdTensorView::from_data([1, 3, size, size], input);
        let output = self
            .model
            .run_one(view.as_dyn().into(), None)
            .map_err(|err| ScanwerkError::Inference(format!("forward pass failed: {err}")))?;
        let output: Tensor<f32> = output
            .try_into()
            .map_err(|err| ScanwerkError::Inference(format!("unexpected output type: {err:?}")))?;

        if output.len() != size * size {
            return Err(ScanwerkError::Inference(format!(
                "expected a {size}×{size} logit map, got shape {:?}",
                output.shape()
            )));
        }
        logits.clear();
        logits.extend(output.iter().copied());
        debug!(len = logits.len(), "Saliency inference complete");
        Ok(())
    }
}
