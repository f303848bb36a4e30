//! tract-onnx backend

use ndarray::{ArrayD, IxDyn};
use std::path::Path;
use tract_onnx::prelude::{
    Framework, Graph, InferenceModelExt, SimplePlan, TValue, TVec, Tensor, TypedFact, TypedOp,
};
use tracing::error;

use crate::backend::InferenceBackend;
use crate::PredictorError;

type TractPlan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

pub struct TractBackend {
    plan: TractPlan,
    input_names: Vec<String>,
}

impl TractBackend {
    pub fn load(path: &Path) -> Result<Self, PredictorError> {
        let plan = tract_onnx::onnx()
            .model_for_path(path)
            .and_then(|model| model.into_optimized())
            .and_then(|model| model.into_runnable())
            .map_err(|e| {
                error!("Failed to load model {}: {}", path.display(), e);
                PredictorError::ModelLoad(format!("{}: {}", path.display(), e))
            })?;

        let model = plan.model();
        let input_names = model
            .input_outlets()
            .map_err(|e| PredictorError::ModelLoad(e.to_string()))?
            .iter()
            .map(|outlet| model.node(outlet.node).name.clone())
            .collect();

        Ok(Self { plan, input_names })
    }
}

impl InferenceBackend for TractBackend {
    fn input_names(&self) -> &[String] {
        &self.input_names
    }

    fn run(&mut self, inputs: &[ArrayD<f32>]) -> Result<Vec<ArrayD<f32>>, PredictorError> {
        let mut values: TVec<TValue> = TVec::new();
        for input in inputs {
            let contiguous = input.as_standard_layout();
            let data = contiguous.as_slice().ok_or_else(|| {
                PredictorError::InvalidInput("input tensor is not contiguous".to_string())
            })?;
            let tensor = Tensor::from_shape(contiguous.shape(), data)
                .map_err(|e| PredictorError::InvalidInput(e.to_string()))?;
            values.push(tensor.into());
        }

        let outputs = self
            .plan
            .run(values)
            .map_err(|e| PredictorError::Inference(e.to_string()))?;

        outputs
            .iter()
            .map(|output| {
                let output = output
                    .cast_to::<f32>()
                    .map_err(|e| PredictorError::UnexpectedOutput(e.to_string()))?;
                let data = output
                    .as_slice::<f32>()
                    .map_err(|e| PredictorError::UnexpectedOutput(e.to_string()))?
                    .to_vec();
                ArrayD::from_shape_vec(IxDyn(output.shape()), data)
                    .map_err(|e| PredictorError::UnexpectedOutput(e.to_string()))
            })
            .collect()
    }
}
