//! ONNX Runtime backend (`onnxruntime` feature)

use ndarray::ArrayD;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::{Session, SessionInputValue};
use ort::value::Value;
use std::path::Path;
use tracing::{debug, error};

use crate::backend::InferenceBackend;
use crate::PredictorError;

pub struct OrtBackend {
    session: Session,
    input_names: Vec<String>,
}

impl OrtBackend {
    pub fn load(path: &Path) -> Result<Self, PredictorError> {
        let load_err = |e: ort::Error| {
            error!("Failed to load model {}: {}", path.display(), e);
            PredictorError::ModelLoad(format!("{}: {}", path.display(), e))
        };

        let session = Session::builder()
            .map_err(load_err)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(load_err)?
            .commit_from_file(path)
            .map_err(load_err)?;

        let input_names: Vec<String> = session.inputs.iter().map(|i| i.name.clone()).collect();
        debug!("ONNX Runtime session ready, inputs: {:?}", input_names);

        Ok(Self {
            session,
            input_names,
        })
    }
}

impl InferenceBackend for OrtBackend {
    fn input_names(&self) -> &[String] {
        &self.input_names
    }

    fn run(&mut self, inputs: &[ArrayD<f32>]) -> Result<Vec<ArrayD<f32>>, PredictorError> {
        let mut feed: Vec<(String, SessionInputValue<'static>)> = Vec::with_capacity(inputs.len());
        for (name, input) in self.input_names.iter().zip(inputs) {
            let value = Value::from_array(input.clone())
                .map_err(|e| PredictorError::InvalidInput(e.to_string()))?;
            feed.push((name.clone(), value.into()));
        }

        let outputs = self
            .session
            .run(feed)
            .map_err(|e| PredictorError::Inference(e.to_string()))?;

        (0..outputs.len())
            .map(|i| {
                outputs[i]
                    .try_extract_array::<f32>()
                    .map(|view| view.to_owned())
                    .map_err(|e| PredictorError::UnexpectedOutput(e.to_string()))
            })
            .collect()
    }
}
