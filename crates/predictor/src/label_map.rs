//! Per-pixel class index maps

use ndarray::{ArrayD, ArrayView2, Axis, Ix3};

use crate::PredictorError;

/// Row-major grid of class indices
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMap {
    width: u32,
    height: u32,
    labels: Vec<u8>,
}

impl LabelMap {
    pub fn new(width: u32, height: u32, labels: Vec<u8>) -> Result<Self, PredictorError> {
        if labels.len() != width as usize * height as usize {
            return Err(PredictorError::UnexpectedOutput(format!(
                "label map {}x{} needs {} labels, got {}",
                width,
                height,
                width as usize * height as usize,
                labels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            labels,
        })
    }

    pub fn from_fn(width: u32, height: u32, f: impl Fn(u32, u32) -> u8) -> Self {
        let labels = (0..height)
            .flat_map(|y| (0..width).map(move |x| (x, y)))
            .map(|(x, y)| f(x, y))
            .collect();
        Self {
            width,
            height,
            labels,
        }
    }

    /// Build a label map from a model output tensor.
    ///
    /// Accepts label maps shaped `(H, W)`, `(1, H, W)` or `(1, 1, H, W)`, and
    /// logits shaped `(1, C, H, W)` which are reduced with an arg-max over `C`.
    pub fn from_output(output: &ArrayD<f32>) -> Result<Self, PredictorError> {
        let shape = output.shape().to_vec();
        match shape.as_slice() {
            [_, _] => Self::from_labels(output.view().into_dimensionality().map_err(shape_err)?),
            [1, _, _] => Self::from_labels(
                output
                    .index_axis(Axis(0), 0)
                    .into_dimensionality()
                    .map_err(shape_err)?,
            ),
            [1, 1, _, _] => Self::from_labels(
                output
                    .index_axis(Axis(0), 0)
                    .index_axis_move(Axis(0), 0)
                    .into_dimensionality()
                    .map_err(shape_err)?,
            ),
            [1, channels, height, width] if *channels > 1 => {
                let logits = output
                    .index_axis(Axis(0), 0)
                    .into_dimensionality::<Ix3>()
                    .map_err(shape_err)?;
                let labels = (0..*height)
                    .flat_map(|y| (0..*width).map(move |x| (x, y)))
                    .map(|(x, y)| {
                        let mut best = 0;
                        for c in 1..*channels {
                            if logits[[c, y, x]] > logits[[best, y, x]] {
                                best = c;
                            }
                        }
                        best.min(u8::MAX as usize) as u8
                    })
                    .collect();
                Self::new(*width as u32, *height as u32, labels)
            }
            other => Err(PredictorError::UnexpectedOutput(format!(
                "cannot read a label map from output shaped {:?}",
                other
            ))),
        }
    }

    fn from_labels(view: ArrayView2<'_, f32>) -> Result<Self, PredictorError> {
        let (height, width) = view.dim();
        let labels = view
            .iter()
            .map(|v| v.round().clamp(0.0, f32::from(u8::MAX)) as u8)
            .collect();
        Self::new(width as u32, height as u32, labels)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn get(&self, x: u32, y: u32) -> u8 {
        self.labels[y as usize * self.width as usize + x as usize]
    }

    pub fn labels(&self) -> &[u8] {
        &self.labels
    }

    /// Number of pixels carrying `label`
    pub fn count(&self, label: u8) -> u64 {
        self.labels.iter().filter(|l| **l == label).count() as u64
    }

    /// Pixels per label value
    pub fn histogram(&self) -> [u64; 256] {
        let mut counts = [0u64; 256];
        for label in &self.labels {
            counts[*label as usize] += 1;
        }
        counts
    }

    /// Collapse to 0 / 1: any non-zero label becomes 1
    pub fn binarize(&self) -> Self {
        Self {
            width: self.width,
            height: self.height,
            labels: self.labels.iter().map(|l| u8::from(*l > 0)).collect(),
        }
    }

    /// Nearest-neighbour resize; output values are always a subset of the input's
    pub fn resize_nearest(&self, width: u32, height: u32) -> Self {
        if (width, height) == (self.width, self.height) {
            return self.clone();
        }
        if self.is_empty() {
            return Self::from_fn(width, height, |_, _| 0);
        }

        let src_x: Vec<u32> = (0..width)
            .map(|x| ((u64::from(x) * u64::from(self.width)) / u64::from(width)) as u32)
            .map(|x| x.min(self.width - 1))
            .collect();
        let src_y: Vec<u32> = (0..height)
            .map(|y| ((u64::from(y) * u64::from(self.height)) / u64::from(height)) as u32)
            .map(|y| y.min(self.height - 1))
            .collect();

        Self::from_fn(width, height, |x, y| {
            self.get(src_x[x as usize], src_y[y as usize])
        })
    }
}

fn shape_err(e: ndarray::ShapeError) -> PredictorError {
    PredictorError::UnexpectedOutput(e.to_string())
}
