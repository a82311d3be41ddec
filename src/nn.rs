//! Neural Network inference.

use std::{ops::RangeInclusive, path::Path, sync::Arc};

use anyhow::{bail, Context};
use itertools::Itertools;
use tract_onnx::prelude::{
    tract_ndarray::Array4, tvec, Framework, Graph, InferenceModelExt, IntoTensor, SimplePlan, TValue, Tensor,
    TypedFact, TypedOp,
};

use crate::image::{Color, Image, Resolution, RotatedRect};
use crate::timer::Timer;

type Model = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// A neural network that can be used for inference.
///
/// This is a cheaply [`Clone`]able handle to the underlying network structures.
#[derive(Clone)]
pub struct NeuralNetwork(Arc<Model>);

impl NeuralNetwork {
    /// Loads and optimizes a pre-trained model from an ONNX file.
    ///
    /// Returns an error if the file cannot be read, if the network data is malformed, or if the
    /// network uses unimplemented operations.
    pub fn from_path<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        Self::from_path_impl(path.as_ref())
    }

    fn from_path_impl(path: &Path) -> anyhow::Result<Self> {
        match path.extension() {
            Some(ext) if ext == "onnx" => {}
            _ => bail!(
                "neural network file '{}' must have `.onnx` extension",
                path.display()
            ),
        }

        let model_data = std::fs::read(path)
            .with_context(|| format!("failed to read network '{}'", path.display()))?;
        Self::from_onnx(&model_data)
            .with_context(|| format!("failed to load network '{}'", path.display()))
    }

    /// Loads a pre-trained model from an in-memory ONNX file.
    pub fn from_onnx(raw: &[u8]) -> anyhow::Result<Self> {
        let graph = tract_onnx::onnx()
            .model_for_read(&mut &*raw)?
            .into_optimized()?;
        let model = SimplePlan::new(graph)?;
        Ok(Self(Arc::new(model)))
    }

    /// Returns the number of input nodes of the network.
    pub fn num_inputs(&self) -> usize {
        self.0.model().inputs.len()
    }

    /// Returns the number of output nodes of the network.
    pub fn num_outputs(&self) -> usize {
        self.0.model().outputs.len()
    }

    /// Returns the concrete shape of the input with index `index`.
    pub fn input_shape(&self, index: usize) -> anyhow::Result<Vec<usize>> {
        let fact = self.0.model().input_fact(index)?;
        match fact.shape.as_concrete() {
            Some(shape) => Ok(shape.to_vec()),
            None => bail!("network input {} has a symbolic shape", index),
        }
    }

    /// Runs the network on a single input tensor, returning the estimated [`Outputs`].
    #[doc(alias = "infer")]
    pub fn estimate(&self, input: Tensor) -> anyhow::Result<Outputs> {
        let outputs = self.0.run(tvec![TValue::from_const(Arc::new(input))])?;
        Ok(Outputs {
            inner: outputs.into_iter().map(TValue::into_tensor).collect(),
        })
    }
}

/// Maps 8-bit sRGB color channels to the value range a network expects.
#[derive(Debug, Clone)]
pub struct ColorMapper {
    target_range: RangeInclusive<f32>,
}

impl ColorMapper {
    /// Creates a simple color mapper that uniformly maps sRGB values to `target_range`.
    ///
    /// Note that this operates on *non-linear* sRGB colors, but maps them linearly to the target
    /// range.
    pub fn linear(target_range: RangeInclusive<f32>) -> Self {
        assert!(target_range.end() > target_range.start());
        Self { target_range }
    }

    fn map(&self, color: Color) -> [f32; 3] {
        let start = *self.target_range.start();
        let end = *self.target_range.end();

        let adjust_range = (end - start) / 255.0;
        [color.r(), color.g(), color.b()].map(|col| col as f32 * adjust_range + start)
    }
}

/// A convolutional neural network (CNN) that operates on image data in `[N, C, H, W]` layout.
///
/// Like the underlying [`NeuralNetwork`], this is a cheaply [`Clone`]able handle.
#[derive(Clone)]
pub struct Cnn {
    nn: NeuralNetwork,
    input_res: Resolution,
    color_mapper: ColorMapper,
}

impl Cnn {
    /// Creates a CNN wrapper from a [`NeuralNetwork`].
    ///
    /// The network must have exactly one input of shape `[1, 3, H, W]`.
    pub fn new(nn: NeuralNetwork, color_mapper: ColorMapper) -> anyhow::Result<Self> {
        if nn.num_inputs() != 1 {
            bail!(
                "CNN network has to take exactly 1 input, this one takes {}",
                nn.num_inputs(),
            );
        }

        let (w, h) = match nn.input_shape(0)?[..] {
            [1, 3, h, w] => (w, h),
            ref shape => bail!(
                "invalid model input shape for NCHW CNN: [{}]",
                shape.iter().format(", ")
            ),
        };

        let (w, h): (u32, u32) = (w.try_into()?, h.try_into()?);
        Ok(Self {
            nn,
            input_res: Resolution::new(w, h),
            color_mapper,
        })
    }

    /// Returns the expected input image size.
    #[inline]
    pub fn input_resolution(&self) -> Resolution {
        self.input_res
    }

    /// Runs the network on the part of `image` covered by `roi`.
    ///
    /// The area is sampled (nearest neighbor) to create the network's input tensor, stretching it if
    /// its aspect ratio does not match the network's. A rotated `roi` is sampled so that its top
    /// edge ends up at the top of the network input. Parts of `roi` outside of the image are
    /// sampled as black.
    pub fn estimate(
        &self,
        image: &Image,
        roi: impl Into<RotatedRect>,
    ) -> anyhow::Result<Outputs> {
        let roi = roi.into();
        let (w, h) = (
            self.input_res.width() as usize,
            self.input_res.height() as usize,
        );
        let rect = roi.rect();
        let (sx, sy) = (rect.width() / w as f32, rect.height() / h as f32);
        let tensor = Array4::from_shape_fn((1, 3, h, w), |(_, c, y, x)| {
            let p = roi.transform_out((x as f32 + 0.5) * sx, (y as f32 + 0.5) * sy);
            let color = image.get(p.x.floor() as i64, p.y.floor() as i64);
            self.color_mapper.map(color)[c]
        });

        self.nn.estimate(tensor.into())
    }

    /// Like [`Cnn::estimate`], but records the inference time in `timer`.
    pub fn estimate_timed(
        &self,
        image: &Image,
        roi: impl Into<RotatedRect>,
        timer: &Timer,
    ) -> anyhow::Result<Outputs> {
        timer.time(|| self.estimate(image, roi))
    }
}

/// The result of a neural network inference pass.
///
/// This is a list of tensors corresponding to the network's output nodes.
#[derive(Debug)]
pub struct Outputs {
    inner: Vec<Tensor>,
}

impl Outputs {
    pub(crate) fn from_tensors(inner: Vec<Tensor>) -> Self {
        Self { inner }
    }

    /// Returns the number of tensors in this inference output.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns the `f32` data of output `index`, checking that it has the expected `shape`.
    pub fn f32_data(&self, index: usize, shape: &[usize]) -> anyhow::Result<&[f32]> {
        let Some(tensor) = self.inner.get(index) else {
            bail!(
                "network produced {} outputs, output {} is missing",
                self.len(),
                index
            );
        };
        if tensor.shape() != shape {
            bail!(
                "network output {} has shape [{}], expected [{}]",
                index,
                tensor.shape().iter().format(", "),
                shape.iter().format(", "),
            );
        }
        Ok(tensor.as_slice::<f32>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_mapper() {
        let mapper = ColorMapper::linear(-1.0..=1.0);
        assert_eq!(mapper.map(Color::BLACK), [-1.0, -1.0, -1.0]);
        assert_eq!(mapper.map(Color::WHITE), [1.0, 1.0, 1.0]);

        let mapper = ColorMapper::linear(0.0..=1.0);
        assert_eq!(mapper.map(Color::RED), [1.0, 0.0, 0.0]);
    }

    #[test]
    fn outputs_check_shape() {
        let outputs = Outputs::from_tensors(vec![Tensor::from(
            tract_onnx::prelude::tract_ndarray::arr2(&[[0.5f32, 1.0]]).into_dyn(),
        )]);
        assert_eq!(outputs.f32_data(0, &[1, 2]).unwrap(), &[0.5, 1.0]);
        assert!(outputs.f32_data(0, &[1, 3]).is_err());
        assert!(outputs.f32_data(1, &[1, 2]).is_err());
    }
}
