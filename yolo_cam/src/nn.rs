//! Inference runner.
//!
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use ndarray::{Array2, Axis, Ix2};
use tract_onnx::prelude::*;

use crate::utils::download_file;

type NnModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// A model turning an input tensor into detection rows.
pub trait InferModel: Send + Sync {
    /// Side length of the square input the model expects.
    fn input_size(&self) -> u32;

    /// Run the model on a `[1, 3, size, size]` tensor.
    ///
    /// Returns one row per candidate box. The input is consumed and released whether or not the
    /// run succeeds.
    fn run(&self, input: Tensor) -> Result<Array2<f32>>;
}

/// Where to find the ONNX file of a YOLO model.
#[derive(Clone, Debug)]
pub struct ModelSource {
    /// Model name, the file is expected at `{model_dir}/{name}.onnx`.
    pub name: String,
    pub model_dir: PathBuf,
    /// Base URL to download `{name}.onnx` from if the file is missing.
    pub base_url: Option<String>,
}

impl ModelSource {
    pub fn model_path(&self) -> PathBuf {
        self.model_dir.join(format!("{}.onnx", self.name))
    }
}

/// YOLO detector exported to ONNX with an output of shape `[1, N, 5 + classes]`.
pub struct YoloModel {
    model: NnModel,
    input_size: u32,
}

impl YoloModel {
    /// Load the model described by `source`, downloading it first if needed.
    pub async fn new(source: &ModelSource, input_size: u32) -> Result<Self> {
        let model_path = source.model_path();

        if !model_path.exists() {
            let Some(base_url) = &source.base_url else {
                bail!(
                    "model file {} not found and no download URL given",
                    model_path.display()
                );
            };
            let url = format!("{}/{}.onnx", base_url.trim_end_matches('/'), source.name);

            log::info!("Downloading model from {url}");
            std::fs::create_dir_all(&source.model_dir)?;
            let client = reqwest::Client::new();
            download_file(&client, &url, &model_path)
                .await
                .with_context(|| format!("failed to download model from {url}"))?;
        }

        Self::from_path(&model_path, input_size)
    }

    /// Load and optimize the ONNX file at `path` for a fixed input of `input_size` squared.
    pub fn from_path(path: impl AsRef<Path>, input_size: u32) -> Result<Self> {
        let path = path.as_ref();
        let size = input_size as usize;
        let input_fact = InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size));

        let model = tract_onnx::onnx()
            .model_for_path(path)
            .with_context(|| format!("failed to read model {}", path.display()))?
            .with_input_fact(0, input_fact)?
            .into_optimized()?
            .into_runnable()?;

        log::info!("Loaded model {} with input size {input_size}", path.display());

        Ok(Self { model, input_size })
    }
}

impl InferModel for YoloModel {
    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn run(&self, input: Tensor) -> Result<Array2<f32>> {
        let raw_nn_out = self.model.run(tvec!(input.into()))?;
        let output = raw_nn_out
            .first()
            .context("model produced no output")?
            .to_array_view::<f32>()?;

        output_rows(output)
    }
}

/// Materialize a `[1, N, A]` or `[N, A]` output as `N` rows.
fn output_rows(output: ndarray::ArrayViewD<f32>) -> Result<Array2<f32>> {
    let rows = match output.ndim() {
        3 if output.len_of(Axis(0)) == 1 => output.index_axis_move(Axis(0), 0),
        2 => output,
        _ => bail!("unexpected model output shape {:?}", output.shape()),
    };

    Ok(rows.into_dimensionality::<Ix2>()?.to_owned())
}

#[cfg(test)]
mod test {

    use ndarray::{Array, IxDyn};

    use super::*;

    #[test]
    fn batched_output_is_flattened_to_rows() -> Result<()> {
        let output = Array::from_shape_fn(IxDyn(&[1, 3, 85]), |idx| (idx[1] * 100 + idx[2]) as f32);
        let rows = output_rows(output.view())?;

        assert_eq!(rows.dim(), (3, 85));
        assert_eq!(rows[[2, 4]], 204.0);

        Ok(())
    }

    #[test]
    fn unbatched_output_is_accepted() -> Result<()> {
        let output = Array::<f32, _>::zeros(IxDyn(&[4, 85]));
        assert_eq!(output_rows(output.view())?.dim(), (4, 85));

        Ok(())
    }

    #[test]
    fn other_shapes_are_rejected() {
        let output = Array::<f32, _>::zeros(IxDyn(&[2, 3, 85]));
        assert!(output_rows(output.view()).is_err());

        let output = Array::<f32, _>::zeros(IxDyn(&[85]));
        assert!(output_rows(output.view()).is_err());
    }

    #[test]
    fn model_path_is_built_from_name() {
        let source = ModelSource {
            name: "yolov7-tiny".into(),
            model_dir: PathBuf::from("/models"),
            base_url: None,
        };
        assert_eq!(source.model_path(), PathBuf::from("/models/yolov7-tiny.onnx"));
    }

    #[tokio::test]
    async fn missing_model_without_url_is_an_error() {
        let source = ModelSource {
            name: "does-not-exist".into(),
            model_dir: std::env::temp_dir(),
            base_url: None,
        };
        assert!(YoloModel::new(&source, 640).await.is_err());
    }
}
