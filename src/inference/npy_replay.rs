use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ndarray::{ArrayD, ArrayView4};
use ndarray_npy::{read_npy, write_npy};
use tracing::{debug, info};

use crate::inference::Inference;
use crate::rcnn::stride::FeatureStride;

const OUTPUT_KINDS: [&str; 3] = ["scores", "bbox_deltas", "landmark_deltas"];

/// file_names lists the nine dump files in network output order.
pub fn file_names() -> Vec<String> {
    FeatureStride::ALL
        .iter()
        .flat_map(|stride| OUTPUT_KINDS.iter().map(move |kind| format!("{}_{}.npy", kind, stride)))
        .collect()
}

/// Inference backend that serves previously dumped network outputs.
///
/// The directory holds `scores_stride32.npy`, `bbox_deltas_stride32.npy`,
/// `landmark_deltas_stride32.npy` and the same for strides 16 and 8. The
/// input tensor is ignored.
#[derive(Debug, Clone)]
pub struct NpyReplay {
    outputs: Vec<ArrayD<f32>>,
}

impl NpyReplay {
    pub fn from_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        info!("loading replayed outputs from {}", dir.display());
        let mut outputs = Vec::with_capacity(9);
        for name in file_names() {
            let path: PathBuf = dir.join(&name);
            let tensor: ArrayD<f32> =
                read_npy(&path).with_context(|| format!("failed to read {}", path.display()))?;
            debug!("{}: shape {:?}", name, tensor.shape());
            outputs.push(tensor);
        }
        Ok(NpyReplay { outputs })
    }

    pub fn new(outputs: Vec<ArrayD<f32>>) -> Self {
        NpyReplay { outputs }
    }

    /// save writes `outputs` to `dir` using the replay file layout.
    pub fn save<P: AsRef<Path>>(outputs: &[ArrayD<f32>], dir: P) -> Result<()> {
        let dir = dir.as_ref();
        let names = file_names();
        anyhow::ensure!(
            outputs.len() == names.len(),
            "expected {} tensors to save, got {}",
            names.len(),
            outputs.len()
        );
        for (tensor, name) in outputs.iter().zip(names) {
            let path = dir.join(name);
            write_npy(&path, tensor).with_context(|| format!("failed to write {}", path.display()))?;
        }
        Ok(())
    }
}

impl Inference for NpyReplay {
    fn infer(&self, _input: ArrayView4<f32>) -> Result<Vec<ArrayD<f32>>> {
        Ok(self.outputs.clone())
    }
}
