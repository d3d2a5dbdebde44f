use ndarray::{ArrayD, ArrayView4};

pub mod npy_replay;

pub use npy_replay::NpyReplay;

/// The network, seen from the decoder: one `[1, H, W, 3]` tensor in, the
/// nine raw output tensors out (stride 32, 16, 8; each scores, box deltas,
/// landmark deltas).
///
/// Implementations are free to be stateful; sharing one across threads is
/// the caller's business.
pub trait Inference {
    fn infer(&self, input: ArrayView4<f32>) -> anyhow::Result<Vec<ArrayD<f32>>>;
}

impl<F> Inference for F
where
    F: Fn(ArrayView4<f32>) -> anyhow::Result<Vec<ArrayD<f32>>>,
{
    fn infer(&self, input: ArrayView4<f32>) -> anyhow::Result<Vec<ArrayD<f32>>> {
        self(input)
    }
}
