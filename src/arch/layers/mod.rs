mod activation;
mod affine;
mod blstm;
mod component;
mod dropout;
mod lstm;
mod parallel;

use ndarray::Array2;

pub use activation::{ActFn, Activation};
pub use affine::AffineTransform;
pub use blstm::BLstmProjectedStreams;
pub use component::{Component, ComponentKind};
pub use dropout::Dropout;
pub use lstm::LstmProjectedStreams;
pub use parallel::ParallelComponent;

/// Resizes `buf` to `shape`, zeroing it, unless it already has that shape.
pub(crate) fn ensure_shape(buf: &mut Array2<f32>, shape: (usize, usize)) {
    if buf.dim() != shape {
        *buf = Array2::zeros(shape);
    }
}
