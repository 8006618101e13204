use ndarray::{Array2, ArrayView2, Axis, Zip};

use super::{ComponentKind, ensure_shape};

/// The non-linearity applied by an `Activation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActFn {
    Sigmoid,
    Tanh,
    /// Row-wise softmax.
    Softmax,
}

/// A parameterless, width preserving non-linearity.
#[derive(Debug, Clone)]
pub struct Activation {
    dim: usize,
    act_fn: ActFn,
}

impl Activation {
    pub fn new(dim: usize, act_fn: ActFn) -> Self {
        Self { dim, act_fn }
    }

    pub fn sigmoid(dim: usize) -> Self {
        Self::new(dim, ActFn::Sigmoid)
    }

    pub fn tanh(dim: usize) -> Self {
        Self::new(dim, ActFn::Tanh)
    }

    pub fn softmax(dim: usize) -> Self {
        Self::new(dim, ActFn::Softmax)
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn act_fn(&self) -> ActFn {
        self.act_fn
    }

    pub fn kind(&self) -> ComponentKind {
        match self.act_fn {
            ActFn::Sigmoid => ComponentKind::Sigmoid,
            ActFn::Tanh => ComponentKind::Tanh,
            ActFn::Softmax => ComponentKind::Softmax,
        }
    }

    pub fn propagate(&self, input: ArrayView2<f32>, output: &mut Array2<f32>) {
        ensure_shape(output, input.dim());

        match self.act_fn {
            ActFn::Sigmoid => output.zip_mut_with(&input, |y, &x| *y = 1. / (1. + (-x).exp())),
            ActFn::Tanh => output.zip_mut_with(&input, |y, &x| *y = x.tanh()),
            ActFn::Softmax => {
                output.assign(&input);
                for mut row in output.axis_iter_mut(Axis(0)) {
                    let max = row.fold(f32::NEG_INFINITY, |m, &x| m.max(x));
                    row.mapv_inplace(|x| (x - max).exp());
                    let sum = row.sum();
                    row /= sum;
                }
            }
        }
    }

    /// Computes the input gradient out of the forward output and the output gradient.
    pub fn backpropagate(
        &self,
        output: ArrayView2<f32>,
        diff: ArrayView2<f32>,
        in_diff: &mut Array2<f32>,
    ) {
        ensure_shape(in_diff, diff.dim());

        match self.act_fn {
            ActFn::Sigmoid => Zip::from(in_diff)
                .and(&output)
                .and(&diff)
                .for_each(|d, &y, &e| *d = e * y * (1. - y)),
            ActFn::Tanh => Zip::from(in_diff)
                .and(&output)
                .and(&diff)
                .for_each(|d, &y, &e| *d = e * (1. - y * y)),
            ActFn::Softmax => {
                let dot = (&output * &diff).sum_axis(Axis(1)).insert_axis(Axis(1));
                Zip::from(in_diff)
                    .and(&output)
                    .and(&diff)
                    .and_broadcast(&dot)
                    .for_each(|d, &y, &e, &s| *d = y * (e - s));
            }
        }
    }
}
