use ndarray::{Array1, ArrayBase, ArrayView1, ArrayView2, Axis, DataMut, Dimension};

use crate::{NnetErr, Result, options::TrainOptions};

/// The capability of the components that hold trainable parameters.
///
/// The flattened parameter and gradient layouts must agree: element `k` of
/// `gradient()` is the accumulated correction of element `k` of `params()`.
pub trait UpdatableComponent {
    /// Returns the amount of trainable parameters.
    fn num_params(&self) -> usize;

    /// Returns every trainable parameter flattened into a single vector.
    fn params(&self) -> Array1<f32>;

    /// Overwrites every trainable parameter from a flattened vector.
    ///
    /// # Arguments
    /// * `params` - A vector of exactly `num_params()` elements laid out as in `params()`.
    ///
    /// # Returns
    /// An error if the vector has the wrong length.
    fn set_params(&mut self, params: ArrayView1<f32>) -> Result<()>;

    /// Returns the accumulated corrections of the last update, flattened like `params()`.
    fn gradient(&self) -> Array1<f32>;

    fn train_options(&self) -> &TrainOptions;

    fn set_train_options(&mut self, opts: TrainOptions);

    /// Updates the parameters in place.
    ///
    /// # Arguments
    /// * `input` - The forward input this component received in the last propagate.
    /// * `diff` - The gradient with respect to this component's output.
    fn update(&mut self, input: ArrayView2<f32>, diff: ArrayView2<f32>) -> Result<()>;

    /// Free form statistics of the accumulated corrections.
    fn info_gradient(&self) -> String;
}

/// Splits a flat parameter vector into consecutive chunks of the given sizes.
///
/// # Returns
/// The chunks, or an error if the sizes don't add up to the vector's length.
pub(crate) fn split<'a>(
    params: ArrayView1<'a, f32>,
    sizes: &[usize],
) -> Result<Vec<ArrayView1<'a, f32>>> {
    let expected: usize = sizes.iter().sum();
    if params.len() != expected {
        return Err(NnetErr::SizeMismatch {
            what: "parameter vector",
            got: params.len(),
            expected,
        });
    }

    let mut chunks = Vec::with_capacity(sizes.len());
    let mut rest = params;
    for &size in sizes {
        let (head, tail) = rest.split_at(Axis(0), size);
        chunks.push(head);
        rest = tail;
    }

    Ok(chunks)
}

/// Copies a flat chunk into an array of any dimension, in logical row-major order.
pub(crate) fn assign_flat<S, D>(dst: &mut ArrayBase<S, D>, src: ArrayView1<f32>)
where
    S: DataMut<Elem = f32>,
    D: Dimension,
{
    dst.iter_mut().zip(src).for_each(|(d, &s)| *d = s);
}
