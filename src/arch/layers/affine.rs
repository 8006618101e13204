use std::io::{BufRead, Write};

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, Zip, linalg};
use ndarray_rand::RandomExt;
use rand::Rng;
use rand_distr::{Normal, Uniform};

use super::ensure_shape;
use crate::{
    NnetErr, Result,
    arch::{
        proto::ProtoLine,
        updatable::{UpdatableComponent, assign_flat, split},
    },
    io::{TokenReader, TokenWriter},
    options::TrainOptions,
    stats::moment_statistics,
};

/// A fully connected layer: `y = x * W^T + b`.
///
/// The weight matrix is stored as `(output_dim, input_dim)`, so the flattened
/// parameters are the rows of `W` one after the other followed by `b`.
#[derive(Debug, Clone)]
pub struct AffineTransform {
    linearity: Array2<f32>,
    bias: Array1<f32>,
    linearity_corr: Array2<f32>,
    bias_corr: Array1<f32>,
    learn_rate_coef: f32,
    bias_learn_rate_coef: f32,
    opts: TrainOptions,
}

impl AffineTransform {
    /// Creates a new `AffineTransform`.
    ///
    /// # Arguments
    /// * `linearity` - The `(output_dim, input_dim)` weight matrix.
    /// * `bias` - The `output_dim` bias vector.
    ///
    /// # Returns
    /// A new `AffineTransform` or an error if the shapes disagree.
    pub fn new(linearity: Array2<f32>, bias: Array1<f32>) -> Result<Self> {
        if linearity.nrows() != bias.len() {
            return Err(NnetErr::SizeMismatch {
                what: "affine bias",
                got: bias.len(),
                expected: linearity.nrows(),
            });
        }

        Ok(Self {
            linearity_corr: Array2::zeros(linearity.dim()),
            bias_corr: Array1::zeros(bias.len()),
            linearity,
            bias,
            learn_rate_coef: 1.0,
            bias_learn_rate_coef: 1.0,
            opts: TrainOptions::default(),
        })
    }

    /// Creates a zero initialized `AffineTransform`.
    pub fn zeros(input_dim: usize, output_dim: usize) -> Self {
        Self {
            linearity: Array2::zeros((output_dim, input_dim)),
            bias: Array1::zeros(output_dim),
            linearity_corr: Array2::zeros((output_dim, input_dim)),
            bias_corr: Array1::zeros(output_dim),
            learn_rate_coef: 1.0,
            bias_learn_rate_coef: 1.0,
            opts: TrainOptions::default(),
        }
    }

    /// Builds a randomly initialized `AffineTransform` out of its prototype.
    ///
    /// The weights are drawn from `N(0, <ParamStddev>)` and the biases uniformly
    /// from `<BiasMean> +- <BiasRange> / 2`.
    pub(crate) fn init<R: Rng>(proto: &mut ProtoLine, rng: &mut R) -> Result<Self> {
        let param_stddev = proto.take_or("<ParamStddev>", 0.1f32)?;
        let bias_mean = proto.take_or("<BiasMean>", -2.0f32)?;
        let bias_range = proto.take_or("<BiasRange>", 2.0f32)?;
        let learn_rate_coef = proto.take_or("<LearnRateCoef>", 1.0f32)?;
        let bias_learn_rate_coef = proto.take_or("<BiasLearnRateCoef>", 1.0f32)?;

        let normal =
            Normal::new(0.0, param_stddev).map_err(|e| NnetErr::parse(format!("<ParamStddev>: {e}")))?;
        let uniform =
            Uniform::new(-0.5f32, 0.5).map_err(|e| NnetErr::parse(format!("<BiasRange>: {e}")))?;

        let shape = (proto.output_dim(), proto.input_dim());
        let linearity = Array2::random_using(shape, normal, rng);
        let bias = Array1::random_using(proto.output_dim(), uniform, rng)
            .mapv_into(|u| bias_mean + u * bias_range);

        let mut affine = Self::new(linearity, bias)?;
        affine.learn_rate_coef = learn_rate_coef;
        affine.bias_learn_rate_coef = bias_learn_rate_coef;
        Ok(affine)
    }

    pub fn input_dim(&self) -> usize {
        self.linearity.ncols()
    }

    pub fn output_dim(&self) -> usize {
        self.linearity.nrows()
    }

    pub fn linearity(&self) -> &Array2<f32> {
        &self.linearity
    }

    pub fn bias(&self) -> &Array1<f32> {
        &self.bias
    }

    pub fn set_linearity(&mut self, linearity: Array2<f32>) -> Result<()> {
        if linearity.dim() != self.linearity.dim() {
            return Err(NnetErr::SizeMismatch {
                what: "affine linearity",
                got: linearity.len(),
                expected: self.linearity.len(),
            });
        }

        self.linearity = linearity;
        Ok(())
    }

    pub fn set_bias(&mut self, bias: Array1<f32>) -> Result<()> {
        if bias.len() != self.bias.len() {
            return Err(NnetErr::SizeMismatch {
                what: "affine bias",
                got: bias.len(),
                expected: self.bias.len(),
            });
        }

        self.bias = bias;
        Ok(())
    }

    pub fn propagate(&self, input: ArrayView2<f32>, output: &mut Array2<f32>) {
        ensure_shape(output, (input.nrows(), self.output_dim()));
        linalg::general_mat_mul(1.0, &input, &self.linearity.t(), 0.0, output);
        *output += &self.bias;
    }

    pub fn backpropagate(&self, diff: ArrayView2<f32>, in_diff: &mut Array2<f32>) {
        ensure_shape(in_diff, (diff.nrows(), self.input_dim()));
        linalg::general_mat_mul(1.0, &diff, &self.linearity, 0.0, in_diff);
    }

    pub(crate) fn read_data<R: BufRead>(
        reader: &mut TokenReader<R>,
        input_dim: usize,
        output_dim: usize,
    ) -> Result<Self> {
        let mut learn_rate_coef = 1.0;
        let mut bias_learn_rate_coef = 1.0;

        while reader.peek_marker()? {
            match reader.read_token()?.as_str() {
                "<LearnRateCoef>" => learn_rate_coef = reader.read_float()?,
                "<BiasLearnRateCoef>" => bias_learn_rate_coef = reader.read_float()?,
                token => {
                    return Err(NnetErr::parse(format!(
                        "unknown token {token} in <AffineTransform>"
                    )));
                }
            }
        }

        let linearity = reader.read_matrix(output_dim, input_dim)?;
        let bias = reader.read_vector(output_dim)?;

        let mut affine = Self::new(linearity, bias)?;
        affine.learn_rate_coef = learn_rate_coef;
        affine.bias_learn_rate_coef = bias_learn_rate_coef;
        Ok(affine)
    }

    pub(crate) fn write_data<W: Write>(&self, writer: &mut TokenWriter<W>) -> Result<()> {
        writer.write_token("<LearnRateCoef>")?;
        writer.write_float(self.learn_rate_coef)?;
        writer.write_token("<BiasLearnRateCoef>")?;
        writer.write_float(self.bias_learn_rate_coef)?;
        writer.newline()?;
        writer.write_matrix(&self.linearity)?;
        writer.write_vector(&self.bias)
    }

    pub fn info(&self) -> String {
        format!(
            "\n  linearity {}\n  bias {}",
            moment_statistics(&self.linearity),
            moment_statistics(&self.bias)
        )
    }

    fn sizes(&self) -> [usize; 2] {
        [self.linearity.len(), self.bias.len()]
    }
}

/// Shrinks every non-zero weight towards zero by `l1`, clamping it (and its
/// correction) at zero when the step would make it cross over.
fn regularize_l1(weights: &mut Array2<f32>, corr: &mut Array2<f32>, l1: f32, lr: f32) {
    Zip::from(weights).and(corr).for_each(|w, g| {
        if *w == 0.0 {
            return;
        }

        let l1_signed = l1 * w.signum();
        let after = *w - lr * *g - l1_signed;
        if (after > 0.0) != (*w > 0.0) {
            *w = 0.0;
            *g = 0.0;
        } else {
            *w -= l1_signed;
        }
    });
}

impl UpdatableComponent for AffineTransform {
    fn num_params(&self) -> usize {
        self.linearity.len() + self.bias.len()
    }

    fn params(&self) -> Array1<f32> {
        self.linearity.iter().chain(&self.bias).copied().collect()
    }

    fn set_params(&mut self, params: ArrayView1<f32>) -> Result<()> {
        let chunks = split(params, &self.sizes())?;
        assign_flat(&mut self.linearity, chunks[0]);
        assign_flat(&mut self.bias, chunks[1]);
        Ok(())
    }

    fn gradient(&self) -> Array1<f32> {
        self.linearity_corr
            .iter()
            .chain(&self.bias_corr)
            .copied()
            .collect()
    }

    fn train_options(&self) -> &TrainOptions {
        &self.opts
    }

    fn set_train_options(&mut self, opts: TrainOptions) {
        self.opts = opts;
    }

    fn update(&mut self, input: ArrayView2<f32>, diff: ArrayView2<f32>) -> Result<()> {
        if input.nrows() != diff.nrows() {
            return Err(NnetErr::SizeMismatch {
                what: "affine update frames",
                got: diff.nrows(),
                expected: input.nrows(),
            });
        }

        let TrainOptions {
            learn_rate: lr,
            momentum: mmt,
            l1_penalty: l1,
            l2_penalty: l2,
        } = self.opts;
        let num_frames = input.nrows() as f32;

        linalg::general_mat_mul(1.0, &diff.t(), &input, mmt, &mut self.linearity_corr);
        self.bias_corr *= mmt;
        self.bias_corr += &diff.sum_axis(Axis(0));

        if l2 != 0.0 {
            self.linearity *= 1.0 - lr * l2 * num_frames;
        }
        if l1 != 0.0 {
            regularize_l1(
                &mut self.linearity,
                &mut self.linearity_corr,
                lr * l1 * num_frames,
                lr,
            );
        }

        self.linearity
            .scaled_add(-lr * self.learn_rate_coef, &self.linearity_corr);
        self.bias
            .scaled_add(-lr * self.bias_learn_rate_coef, &self.bias_corr);
        Ok(())
    }

    fn info_gradient(&self) -> String {
        format!(
            "\n  linearity_grad {}, lr-coef {}\n  bias_grad {}, lr-coef {}",
            moment_statistics(&self.linearity_corr),
            self.learn_rate_coef,
            moment_statistics(&self.bias_corr),
            self.bias_learn_rate_coef
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn affine() -> AffineTransform {
        AffineTransform::new(array![[1.0, 0.0, -1.0], [0.5, 2.0, 0.0]], array![0.1, -0.1]).unwrap()
    }

    #[test]
    fn propagate_applies_weights_and_bias() {
        let layer = affine();
        let mut out = Array2::zeros((0, 0));
        layer.propagate(array![[1.0, 1.0, 1.0], [2.0, 0.0, 1.0]].view(), &mut out);

        assert_eq!(out, array![[0.1, 2.4], [1.1, 0.9]]);
    }

    #[test]
    fn backpropagate_multiplies_by_linearity() {
        let layer = affine();
        let mut in_diff = Array2::zeros((0, 0));
        layer.backpropagate(array![[1.0, 2.0]].view(), &mut in_diff);

        assert_eq!(in_diff, array![[2.0, 4.0, -1.0]]);
    }

    #[test]
    fn update_descends_along_the_correction() {
        let mut layer = affine();
        layer.set_train_options(TrainOptions::with_learn_rate(0.5));
        let input = array![[1.0, 0.0, 2.0]];
        let diff = array![[1.0, -1.0]];

        layer.update(input.view(), diff.view()).unwrap();

        assert_eq!(
            layer.gradient(),
            array![1.0, 0.0, 2.0, -1.0, 0.0, -2.0, 1.0, -1.0]
        );
        assert_eq!(
            layer.linearity(),
            array![[0.5, 0.0, -2.0], [1.0, 2.0, 1.0]]
        );
        assert_eq!(layer.bias(), array![-0.4, 0.4]);
    }

    #[test]
    fn params_are_row_major_weights_then_bias() {
        let mut layer = affine();
        let params = layer.params();
        assert_eq!(params, array![1.0, 0.0, -1.0, 0.5, 2.0, 0.0, 0.1, -0.1]);

        let doubled = params.mapv(|p| 2.0 * p);
        layer.set_params(doubled.view()).unwrap();
        assert_eq!(layer.params(), doubled);
        assert!(layer.set_params(params.slice(ndarray::s![..3])).is_err());
    }

    #[test]
    fn l1_clamps_weights_that_would_change_sign() {
        let mut weights = array![[0.05, -1.0, 0.0]];
        let mut corr = array![[0.0, 0.0, 1.0]];
        regularize_l1(&mut weights, &mut corr, 0.1, 1.0);

        assert_eq!(weights, array![[0.0, -0.9, 0.0]]);
        assert_eq!(corr, array![[0.0, 0.0, 1.0]]);
    }

    #[test]
    fn l1_clamp_also_zeroes_the_correction() {
        let mut weights = array![[0.0625, 0.5]];
        let mut corr = array![[0.5, 0.25]];
        regularize_l1(&mut weights, &mut corr, 0.125, 1.0);
        assert_eq!(weights, array![[0.0, 0.375]]);
        assert_eq!(corr, array![[0.0, 0.25]]);

        // landing exactly on zero counts as crossing over
        let mut weights = array![[0.5]];
        let mut corr = array![[0.25]];
        regularize_l1(&mut weights, &mut corr, 0.25, 1.0);
        assert_eq!(weights, array![[0.0]]);
        assert_eq!(corr, array![[0.0]]);
    }

    #[test]
    fn setters_reject_other_shapes() {
        let mut layer = affine();
        layer.set_linearity(Array2::ones((2, 3))).unwrap();
        layer.set_bias(array![1.0, 2.0]).unwrap();

        let mut out = Array2::zeros((0, 0));
        layer.propagate(array![[1.0, 2.0, 3.0]].view(), &mut out);
        assert_eq!(out, array![[7.0, 8.0]]);

        assert!(layer.set_linearity(Array2::ones((3, 2))).is_err());
        assert!(layer.set_bias(array![1.0]).is_err());
    }
}
