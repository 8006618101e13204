use std::io::{BufRead, Write};

use ndarray::{Array2, ArrayView2};
use ndarray_rand::RandomExt;
use rand::{Rng, SeedableRng, rngs::StdRng};
use rand_distr::Bernoulli;

use super::ensure_shape;
use crate::{
    NnetErr, Result,
    arch::proto::ProtoLine,
    io::{TokenReader, TokenWriter},
};

/// Zeroes each activation with probability `1 - retention` and rescales the
/// survivors by `1 / retention`, keeping the expected activation unchanged.
#[derive(Debug, Clone)]
pub struct Dropout {
    dim: usize,
    retention: f32,
    mask: Array2<f32>,
    rng: StdRng,
}

impl Dropout {
    /// Creates a new `Dropout`.
    ///
    /// # Arguments
    /// * `dim` - The input and output width.
    /// * `retention` - The probability of keeping an activation, in `(0, 1]`.
    /// * `rng` - The source the private mask generator gets seeded from.
    pub fn new<R: Rng>(dim: usize, retention: f32, rng: &mut R) -> Result<Self> {
        check_retention(retention)?;

        Ok(Self {
            dim,
            retention,
            mask: Array2::zeros((0, 0)),
            rng: StdRng::from_rng(rng),
        })
    }

    pub(crate) fn init<R: Rng>(proto: &mut ProtoLine, rng: &mut R) -> Result<Self> {
        let retention = proto.take_or("<DropoutRetention>", 0.5f32)?;
        Self::new(proto.input_dim(), retention, rng)
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn retention(&self) -> f32 {
        self.retention
    }

    pub fn set_retention(&mut self, retention: f32) -> Result<()> {
        check_retention(retention)?;
        self.retention = retention;
        Ok(())
    }

    pub fn propagate(&mut self, input: ArrayView2<f32>, output: &mut Array2<f32>) -> Result<()> {
        ensure_shape(output, input.dim());

        if self.retention >= 1.0 {
            self.mask = Array2::ones(input.dim());
            output.assign(&input);
            return Ok(());
        }

        let bernoulli = Bernoulli::new(self.retention as f64)
            .map_err(|e| NnetErr::parse(format!("<DropoutRetention>: {e}")))?;
        let scale = 1.0 / self.retention;
        self.mask = Array2::random_using(input.dim(), bernoulli, &mut self.rng)
            .mapv(|keep| if keep { scale } else { 0.0 });

        output.assign(&input);
        *output *= &self.mask;
        Ok(())
    }

    pub fn backpropagate(&self, diff: ArrayView2<f32>, in_diff: &mut Array2<f32>) -> Result<()> {
        if self.mask.dim() != diff.dim() {
            return Err(NnetErr::NotPropagated);
        }

        ensure_shape(in_diff, diff.dim());
        in_diff.assign(&diff);
        *in_diff *= &self.mask;
        Ok(())
    }

    pub(crate) fn read_data<R: BufRead, G: Rng>(
        reader: &mut TokenReader<R>,
        dim: usize,
        rng: &mut G,
    ) -> Result<Self> {
        reader.expect_token("<DropoutRetention>")?;
        let retention = reader.read_float()?;
        Self::new(dim, retention, rng)
    }

    pub(crate) fn write_data<W: Write>(&self, writer: &mut TokenWriter<W>) -> Result<()> {
        writer.write_token("<DropoutRetention>")?;
        writer.write_float(self.retention)?;
        writer.newline()
    }

    pub fn info(&self) -> String {
        format!("dropout-retention {}", self.retention)
    }
}

fn check_retention(retention: f32) -> Result<()> {
    if !(retention > 0.0 && retention <= 1.0) {
        return Err(NnetErr::parse(format!(
            "dropout retention must be in (0, 1], got {retention}"
        )));
    }

    Ok(())
}
