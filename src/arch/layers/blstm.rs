use std::io::{BufRead, Write};

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, s};
use rand::Rng;

use super::{
    ensure_shape,
    lstm::{LstmCell, LstmState, init_options, read_header},
};
use crate::{
    NnetErr, Result,
    arch::{proto::ProtoLine, updatable::UpdatableComponent},
    io::{TokenReader, TokenWriter},
    options::TrainOptions,
};

/// A bidirectional LSTM with recurrent projections.
///
/// Every stream is a whole sequence: both directions start from a zero state,
/// and frames past a stream's length (see `set_seq_lengths`) are masked out.
/// The output is the forward projection followed by the backward one.
#[derive(Debug, Clone)]
pub struct BLstmProjectedStreams {
    fwd: LstmCell,
    bwd: LstmCell,
    seq_lengths: Vec<usize>,
    mask: Array2<f32>,
    opts: TrainOptions,
}

impl BLstmProjectedStreams {
    /// Creates a zero initialized `BLstmProjectedStreams`.
    ///
    /// # Arguments
    /// * `input_dim` - The input width.
    /// * `cell_dim` - The cell width of each direction.
    /// * `proj_dim` - The projection width of each direction, half the output width.
    pub fn new(input_dim: usize, cell_dim: usize, proj_dim: usize) -> Self {
        Self::from_cells(
            LstmCell::zeros(input_dim, cell_dim, proj_dim),
            LstmCell::zeros(input_dim, cell_dim, proj_dim),
        )
    }

    fn from_cells(fwd: LstmCell, bwd: LstmCell) -> Self {
        Self {
            fwd,
            bwd,
            seq_lengths: Vec::new(),
            mask: Array2::zeros((0, 1)),
            opts: TrainOptions::default(),
        }
    }

    pub(crate) fn init<R: Rng>(proto: &mut ProtoLine, rng: &mut R) -> Result<Self> {
        let proj_dim = half_output(proto.output_dim())?;
        let (cell_dim, clip_gradient, param_scale) = init_options(proto)?;

        let input_dim = proto.input_dim();
        let mut fwd = LstmCell::random(input_dim, cell_dim, proj_dim, param_scale, rng)?;
        let mut bwd = LstmCell::random(input_dim, cell_dim, proj_dim, param_scale, rng)?;
        fwd.set_clip_gradient(clip_gradient);
        bwd.set_clip_gradient(clip_gradient);
        Ok(Self::from_cells(fwd, bwd))
    }

    pub fn input_dim(&self) -> usize {
        self.fwd.input_dim()
    }

    pub fn output_dim(&self) -> usize {
        2 * self.fwd.proj_dim()
    }

    pub fn cell_dim(&self) -> usize {
        self.fwd.cell_dim()
    }

    pub fn seq_lengths(&self) -> &[usize] {
        &self.seq_lengths
    }

    /// Sets one length per stream. An empty slice means a single, unmasked stream.
    pub fn set_seq_lengths(&mut self, lengths: &[usize]) {
        self.seq_lengths = lengths.to_vec();
    }

    fn num_streams(&self) -> usize {
        self.seq_lengths.len().max(1)
    }

    fn build_mask(&self, rows: usize) -> Array2<f32> {
        let streams = self.num_streams();
        if self.seq_lengths.is_empty() {
            return Array2::ones((rows, 1));
        }

        Array2::from_shape_fn((rows, 1), |(row, _)| {
            let (t, stream) = (row / streams, row % streams);
            if t < self.seq_lengths[stream] { 1.0 } else { 0.0 }
        })
    }

    pub fn propagate(&mut self, input: ArrayView2<f32>, output: &mut Array2<f32>) -> Result<()> {
        let streams = self.num_streams();
        if input.nrows() % streams != 0 {
            return Err(NnetErr::SizeMismatch {
                what: "blstm frames (rows must be a multiple of the streams)",
                got: input.nrows(),
                expected: input.nrows().next_multiple_of(streams),
            });
        }

        self.mask = self.build_mask(input.nrows());
        let (c_dim, r_dim) = (self.cell_dim(), self.fwd.proj_dim());

        let mut state = LstmState::zeros(streams, c_dim, r_dim);
        let fwd = self.fwd.forward(input, streams, false, &self.mask, &mut state);
        let mut state = LstmState::zeros(streams, c_dim, r_dim);
        let bwd = self.bwd.forward(input, streams, true, &self.mask, &mut state);

        ensure_shape(output, (input.nrows(), self.output_dim()));
        output.slice_mut(s![.., ..r_dim]).assign(&fwd);
        output.slice_mut(s![.., r_dim..]).assign(&bwd);
        Ok(())
    }

    pub fn backpropagate(&mut self, diff: ArrayView2<f32>, in_diff: &mut Array2<f32>) -> Result<()> {
        if diff.ncols() != self.output_dim() {
            return Err(NnetErr::SizeMismatch {
                what: "blstm output gradient columns",
                got: diff.ncols(),
                expected: self.output_dim(),
            });
        }

        let r_dim = self.fwd.proj_dim();
        let mut d = self.fwd.backward(diff.slice(s![.., ..r_dim]), &self.mask)?;
        d += &self.bwd.backward(diff.slice(s![.., r_dim..]), &self.mask)?;

        ensure_shape(in_diff, d.dim());
        in_diff.assign(&d);
        Ok(())
    }

    pub(crate) fn read_data<R: BufRead>(
        reader: &mut TokenReader<R>,
        input_dim: usize,
        output_dim: usize,
    ) -> Result<Self> {
        let proj_dim = half_output(output_dim)?;
        let (cell_dim, clip_gradient) = read_header(reader, "<BLstmProjectedStreams>")?;

        let mut fwd = LstmCell::zeros(input_dim, cell_dim, proj_dim);
        let mut bwd = LstmCell::zeros(input_dim, cell_dim, proj_dim);
        fwd.set_clip_gradient(clip_gradient);
        bwd.set_clip_gradient(clip_gradient);
        fwd.read_params(reader)?;
        bwd.read_params(reader)?;
        Ok(Self::from_cells(fwd, bwd))
    }

    pub(crate) fn write_data<W: Write>(&self, writer: &mut TokenWriter<W>) -> Result<()> {
        writer.write_token("<CellDim>")?;
        writer.write_int(self.cell_dim())?;
        writer.write_token("<ClipGradient>")?;
        writer.write_float(self.fwd.clip_gradient())?;
        writer.newline()?;
        self.fwd.write_params(writer)?;
        self.bwd.write_params(writer)
    }

    pub fn info(&self) -> String {
        format!(
            "cell-dim {}, num-streams {}{}{}",
            self.cell_dim(),
            self.num_streams(),
            self.fwd.info("fw_"),
            self.bwd.info("bw_")
        )
    }
}

fn half_output(output_dim: usize) -> Result<usize> {
    if output_dim % 2 != 0 {
        return Err(NnetErr::parse(format!(
            "<BLstmProjectedStreams> needs an even output dim, got {output_dim}"
        )));
    }

    Ok(output_dim / 2)
}

impl UpdatableComponent for BLstmProjectedStreams {
    fn num_params(&self) -> usize {
        self.fwd.num_params() + self.bwd.num_params()
    }

    fn params(&self) -> Array1<f32> {
        self.fwd.params().into_iter().chain(self.bwd.params()).collect()
    }

    fn set_params(&mut self, params: ArrayView1<f32>) -> Result<()> {
        if params.len() != self.num_params() {
            return Err(NnetErr::SizeMismatch {
                what: "parameter vector",
                got: params.len(),
                expected: self.num_params(),
            });
        }

        let (fwd, bwd) = params.split_at(Axis(0), self.fwd.num_params());
        self.fwd.set_params(fwd)?;
        self.bwd.set_params(bwd)
    }

    fn gradient(&self) -> Array1<f32> {
        self.fwd.gradient().into_iter().chain(self.bwd.gradient()).collect()
    }

    fn train_options(&self) -> &TrainOptions {
        &self.opts
    }

    fn set_train_options(&mut self, opts: TrainOptions) {
        self.opts = opts;
    }

    fn update(&mut self, input: ArrayView2<f32>, _diff: ArrayView2<f32>) -> Result<()> {
        self.fwd.update(input, &self.opts)?;
        self.bwd.update(input, &self.opts)
    }

    fn info_gradient(&self) -> String {
        format!(
            "{}{}",
            self.fwd.info_gradient("fw_"),
            self.bwd.info_gradient("bw_")
        )
    }
}
