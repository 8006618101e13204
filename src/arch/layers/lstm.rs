use std::io::{BufRead, Write};

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, Zip, linalg, s};
use ndarray_rand::RandomExt;
use rand::Rng;
use rand_distr::Uniform;

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

/// The recurrent state of every stream: one row per stream.
#[derive(Debug, Clone)]
pub(crate) struct LstmState {
    c: Array2<f32>,
    r: Array2<f32>,
}

impl LstmState {
    pub(crate) fn zeros(streams: usize, cell_dim: usize, proj_dim: usize) -> Self {
        Self {
            c: Array2::zeros((streams, cell_dim)),
            r: Array2::zeros((streams, proj_dim)),
        }
    }

    pub(crate) fn streams(&self) -> usize {
        self.c.nrows()
    }

    fn reset(&mut self, stream: usize) {
        self.c.row_mut(stream).fill(0.0);
        self.r.row_mut(stream).fill(0.0);
    }
}

/// Everything the last forward and backward passes left behind, one row per frame.
#[derive(Debug, Clone, Default)]
struct Trace {
    streams: usize,
    reverse: bool,
    gifo: Array2<f32>,
    c: Array2<f32>,
    h: Array2<f32>,
    m: Array2<f32>,
    c_prev: Array2<f32>,
    r_prev: Array2<f32>,
    d_gifo: Array2<f32>,
    d_r: Array2<f32>,
}

fn sigmoid(x: Array2<f32>) -> Array2<f32> {
    x.mapv_into(|v| 1. / (1. + (-v).exp()))
}

/// Iterates the frames in processing order.
fn frames(len: usize, reverse: bool) -> Box<dyn Iterator<Item = usize>> {
    if reverse {
        Box::new((0..len).rev())
    } else {
        Box::new(0..len)
    }
}

/// One direction of a long short-term memory with peephole connections and a
/// recurrent projection layer.
///
/// The gate pre-activations are stacked as `[g, i, f, o]`, each `cell_dim` wide.
/// Input rows are laid out frame major: row `t * streams + s` holds frame `t`
/// of stream `s`.
#[derive(Debug, Clone)]
pub(crate) struct LstmCell {
    clip_gradient: f32,

    w_gifo_x: Array2<f32>,
    w_gifo_r: Array2<f32>,
    bias: Array1<f32>,
    peephole_i_c: Array1<f32>,
    peephole_f_c: Array1<f32>,
    peephole_o_c: Array1<f32>,
    w_r_m: Array2<f32>,

    w_gifo_x_corr: Array2<f32>,
    w_gifo_r_corr: Array2<f32>,
    bias_corr: Array1<f32>,
    peephole_i_c_corr: Array1<f32>,
    peephole_f_c_corr: Array1<f32>,
    peephole_o_c_corr: Array1<f32>,
    w_r_m_corr: Array2<f32>,

    trace: Trace,
}

impl LstmCell {
    pub(crate) fn zeros(input_dim: usize, cell_dim: usize, proj_dim: usize) -> Self {
        let gifo = 4 * cell_dim;

        Self {
            clip_gradient: 0.0,
            w_gifo_x: Array2::zeros((gifo, input_dim)),
            w_gifo_r: Array2::zeros((gifo, proj_dim)),
            bias: Array1::zeros(gifo),
            peephole_i_c: Array1::zeros(cell_dim),
            peephole_f_c: Array1::zeros(cell_dim),
            peephole_o_c: Array1::zeros(cell_dim),
            w_r_m: Array2::zeros((proj_dim, cell_dim)),
            w_gifo_x_corr: Array2::zeros((gifo, input_dim)),
            w_gifo_r_corr: Array2::zeros((gifo, proj_dim)),
            bias_corr: Array1::zeros(gifo),
            peephole_i_c_corr: Array1::zeros(cell_dim),
            peephole_f_c_corr: Array1::zeros(cell_dim),
            peephole_o_c_corr: Array1::zeros(cell_dim),
            w_r_m_corr: Array2::zeros((proj_dim, cell_dim)),
            trace: Trace::default(),
        }
    }

    /// Creates a cell whose parameters are drawn uniformly from `[-scale, scale)`.
    pub(crate) fn random<R: Rng>(
        input_dim: usize,
        cell_dim: usize,
        proj_dim: usize,
        scale: f32,
        rng: &mut R,
    ) -> Result<Self> {
        let mut cell = Self::zeros(input_dim, cell_dim, proj_dim);
        let uniform =
            Uniform::new(-scale, scale).map_err(|e| NnetErr::parse(format!("<ParamScale>: {e}")))?;

        let params = Array1::random_using(cell.num_params(), uniform, rng);
        cell.set_params(params.view())?;
        Ok(cell)
    }

    pub(crate) fn input_dim(&self) -> usize {
        self.w_gifo_x.ncols()
    }

    pub(crate) fn cell_dim(&self) -> usize {
        self.peephole_i_c.len()
    }

    pub(crate) fn proj_dim(&self) -> usize {
        self.w_r_m.nrows()
    }

    pub(crate) fn clip_gradient(&self) -> f32 {
        self.clip_gradient
    }

    pub(crate) fn set_clip_gradient(&mut self, clip_gradient: f32) {
        self.clip_gradient = clip_gradient;
    }

    fn sizes(&self) -> [usize; 7] {
        [
            self.w_gifo_x.len(),
            self.w_gifo_r.len(),
            self.bias.len(),
            self.peephole_i_c.len(),
            self.peephole_f_c.len(),
            self.peephole_o_c.len(),
            self.w_r_m.len(),
        ]
    }

    pub(crate) fn num_params(&self) -> usize {
        self.sizes().iter().sum()
    }

    pub(crate) fn params(&self) -> Array1<f32> {
        self.w_gifo_x
            .iter()
            .chain(&self.w_gifo_r)
            .chain(&self.bias)
            .chain(&self.peephole_i_c)
            .chain(&self.peephole_f_c)
            .chain(&self.peephole_o_c)
            .chain(&self.w_r_m)
            .copied()
            .collect()
    }

    pub(crate) fn set_params(&mut self, params: ArrayView1<f32>) -> Result<()> {
        let chunks = split(params, &self.sizes())?;
        assign_flat(&mut self.w_gifo_x, chunks[0]);
        assign_flat(&mut self.w_gifo_r, chunks[1]);
        assign_flat(&mut self.bias, chunks[2]);
        assign_flat(&mut self.peephole_i_c, chunks[3]);
        assign_flat(&mut self.peephole_f_c, chunks[4]);
        assign_flat(&mut self.peephole_o_c, chunks[5]);
        assign_flat(&mut self.w_r_m, chunks[6]);
        Ok(())
    }

    pub(crate) fn gradient(&self) -> Array1<f32> {
        self.w_gifo_x_corr
            .iter()
            .chain(&self.w_gifo_r_corr)
            .chain(&self.bias_corr)
            .chain(&self.peephole_i_c_corr)
            .chain(&self.peephole_f_c_corr)
            .chain(&self.peephole_o_c_corr)
            .chain(&self.w_r_m_corr)
            .copied()
            .collect()
    }

    /// Runs the cell over every frame of a batch.
    ///
    /// # Arguments
    /// * `input` - `frames * streams` rows of input features.
    /// * `streams` - The number of interleaved streams.
    /// * `reverse` - Whether time runs from the last frame to the first.
    /// * `mask` - A `(rows, 1)` column of ones and zeros, zero rows don't carry state.
    /// * `state` - The state to start from, overwritten with the state after the last frame.
    ///
    /// # Returns
    /// The projected output of every frame.
    pub(crate) fn forward(
        &mut self,
        input: ArrayView2<f32>,
        streams: usize,
        reverse: bool,
        mask: &Array2<f32>,
        state: &mut LstmState,
    ) -> Array2<f32> {
        let rows = input.nrows();
        let nframes = rows / streams;
        let (c_dim, r_dim) = (self.cell_dim(), self.proj_dim());

        let mut x_gifo = input.dot(&self.w_gifo_x.t());
        x_gifo += &self.bias;

        let mut trace = Trace {
            streams,
            reverse,
            gifo: Array2::zeros((rows, 4 * c_dim)),
            c: Array2::zeros((rows, c_dim)),
            h: Array2::zeros((rows, c_dim)),
            m: Array2::zeros((rows, c_dim)),
            c_prev: Array2::zeros((rows, c_dim)),
            r_prev: Array2::zeros((rows, r_dim)),
            ..Default::default()
        };
        let mut output = Array2::zeros((rows, r_dim));

        for t in frames(nframes, reverse) {
            let span = t * streams..(t + 1) * streams;
            let mask_t = mask.slice(s![span.clone(), ..]);

            let mut pre = x_gifo.slice(s![span.clone(), ..]).to_owned();
            linalg::general_mat_mul(1.0, &state.r, &self.w_gifo_r.t(), 1.0, &mut pre);

            let g = pre.slice(s![.., ..c_dim]).mapv(f32::tanh);
            let i = sigmoid(&pre.slice(s![.., c_dim..2 * c_dim]) + &(&state.c * &self.peephole_i_c));
            let f = sigmoid(
                &pre.slice(s![.., 2 * c_dim..3 * c_dim]) + &(&state.c * &self.peephole_f_c),
            );
            let c = &f * &state.c + &i * &g;
            let o = sigmoid(&pre.slice(s![.., 3 * c_dim..]) + &(&c * &self.peephole_o_c));
            let h = c.mapv(f32::tanh);
            let m = &o * &h;
            let r = m.dot(&self.w_r_m.t());

            let mut gifo = trace.gifo.slice_mut(s![span.clone(), ..]);
            gifo.slice_mut(s![.., ..c_dim]).assign(&g);
            gifo.slice_mut(s![.., c_dim..2 * c_dim]).assign(&i);
            gifo.slice_mut(s![.., 2 * c_dim..3 * c_dim]).assign(&f);
            gifo.slice_mut(s![.., 3 * c_dim..]).assign(&o);
            trace.c_prev.slice_mut(s![span.clone(), ..]).assign(&state.c);
            trace.r_prev.slice_mut(s![span.clone(), ..]).assign(&state.r);
            trace.c.slice_mut(s![span.clone(), ..]).assign(&c);
            trace.h.slice_mut(s![span.clone(), ..]).assign(&h);
            trace.m.slice_mut(s![span.clone(), ..]).assign(&m);

            state.c = c * &mask_t;
            state.r = r * &mask_t;
            output.slice_mut(s![span, ..]).assign(&state.r);
        }

        self.trace = trace;
        output
    }

    /// Backpropagates through time over the batch of the last `forward`.
    ///
    /// # Arguments
    /// * `diff` - The gradient with respect to every projected output.
    /// * `mask` - The same mask given to `forward`.
    ///
    /// # Returns
    /// The gradient with respect to the input, or an error if the shapes don't
    /// match the last forward pass.
    pub(crate) fn backward(
        &mut self,
        diff: ArrayView2<f32>,
        mask: &Array2<f32>,
    ) -> Result<Array2<f32>> {
        let rows = diff.nrows();
        if self.trace.gifo.nrows() != rows || diff.ncols() != self.proj_dim() || rows == 0 {
            return Err(NnetErr::NotPropagated);
        }

        let streams = self.trace.streams;
        let nframes = rows / streams;
        let c_dim = self.cell_dim();

        let mut d_gifo = Array2::zeros((rows, 4 * c_dim));
        let mut d_r = Array2::zeros((rows, self.proj_dim()));
        let mut dr_next = Array2::<f32>::zeros((streams, self.proj_dim()));
        let mut dc_next = Array2::<f32>::zeros((streams, c_dim));

        let trace = &self.trace;
        for t in frames(nframes, !trace.reverse) {
            let span = t * streams..(t + 1) * streams;
            let mask_t = mask.slice(s![span.clone(), ..]);

            let gifo = trace.gifo.slice(s![span.clone(), ..]);
            let g = gifo.slice(s![.., ..c_dim]);
            let i = gifo.slice(s![.., c_dim..2 * c_dim]);
            let f = gifo.slice(s![.., 2 * c_dim..3 * c_dim]);
            let o = gifo.slice(s![.., 3 * c_dim..]);
            let h = trace.h.slice(s![span.clone(), ..]);
            let c_prev = trace.c_prev.slice(s![span.clone(), ..]);

            let dr = (&diff.slice(s![span.clone(), ..]) + &dr_next) * &mask_t;
            let dm = dr.dot(&self.w_r_m);

            let mut d_o = Array2::<f32>::zeros((streams, c_dim));
            Zip::from(&mut d_o)
                .and(&dm)
                .and(&h)
                .and(&o)
                .for_each(|d, &dm, &h, &o| *d = dm * h * o * (1. - o));

            let mut dc = &dc_next * &mask_t + &d_o * &self.peephole_o_c;
            Zip::from(&mut dc)
                .and(&dm)
                .and(&o)
                .and(&h)
                .for_each(|dc, &dm, &o, &h| *dc += dm * o * (1. - h * h));

            let mut d_f = Array2::<f32>::zeros((streams, c_dim));
            Zip::from(&mut d_f)
                .and(&dc)
                .and(&c_prev)
                .and(&f)
                .for_each(|d, &dc, &cp, &f| *d = dc * cp * f * (1. - f));
            let mut d_i = Array2::<f32>::zeros((streams, c_dim));
            Zip::from(&mut d_i)
                .and(&dc)
                .and(&g)
                .and(&i)
                .for_each(|d, &dc, &g, &i| *d = dc * g * i * (1. - i));
            let mut d_g = Array2::<f32>::zeros((streams, c_dim));
            Zip::from(&mut d_g)
                .and(&dc)
                .and(&i)
                .and(&g)
                .for_each(|d, &dc, &i, &g| *d = dc * i * (1. - g * g));

            let mut d_gifo_t = d_gifo.slice_mut(s![span.clone(), ..]);
            d_gifo_t.slice_mut(s![.., ..c_dim]).assign(&d_g);
            d_gifo_t.slice_mut(s![.., c_dim..2 * c_dim]).assign(&d_i);
            d_gifo_t.slice_mut(s![.., 2 * c_dim..3 * c_dim]).assign(&d_f);
            d_gifo_t.slice_mut(s![.., 3 * c_dim..]).assign(&d_o);
            d_r.slice_mut(s![span.clone(), ..]).assign(&dr);

            dr_next = d_gifo.slice(s![span, ..]).dot(&self.w_gifo_r);
            dc_next = &dc * &f + &d_i * &self.peephole_i_c + &d_f * &self.peephole_f_c;
        }

        let in_diff = d_gifo.dot(&self.w_gifo_x);
        self.trace.d_gifo = d_gifo;
        self.trace.d_r = d_r;
        Ok(in_diff)
    }

    /// Accumulates the corrections of the last backward pass and applies them.
    pub(crate) fn update(&mut self, input: ArrayView2<f32>, opts: &TrainOptions) -> Result<()> {
        let trace = &self.trace;
        if trace.d_gifo.nrows() != input.nrows() || input.nrows() == 0 {
            return Err(NnetErr::NotPropagated);
        }

        let TrainOptions {
            learn_rate: lr,
            momentum: mmt,
            l2_penalty: l2,
            ..
        } = *opts;
        let c_dim = self.cell_dim();

        linalg::general_mat_mul(1.0, &trace.d_gifo.t(), &input, mmt, &mut self.w_gifo_x_corr);
        linalg::general_mat_mul(
            1.0,
            &trace.d_gifo.t(),
            &trace.r_prev,
            mmt,
            &mut self.w_gifo_r_corr,
        );
        linalg::general_mat_mul(1.0, &trace.d_r.t(), &trace.m, mmt, &mut self.w_r_m_corr);

        self.bias_corr *= mmt;
        self.bias_corr += &trace.d_gifo.sum_axis(Axis(0));

        let d_i = trace.d_gifo.slice(s![.., c_dim..2 * c_dim]);
        let d_f = trace.d_gifo.slice(s![.., 2 * c_dim..3 * c_dim]);
        let d_o = trace.d_gifo.slice(s![.., 3 * c_dim..]);
        self.peephole_i_c_corr *= mmt;
        self.peephole_i_c_corr += &(&d_i * &trace.c_prev).sum_axis(Axis(0));
        self.peephole_f_c_corr *= mmt;
        self.peephole_f_c_corr += &(&d_f * &trace.c_prev).sum_axis(Axis(0));
        self.peephole_o_c_corr *= mmt;
        self.peephole_o_c_corr += &(&d_o * &trace.c).sum_axis(Axis(0));

        if self.clip_gradient > 0.0 {
            let clip = self.clip_gradient;
            let clamp = |x: &mut f32| *x = x.clamp(-clip, clip);
            self.w_gifo_x_corr.map_inplace(clamp);
            self.w_gifo_r_corr.map_inplace(clamp);
            self.bias_corr.map_inplace(clamp);
            self.peephole_i_c_corr.map_inplace(clamp);
            self.peephole_f_c_corr.map_inplace(clamp);
            self.peephole_o_c_corr.map_inplace(clamp);
            self.w_r_m_corr.map_inplace(clamp);
        }

        if l2 != 0.0 {
            let decay = 1.0 - lr * l2 * input.nrows() as f32;
            self.w_gifo_x *= decay;
            self.w_gifo_r *= decay;
            self.w_r_m *= decay;
        }

        self.w_gifo_x.scaled_add(-lr, &self.w_gifo_x_corr);
        self.w_gifo_r.scaled_add(-lr, &self.w_gifo_r_corr);
        self.bias.scaled_add(-lr, &self.bias_corr);
        self.peephole_i_c.scaled_add(-lr, &self.peephole_i_c_corr);
        self.peephole_f_c.scaled_add(-lr, &self.peephole_f_c_corr);
        self.peephole_o_c.scaled_add(-lr, &self.peephole_o_c_corr);
        self.w_r_m.scaled_add(-lr, &self.w_r_m_corr);
        Ok(())
    }

    pub(crate) fn read_params<R: BufRead>(&mut self, reader: &mut TokenReader<R>) -> Result<()> {
        let (gifo, c_dim) = (4 * self.cell_dim(), self.cell_dim());

        self.w_gifo_x = reader.read_matrix(gifo, self.input_dim())?;
        self.w_gifo_r = reader.read_matrix(gifo, self.proj_dim())?;
        self.bias = reader.read_vector(gifo)?;
        self.peephole_i_c = reader.read_vector(c_dim)?;
        self.peephole_f_c = reader.read_vector(c_dim)?;
        self.peephole_o_c = reader.read_vector(c_dim)?;
        self.w_r_m = reader.read_matrix(self.proj_dim(), c_dim)?;
        Ok(())
    }

    pub(crate) fn write_params<W: Write>(&self, writer: &mut TokenWriter<W>) -> Result<()> {
        writer.write_matrix(&self.w_gifo_x)?;
        writer.write_matrix(&self.w_gifo_r)?;
        writer.write_vector(&self.bias)?;
        writer.write_vector(&self.peephole_i_c)?;
        writer.write_vector(&self.peephole_f_c)?;
        writer.write_vector(&self.peephole_o_c)?;
        writer.write_matrix(&self.w_r_m)
    }

    pub(crate) fn info(&self, prefix: &str) -> String {
        format!(
            "\n  {prefix}w_gifo_x {}\n  {prefix}w_gifo_r {}\n  {prefix}bias {}\n  {prefix}peephole_i_c {}\n  {prefix}peephole_f_c {}\n  {prefix}peephole_o_c {}\n  {prefix}w_r_m {}",
            moment_statistics(&self.w_gifo_x),
            moment_statistics(&self.w_gifo_r),
            moment_statistics(&self.bias),
            moment_statistics(&self.peephole_i_c),
            moment_statistics(&self.peephole_f_c),
            moment_statistics(&self.peephole_o_c),
            moment_statistics(&self.w_r_m),
        )
    }

    pub(crate) fn info_gradient(&self, prefix: &str) -> String {
        format!(
            "\n  {prefix}w_gifo_x_corr {}\n  {prefix}w_gifo_r_corr {}\n  {prefix}bias_corr {}\n  {prefix}peephole_i_c_corr {}\n  {prefix}peephole_f_c_corr {}\n  {prefix}peephole_o_c_corr {}\n  {prefix}w_r_m_corr {}\n  {prefix}d_gifo {}\n  {prefix}d_r {}",
            moment_statistics(&self.w_gifo_x_corr),
            moment_statistics(&self.w_gifo_r_corr),
            moment_statistics(&self.bias_corr),
            moment_statistics(&self.peephole_i_c_corr),
            moment_statistics(&self.peephole_f_c_corr),
            moment_statistics(&self.peephole_o_c_corr),
            moment_statistics(&self.w_r_m_corr),
            moment_statistics(&self.trace.d_gifo),
            moment_statistics(&self.trace.d_r),
        )
    }
}

/// Reads the `<CellDim>`/`<ClipGradient>` header shared by both recurrent components.
pub(crate) fn read_header<R: BufRead>(
    reader: &mut TokenReader<R>,
    marker: &str,
) -> Result<(usize, f32)> {
    let mut cell_dim = None;
    let mut clip_gradient = 0.0;

    while reader.peek_marker()? {
        match reader.read_token()?.as_str() {
            "<CellDim>" => cell_dim = Some(reader.read_int()?),
            "<ClipGradient>" => clip_gradient = reader.read_float()?,
            token => {
                return Err(NnetErr::parse(format!("unknown token {token} in {marker}")));
            }
        }
    }

    let cell_dim = cell_dim.ok_or_else(|| NnetErr::parse(format!("missing <CellDim> in {marker}")))?;
    Ok((cell_dim, clip_gradient))
}

/// Parses the recurrent prototype options: `<CellDim>`, `<ClipGradient>` and `<ParamScale>`.
pub(crate) fn init_options(proto: &mut ProtoLine) -> Result<(usize, f32, f32)> {
    let cell_dim: usize = proto
        .take("<CellDim>")?
        .ok_or_else(|| NnetErr::parse(format!("missing <CellDim> for {}", proto.marker())))?;
    let clip_gradient = proto.take_or("<ClipGradient>", 0.0f32)?;
    let param_scale = proto.take_or("<ParamScale>", 0.02f32)?;

    if cell_dim == 0 {
        return Err(NnetErr::parse("<CellDim> must be positive"));
    }

    Ok((cell_dim, clip_gradient, param_scale))
}

/// A unidirectional LSTM with a recurrent projection that processes several
/// streams at once, carrying each stream's state from one batch to the next.
#[derive(Debug, Clone)]
pub struct LstmProjectedStreams {
    cell: LstmCell,
    state: LstmState,
    mask: Array2<f32>,
    opts: TrainOptions,
}

impl LstmProjectedStreams {
    /// Creates a zero initialized `LstmProjectedStreams` processing a single stream.
    pub fn new(input_dim: usize, cell_dim: usize, proj_dim: usize) -> Self {
        Self::from_cell(LstmCell::zeros(input_dim, cell_dim, proj_dim))
    }

    fn from_cell(cell: LstmCell) -> Self {
        Self {
            state: LstmState::zeros(1, cell.cell_dim(), cell.proj_dim()),
            mask: Array2::zeros((0, 1)),
            opts: TrainOptions::default(),
            cell,
        }
    }

    pub(crate) fn init<R: Rng>(proto: &mut ProtoLine, rng: &mut R) -> Result<Self> {
        let (cell_dim, clip_gradient, param_scale) = init_options(proto)?;
        let mut cell = LstmCell::random(
            proto.input_dim(),
            cell_dim,
            proto.output_dim(),
            param_scale,
            rng,
        )?;
        cell.set_clip_gradient(clip_gradient);
        Ok(Self::from_cell(cell))
    }

    pub fn input_dim(&self) -> usize {
        self.cell.input_dim()
    }

    pub fn output_dim(&self) -> usize {
        self.cell.proj_dim()
    }

    pub fn cell_dim(&self) -> usize {
        self.cell.cell_dim()
    }

    pub fn num_streams(&self) -> usize {
        self.state.streams()
    }

    /// Sets the number of streams to `flags.len()` and zeroes the state of every
    /// stream whose flag is set. Changing the number of streams zeroes every state.
    pub fn reset_streams(&mut self, flags: &[bool]) -> Result<()> {
        if flags.is_empty() {
            return Err(NnetErr::SizeMismatch {
                what: "stream reset flags",
                got: 0,
                expected: self.num_streams(),
            });
        }

        if flags.len() != self.num_streams() {
            self.state = LstmState::zeros(flags.len(), self.cell_dim(), self.output_dim());
        }

        for (stream, _) in flags.iter().enumerate().filter(|(_, reset)| **reset) {
            self.state.reset(stream);
        }

        Ok(())
    }

    pub fn propagate(&mut self, input: ArrayView2<f32>, output: &mut Array2<f32>) -> Result<()> {
        let streams = self.num_streams();
        if input.nrows() % streams != 0 {
            return Err(NnetErr::SizeMismatch {
                what: "lstm frames (rows must be a multiple of the streams)",
                got: input.nrows(),
                expected: input.nrows().next_multiple_of(streams),
            });
        }

        self.mask = Array2::ones((input.nrows(), 1));
        let out = self
            .cell
            .forward(input, streams, false, &self.mask, &mut self.state);

        ensure_shape(output, out.dim());
        output.assign(&out);
        Ok(())
    }

    pub fn backpropagate(&mut self, diff: ArrayView2<f32>, in_diff: &mut Array2<f32>) -> Result<()> {
        let d = self.cell.backward(diff, &self.mask)?;
        ensure_shape(in_diff, d.dim());
        in_diff.assign(&d);
        Ok(())
    }

    pub(crate) fn read_data<R: BufRead>(
        reader: &mut TokenReader<R>,
        input_dim: usize,
        output_dim: usize,
    ) -> Result<Self> {
        let (cell_dim, clip_gradient) = read_header(reader, "<LstmProjectedStreams>")?;
        let mut cell = LstmCell::zeros(input_dim, cell_dim, output_dim);
        cell.set_clip_gradient(clip_gradient);
        cell.read_params(reader)?;
        Ok(Self::from_cell(cell))
    }

    pub(crate) fn write_data<W: Write>(&self, writer: &mut TokenWriter<W>) -> Result<()> {
        writer.write_token("<CellDim>")?;
        writer.write_int(self.cell_dim())?;
        writer.write_token("<ClipGradient>")?;
        writer.write_float(self.cell.clip_gradient())?;
        writer.newline()?;
        self.cell.write_params(writer)
    }

    pub fn info(&self) -> String {
        format!(
            "cell-dim {}, num-streams {}{}",
            self.cell_dim(),
            self.num_streams(),
            self.cell.info("")
        )
    }
}

impl UpdatableComponent for LstmProjectedStreams {
    fn num_params(&self) -> usize {
        self.cell.num_params()
    }

    fn params(&self) -> Array1<f32> {
        self.cell.params()
    }

    fn set_params(&mut self, params: ArrayView1<f32>) -> Result<()> {
        self.cell.set_params(params)
    }

    fn gradient(&self) -> Array1<f32> {
        self.cell.gradient()
    }

    fn train_options(&self) -> &TrainOptions {
        &self.opts
    }

    fn set_train_options(&mut self, opts: TrainOptions) {
        self.opts = opts;
    }

    fn update(&mut self, input: ArrayView2<f32>, _diff: ArrayView2<f32>) -> Result<()> {
        self.cell.update(input, &self.opts)
    }

    fn info_gradient(&self) -> String {
        self.cell.info_gradient("")
    }
}
