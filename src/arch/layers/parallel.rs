use std::{
    fs::File,
    io::{BufRead, BufReader, Write},
    ops::Range,
};

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, s};
use rand::Rng;
use rayon::prelude::*;

use super::ensure_shape;
use crate::{
    NnetErr, Result,
    arch::{Nnet, proto::ProtoLine, updatable::UpdatableComponent},
    io::{TokenReader, TokenWriter},
    options::TrainOptions,
};

/// Runs several nested networks side by side, each on its own consecutive
/// slice of the input columns, and concatenates their outputs.
///
/// The nested networks update themselves while backpropagating, so `update`
/// has nothing left to do.
#[derive(Debug, Clone)]
pub struct ParallelComponent {
    nets: Vec<Nnet>,
    input_dim: usize,
    output_dim: usize,
    opts: TrainOptions,
}

impl ParallelComponent {
    /// Creates a new `ParallelComponent`.
    ///
    /// # Arguments
    /// * `nets` - The nested networks, none of them empty.
    ///
    /// # Returns
    /// A new instance or an error if there are no nested networks or one of them is empty.
    pub fn new(nets: Vec<Nnet>) -> Result<Self> {
        if nets.is_empty() {
            return Err(NnetErr::EmptyNetwork);
        }

        let mut input_dim = 0;
        let mut output_dim = 0;
        for net in &nets {
            input_dim += net.input_dim()?;
            output_dim += net.output_dim()?;
        }

        Ok(Self {
            nets,
            input_dim,
            output_dim,
            opts: TrainOptions::default(),
        })
    }

    pub(crate) fn init<R: Rng>(proto: &mut ProtoLine, rng: &mut R) -> Result<Self> {
        let nets = match (
            proto.take_values("<NestedNnetProto>"),
            proto.take_values("<NestedNnetFilename>"),
        ) {
            (Some(protos), None) => protos
                .iter()
                .map(|path| -> Result<Nnet> {
                    let reader = BufReader::new(File::open(path)?);
                    Nnet::init(reader, &mut *rng)
                })
                .collect::<Result<Vec<_>>>()?,
            (None, Some(files)) => files.iter().map(Nnet::read_file).collect::<Result<Vec<_>>>()?,
            _ => {
                return Err(NnetErr::parse(
                    "<ParallelComponent> needs exactly one of <NestedNnetProto> or <NestedNnetFilename>",
                ));
            }
        };

        let parallel = Self::new(nets)?;
        parallel.check_dims(proto.input_dim(), proto.output_dim())?;
        Ok(parallel)
    }

    fn check_dims(&self, input_dim: usize, output_dim: usize) -> Result<()> {
        if self.input_dim != input_dim {
            return Err(NnetErr::SizeMismatch {
                what: "nested networks input dim",
                got: self.input_dim,
                expected: input_dim,
            });
        }

        if self.output_dim != output_dim {
            return Err(NnetErr::SizeMismatch {
                what: "nested networks output dim",
                got: self.output_dim,
                expected: output_dim,
            });
        }

        Ok(())
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn output_dim(&self) -> usize {
        self.output_dim
    }

    pub fn nets(&self) -> &[Nnet] {
        &self.nets
    }

    /// The input and output column ranges of every nested network.
    fn column_ranges(&self) -> Vec<(Range<usize>, Range<usize>)> {
        let mut input_offset = 0;
        let mut output_offset = 0;

        self.nets
            .iter()
            .map(|net| {
                let input_dim = net.input_dim().unwrap_or_default();
                let output_dim = net.output_dim().unwrap_or_default();
                let cols = (
                    input_offset..input_offset + input_dim,
                    output_offset..output_offset + output_dim,
                );
                input_offset += input_dim;
                output_offset += output_dim;
                cols
            })
            .collect()
    }

    pub fn propagate(&mut self, input: ArrayView2<f32>, output: &mut Array2<f32>) -> Result<()> {
        let ranges = self.column_ranges();
        let outputs = self
            .nets
            .par_iter_mut()
            .zip(ranges.par_iter())
            .map(|(net, (in_cols, _))| -> Result<Array2<f32>> {
                let mut out = Array2::zeros((0, 0));
                net.propagate(input.slice(s![.., in_cols.clone()]), &mut out)?;
                Ok(out)
            })
            .collect::<Result<Vec<_>>>()?;

        ensure_shape(output, (input.nrows(), self.output_dim));
        for (out, (_, out_cols)) in outputs.iter().zip(&ranges) {
            output.slice_mut(s![.., out_cols.clone()]).assign(out);
        }

        Ok(())
    }

    pub fn backpropagate(&mut self, diff: ArrayView2<f32>, in_diff: &mut Array2<f32>) -> Result<()> {
        let ranges = self.column_ranges();
        let in_diffs = self
            .nets
            .par_iter_mut()
            .zip(ranges.par_iter())
            .map(|(net, (_, out_cols))| -> Result<Array2<f32>> {
                let mut d = Array2::zeros((0, 0));
                net.backpropagate(diff.slice(s![.., out_cols.clone()]), Some(&mut d))?;
                Ok(d)
            })
            .collect::<Result<Vec<_>>>()?;

        ensure_shape(in_diff, (diff.nrows(), self.input_dim));
        for (d, (in_cols, _)) in in_diffs.iter().zip(&ranges) {
            in_diff.slice_mut(s![.., in_cols.clone()]).assign(d);
        }

        Ok(())
    }

    pub(crate) fn read_data<R: BufRead>(
        reader: &mut TokenReader<R>,
        input_dim: usize,
        output_dim: usize,
    ) -> Result<Self> {
        reader.expect_token("<NestedNnetCount>")?;
        let count = reader.read_int()?;

        let mut nets = Vec::with_capacity(count);
        for i in 0..count {
            reader.expect_token("<NestedNnet>")?;
            let index = reader.read_int()?;
            if index != i + 1 {
                return Err(NnetErr::parse(format!(
                    "nested networks out of order, expected #{} got #{index}",
                    i + 1
                )));
            }

            nets.push(Nnet::read(reader)?);
        }

        let parallel = Self::new(nets)?;
        parallel.check_dims(input_dim, output_dim)?;
        Ok(parallel)
    }

    pub(crate) fn write_data<W: Write>(&self, writer: &mut TokenWriter<W>) -> Result<()> {
        writer.write_token("<NestedNnetCount>")?;
        writer.write_int(self.nets.len())?;
        writer.newline()?;

        for (i, net) in self.nets.iter().enumerate() {
            writer.write_token("<NestedNnet>")?;
            writer.write_int(i + 1)?;
            writer.newline()?;
            net.write(writer)?;
        }

        Ok(())
    }

    fn nested<F: Fn(&Nnet) -> String>(&self, section: F) -> String {
        self.nets
            .iter()
            .enumerate()
            .map(|(i, net)| format!("\nnested_network #{} {{\n{}}}\n", i + 1, section(net)))
            .collect()
    }

    pub fn info(&self) -> String {
        self.nested(Nnet::info)
    }

    pub fn info_propagate(&self) -> String {
        self.nested(Nnet::info_propagate)
    }

    pub fn info_backpropagate(&self) -> String {
        self.nested(Nnet::info_backpropagate)
    }
}

impl UpdatableComponent for ParallelComponent {
    fn num_params(&self) -> usize {
        self.nets.iter().map(Nnet::num_params).sum()
    }

    fn params(&self) -> Array1<f32> {
        self.nets
            .iter()
            .flat_map(Nnet::updatables)
            .flat_map(|c| c.params())
            .collect()
    }

    fn set_params(&mut self, params: ArrayView1<f32>) -> Result<()> {
        if params.len() != self.num_params() {
            return Err(NnetErr::SizeMismatch {
                what: "parameter vector",
                got: params.len(),
                expected: self.num_params(),
            });
        }

        let mut rest = params;
        for net in &mut self.nets {
            let (head, tail) = rest.split_at(Axis(0), net.num_params());
            net.set_weights(head)?;
            rest = tail;
        }

        Ok(())
    }

    fn gradient(&self) -> Array1<f32> {
        self.nets
            .iter()
            .flat_map(Nnet::updatables)
            .flat_map(|c| c.gradient())
            .collect()
    }

    fn train_options(&self) -> &TrainOptions {
        &self.opts
    }

    fn set_train_options(&mut self, opts: TrainOptions) {
        for net in &mut self.nets {
            net.set_train_options(opts);
        }
        self.opts = opts;
    }

    fn update(&mut self, _input: ArrayView2<f32>, _diff: ArrayView2<f32>) -> Result<()> {
        Ok(())
    }

    fn info_gradient(&self) -> String {
        self.nested(Nnet::info_gradient)
    }
}
