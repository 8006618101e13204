use std::{
    fs::File,
    io::{BufRead, BufReader, Write},
    path::Path,
};

use log::{debug, info, warn};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, s};
use rand::Rng;

use super::{
    layers::{Component, ensure_shape},
    updatable::UpdatableComponent,
};
use crate::{
    NnetErr, Result,
    io::{TokenReader, TokenWriter, create_output, open_input},
    options::TrainOptions,
    stats::moment_statistics,
};

/// A feed-forward network: an ordered chain of components.
///
/// Two buffer chains of `num_components() + 1` slots carry the activations
/// (`propagate_buffer`) and the gradients (`backpropagate_buffer`) between the
/// components. Slot `i` of the propagate chain is the input of component `i`
/// and slot `i + 1` its output.
#[derive(Debug)]
pub struct Nnet {
    components: Vec<Component>,
    propagate_buf: Vec<Array2<f32>>,
    backpropagate_buf: Vec<Array2<f32>>,
    opts: TrainOptions,
}

fn empty() -> Array2<f32> {
    Array2::zeros((0, 0))
}

impl Default for Nnet {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Nnet {
    fn clone(&self) -> Self {
        let mut nnet = Self {
            components: self.components.clone(),
            propagate_buf: Vec::new(),
            backpropagate_buf: Vec::new(),
            opts: self.opts,
        };

        nnet.resize_buffers();
        nnet
    }
}

impl Nnet {
    /// Creates a network without components.
    pub fn new() -> Self {
        Self {
            components: Vec::new(),
            propagate_buf: vec![empty()],
            backpropagate_buf: vec![empty()],
            opts: TrainOptions::default(),
        }
    }

    /// Creates a network out of the given components, appending them in order.
    ///
    /// # Returns
    /// The network or an error if two adjacent components don't fit together.
    pub fn from_components<I>(components: I) -> Result<Self>
    where
        I: IntoIterator<Item = Component>,
    {
        let mut nnet = Self::new();
        for component in components {
            nnet.append_component(component)?;
        }

        Ok(nnet)
    }

    fn resize_buffers(&mut self) {
        let len = self.components.len() + 1;
        self.propagate_buf.resize(len, empty());
        self.backpropagate_buf.resize(len, empty());
    }

    /// Drops every component and buffer, leaving an empty network behind.
    pub fn destroy(&mut self) {
        self.components.clear();
        self.propagate_buf = vec![empty()];
        self.backpropagate_buf = vec![empty()];
    }

    /// Makes a forward pass keeping every intermediate activation.
    ///
    /// # Arguments
    /// * `input` - One frame per row.
    /// * `output` - Where to write the network's output.
    ///
    /// # Returns
    /// An error if the input doesn't fit the network or a component fails.
    pub fn propagate(&mut self, input: ArrayView2<f32>, output: &mut Array2<f32>) -> Result<()> {
        let n = self.components.len();
        if n == 0 {
            *output = input.to_owned();
            return Ok(());
        }

        if self.propagate_buf.len() < n + 1 {
            return Err(NnetErr::BufferChain {
                which: "propagate",
                got: self.propagate_buf.len(),
                expected: n + 1,
            });
        }

        ensure_shape(&mut self.propagate_buf[0], input.dim());
        self.propagate_buf[0].assign(&input);

        for (i, component) in self.components.iter_mut().enumerate() {
            let (inputs, outputs) = self.propagate_buf.split_at_mut(i + 1);
            component.propagate(inputs[i].view(), &mut outputs[0])?;
        }

        output.clone_from(&self.propagate_buf[n]);
        Ok(())
    }

    /// Backpropagates the gradient of the last `propagate`, updating every updatable
    /// component right after its own input gradient is computed.
    ///
    /// # Arguments
    /// * `diff` - The gradient with respect to the network's output.
    /// * `in_diff` - Where to write the gradient with respect to the input, if wanted.
    ///
    /// # Returns
    /// An error if there's no matching forward pass or a component fails.
    pub fn backpropagate(
        &mut self,
        diff: ArrayView2<f32>,
        in_diff: Option<&mut Array2<f32>>,
    ) -> Result<()> {
        let n = self.components.len();
        if n == 0 {
            if let Some(in_diff) = in_diff {
                *in_diff = diff.to_owned();
            }
            return Ok(());
        }

        self.check_buffers()?;
        self.check_propagated(diff.dim())?;

        ensure_shape(&mut self.backpropagate_buf[n], diff.dim());
        self.backpropagate_buf[n].assign(&diff);

        for i in (0..n).rev() {
            let (in_diffs, diffs) = self.backpropagate_buf.split_at_mut(i + 1);
            let component = &mut self.components[i];
            let input = self.propagate_buf[i].view();

            component.backpropagate(
                input,
                self.propagate_buf[i + 1].view(),
                diffs[0].view(),
                &mut in_diffs[i],
            )?;

            if let Some(updatable) = component.as_updatable_mut() {
                updatable.update(input, diffs[0].view())?;
            }
        }

        if let Some(in_diff) = in_diff {
            in_diff.clone_from(&self.backpropagate_buf[0]);
        }

        Ok(())
    }

    /// Makes sure every slot of the propagate chain holds the activations of a
    /// forward pass producing an output of shape `dim`.
    fn check_propagated(&self, dim: (usize, usize)) -> Result<()> {
        let rows = dim.0;
        let widths = self
            .components
            .iter()
            .map(Component::input_dim)
            .chain([dim.1]);

        for (slot, cols) in self.propagate_buf.iter().zip(widths) {
            if slot.dim() != (rows, cols) {
                return Err(NnetErr::NotPropagated);
            }
        }

        Ok(())
    }

    /// Makes an inference-only forward pass.
    ///
    /// Only two slots of the propagate chain are used, alternating between
    /// components, and both are released afterwards. The output equals the one
    /// `propagate` would produce, but nothing is left to backpropagate through.
    pub fn feedforward(&mut self, input: ArrayView2<f32>, output: &mut Array2<f32>) -> Result<()> {
        let n = self.components.len();
        match n {
            0 => {
                *output = input.to_owned();
                return Ok(());
            }
            1 => return self.components[0].propagate(input, output),
            _ => {}
        }

        if self.propagate_buf.len() < 2 {
            return Err(NnetErr::BufferChain {
                which: "propagate",
                got: self.propagate_buf.len(),
                expected: n + 1,
            });
        }

        self.components[0].propagate(input, &mut self.propagate_buf[0])?;
        for l in 1..n - 1 {
            let (src, dst) = ping_pong(&mut self.propagate_buf, (l - 1) % 2);
            self.components[l].propagate(src.view(), dst)?;
        }
        self.components[n - 1].propagate(self.propagate_buf[(n - 2) % 2].view(), output)?;

        self.propagate_buf[0] = empty();
        self.propagate_buf[1] = empty();
        Ok(())
    }

    pub fn num_components(&self) -> usize {
        self.components.len()
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn component(&self, index: usize) -> Result<&Component> {
        let len = self.components.len();
        self.components
            .get(index)
            .ok_or(NnetErr::IndexOutOfRange { index, len })
    }

    pub fn component_mut(&mut self, index: usize) -> Result<&mut Component> {
        let len = self.components.len();
        self.components
            .get_mut(index)
            .ok_or(NnetErr::IndexOutOfRange { index, len })
    }

    /// The input width of the first component.
    pub fn input_dim(&self) -> Result<usize> {
        self.components
            .first()
            .map(Component::input_dim)
            .ok_or(NnetErr::EmptyNetwork)
    }

    /// The output width of the last component.
    pub fn output_dim(&self) -> Result<usize> {
        self.components
            .last()
            .map(Component::output_dim)
            .ok_or(NnetErr::EmptyNetwork)
    }

    pub fn propagate_buffer(&self) -> &[Array2<f32>] {
        &self.propagate_buf
    }

    pub fn backpropagate_buffer(&self) -> &[Array2<f32>] {
        &self.backpropagate_buf
    }

    /// Replaces the component at `index`.
    ///
    /// The replacement is kept even if the network fails the check afterwards.
    pub fn set_component(&mut self, index: usize, component: Component) -> Result<()> {
        *self.component_mut(index)? = component;
        self.check()
    }

    /// Appends a component.
    ///
    /// The component is kept even if the network fails the check afterwards.
    pub fn append_component(&mut self, component: Component) -> Result<()> {
        self.components.push(component);
        self.resize_buffers();
        self.check()
    }

    /// Appends a copy of every component of `other`.
    pub fn append_nnet(&mut self, other: &Nnet) -> Result<()> {
        for component in &other.components {
            self.append_component(component.clone())?;
        }

        Ok(())
    }

    /// Removes the component at `index`.
    ///
    /// # Returns
    /// The removed component, or an error if the index is out of range or the
    /// remaining components don't fit together.
    pub fn remove_component(&mut self, index: usize) -> Result<Component> {
        let len = self.components.len();
        if index >= len {
            return Err(NnetErr::IndexOutOfRange { index, len });
        }

        let removed = self.components.remove(index);
        self.resize_buffers();
        self.check()?;
        Ok(removed)
    }

    fn check_buffers(&self) -> Result<()> {
        let expected = self.components.len() + 1;
        for (which, chain) in [
            ("propagate", &self.propagate_buf),
            ("backpropagate", &self.backpropagate_buf),
        ] {
            if chain.len() != expected {
                return Err(NnetErr::BufferChain {
                    which,
                    got: chain.len(),
                    expected,
                });
            }
        }

        Ok(())
    }

    /// Validates the whole structure: buffer chain lengths, the widths of every
    /// adjacent pair of components and the absence of `inf`/`nan` parameters.
    pub fn check(&self) -> Result<()> {
        self.check_buffers()?;

        for (i, pair) in self.components.windows(2).enumerate() {
            let (output_dim, input_dim) = (pair[0].output_dim(), pair[1].input_dim());
            if output_dim != input_dim {
                return Err(NnetErr::DimMismatch {
                    index: i + 1,
                    output_dim,
                    input_dim,
                });
            }
        }

        let params = self.get_params()?;
        if params.iter().any(|p| p.is_infinite()) {
            return Err(NnetErr::InfParams);
        }
        if params.iter().any(|p| p.is_nan()) {
            return Err(NnetErr::NanParams);
        }

        Ok(())
    }

    pub(crate) fn updatables(&self) -> impl Iterator<Item = &dyn UpdatableComponent> {
        self.components.iter().filter_map(Component::as_updatable)
    }

    fn updatables_mut(&mut self) -> impl Iterator<Item = &mut dyn UpdatableComponent> {
        self.components
            .iter_mut()
            .filter_map(Component::as_updatable_mut)
    }

    pub fn num_params(&self) -> usize {
        self.updatables().map(|c| c.num_params()).sum()
    }

    /// Concatenates a per component vector of every updatable component, making sure
    /// the positions add up to `num_params()`.
    fn flatten<F>(&self, per_component: F) -> Result<Array1<f32>>
    where
        F: Fn(&dyn UpdatableComponent) -> Array1<f32>,
    {
        let expected = self.num_params();
        let mut flat = Array1::zeros(expected);
        let mut pos = 0;

        for component in self.updatables() {
            let chunk = per_component(component);
            let end = pos + chunk.len();
            if end > expected {
                return Err(NnetErr::ParamCount { got: end, expected });
            }

            flat.slice_mut(s![pos..end]).assign(&chunk);
            pos = end;
        }

        if pos != expected {
            return Err(NnetErr::ParamCount { got: pos, expected });
        }

        Ok(flat)
    }

    /// Every trainable parameter, component after component.
    pub fn get_params(&self) -> Result<Array1<f32>> {
        self.flatten(|c| c.params())
    }

    /// Same layout as `get_params`, the counterpart of `set_weights`.
    pub fn get_weights(&self) -> Result<Array1<f32>> {
        self.get_params()
    }

    /// Overwrites every trainable parameter.
    ///
    /// # Arguments
    /// * `weights` - Exactly `num_params()` values laid out as in `get_weights`.
    pub fn set_weights(&mut self, weights: ArrayView1<f32>) -> Result<()> {
        let expected = self.num_params();
        if weights.len() != expected {
            return Err(NnetErr::SizeMismatch {
                what: "parameter vector",
                got: weights.len(),
                expected,
            });
        }

        let mut rest = weights;
        for component in self.updatables_mut() {
            let (head, tail) = rest.split_at(Axis(0), component.num_params());
            component.set_params(head)?;
            rest = tail;
        }

        Ok(())
    }

    /// The accumulated corrections of the last update, laid out as in `get_weights`.
    pub fn get_gradient(&self) -> Result<Array1<f32>> {
        self.flatten(|c| c.gradient())
    }

    pub fn train_options(&self) -> &TrainOptions {
        &self.opts
    }

    /// Stores the options and hands them to every updatable component.
    pub fn set_train_options(&mut self, opts: TrainOptions) {
        self.opts = opts;
        for component in self.updatables_mut() {
            component.set_train_options(opts);
        }
    }

    /// Sets the retention of every dropout component.
    pub fn set_dropout_retention(&mut self, retention: f32) -> Result<()> {
        for (i, component) in self.components.iter_mut().enumerate() {
            if let Component::Dropout(dropout) = component {
                let old = dropout.retention();
                dropout.set_retention(retention)?;
                info!(component = i + 1; "setting dropout-retention from {old} to {retention}");
            }
        }

        Ok(())
    }

    /// Resets the recurrent state of the flagged streams of every unidirectional LSTM.
    pub fn reset_lstm_streams(&mut self, flags: &[bool]) -> Result<()> {
        for component in &mut self.components {
            if let Component::Lstm(lstm) = component {
                lstm.reset_streams(flags)?;
            }
        }

        Ok(())
    }

    /// Sets the per stream sequence lengths of every bidirectional LSTM.
    pub fn set_seq_lengths(&mut self, lengths: &[usize]) {
        for component in &mut self.components {
            if let Component::BLstm(blstm) = component {
                blstm.set_seq_lengths(lengths);
            }
        }
    }

    /// Builds a randomly initialized network out of a prototype, one component per line.
    ///
    /// # Arguments
    /// * `proto` - The prototype text, blank lines and `<NnetProto>` wrappers are skipped.
    /// * `rng` - The source of the initial parameters.
    pub fn init<B: BufRead, G: Rng>(proto: B, rng: &mut G) -> Result<Self> {
        let mut nnet = Self::new();

        for line in proto.lines() {
            let line = line?;
            let Some(first) = line.split_whitespace().next() else {
                continue;
            };

            if first == "<NnetProto>" || first == "</NnetProto>" {
                continue;
            }

            debug!("{line}");
            nnet.append_component(Component::init(&line, rng)?)?;
        }

        nnet.check()?;
        Ok(nnet)
    }

    /// Same as `init`, reading the prototype from a file.
    pub fn init_file<P: AsRef<Path>, G: Rng>(path: P, rng: &mut G) -> Result<Self> {
        let path = path.as_ref();
        let nnet = Self::init(BufReader::new(File::open(path)?), rng)?;
        info!(
            "initialized {} components from prototype {}",
            nnet.num_components(),
            path.display()
        );
        Ok(nnet)
    }

    /// Reads a persisted network.
    ///
    /// The learning rate of the returned network is `0`: it won't train until
    /// `set_train_options` is called.
    ///
    /// # Returns
    /// The network, or an error as soon as a component doesn't fit the previous one.
    pub fn read<R: BufRead>(reader: &mut TokenReader<R>) -> Result<Self> {
        let mut nnet = Self::new();

        while let Some(component) = Component::read(reader)? {
            if let Some(last) = nnet.components.last() {
                if last.output_dim() != component.input_dim() {
                    return Err(NnetErr::DimMismatch {
                        index: nnet.components.len(),
                        output_dim: last.output_dim(),
                        input_dim: component.input_dim(),
                    });
                }
            }

            nnet.components.push(component);
        }

        nnet.resize_buffers();
        nnet.set_train_options(TrainOptions {
            learn_rate: 0.0,
            ..nnet.opts
        });
        nnet.check()?;
        Ok(nnet)
    }

    /// Reads a persisted network from a file, text or binary.
    pub fn read_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = open_input(path)?;
        let nnet = Self::read(&mut reader)?;

        if nnet.num_components() == 0 {
            warn!("the network {} is empty", path.display());
        }
        info!(
            "read {} components from {} ({})",
            nnet.num_components(),
            path.display(),
            if reader.is_binary() { "binary" } else { "text" }
        );
        Ok(nnet)
    }

    pub fn write<W: Write>(&self, writer: &mut TokenWriter<W>) -> Result<()> {
        self.check()?;

        writer.write_token("<Nnet>")?;
        writer.newline()?;
        for component in &self.components {
            component.write(writer)?;
        }
        writer.write_token("</Nnet>")?;
        writer.newline()
    }

    /// Writes the network to a file, prefixing binary files with their header.
    pub fn write_file<P: AsRef<Path>>(&self, path: P, binary: bool) -> Result<()> {
        let mut writer = create_output(path, binary)?;
        self.write(&mut writer)?;
        writer.flush()
    }

    /// A summary of the topology and parameter statistics.
    pub fn info(&self) -> String {
        let mut info = format!(
            "num-components {}\ninput-dim {}\noutput-dim {}\nnumber-of-parameters {} millions\n",
            self.num_components(),
            self.input_dim().unwrap_or_default(),
            self.output_dim().unwrap_or_default(),
            self.num_params() as f32 / 1e6
        );

        for (i, component) in self.components.iter().enumerate() {
            info += &format!(
                "component {} : {}, input-dim {}, output-dim {}, {}\n",
                i + 1,
                component.kind(),
                component.input_dim(),
                component.output_dim(),
                component.info()
            );
        }

        info
    }

    pub fn info_gradient(&self) -> String {
        let mut info = String::from("\n### Gradient stats :\n");
        for (i, component) in self.components.iter().enumerate() {
            info += &format!(
                "Component {} : {}, {}\n",
                i + 1,
                component.kind(),
                component.info_gradient()
            );
        }

        info
    }

    fn buffer_stats(chain: &[Array2<f32>], i: usize) -> String {
        chain.get(i).map(moment_statistics).unwrap_or_default()
    }

    /// Statistics of the live propagate chain, recursing into nested networks.
    pub fn info_propagate(&self) -> String {
        let mut info = format!(
            "\n### Forward propagation buffer content :\n[0] output of <Input> {}\n",
            Self::buffer_stats(&self.propagate_buf, 0)
        );

        for (i, component) in self.components.iter().enumerate() {
            info += &format!(
                "[{}] output of {} {}\n",
                i + 1,
                component.kind(),
                Self::buffer_stats(&self.propagate_buf, i + 1)
            );
            if let Component::Parallel(parallel) = component {
                info += &parallel.info_propagate();
            }
        }

        info
    }

    /// Statistics of the live backpropagate chain, recursing into nested networks.
    pub fn info_backpropagate(&self) -> String {
        let mut info = format!(
            "\n### Backward propagation buffer content :\n[0] diff of <Input> {}\n",
            Self::buffer_stats(&self.backpropagate_buf, 0)
        );

        for (i, component) in self.components.iter().enumerate() {
            info += &format!(
                "[{}] diff-output of {} {}\n",
                i + 1,
                component.kind(),
                Self::buffer_stats(&self.backpropagate_buf, i + 1)
            );
            if let Component::Parallel(parallel) = component {
                info += &parallel.info_backpropagate();
            }
        }

        info
    }
}

/// Splits the first two slots of a chain into the source and destination of one step.
fn ping_pong(bufs: &mut [Array2<f32>], src: usize) -> (&Array2<f32>, &mut Array2<f32>) {
    let (first, rest) = bufs.split_at_mut(1);
    if src == 0 {
        (&first[0], &mut rest[0])
    } else {
        (&rest[0], &mut first[0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::layers::{Activation, AffineTransform, Dropout};
    use ndarray::array;
    use rand::{SeedableRng, rngs::StdRng};
    use std::io::Cursor;

    const EPS: f32 = 1e-6;

    fn affine(weights: Array2<f32>, bias: Array1<f32>) -> Component {
        Component::Affine(AffineTransform::new(weights, bias).unwrap())
    }

    fn three_layers() -> Nnet {
        Nnet::from_components([
            affine(array![[1.0, -1.0], [0.5, 0.5], [0.0, 2.0]], array![0.0, 0.1, -0.1]),
            Component::Activation(Activation::sigmoid(3)),
            affine(array![[1.0, 1.0, 1.0]], array![0.5]),
        ])
        .unwrap()
    }

    #[test]
    fn empty_network_is_the_identity() {
        let mut nnet = Nnet::new();
        let x = array![[1.0, 2.0], [3.0, 4.0]];

        let mut out = Array2::zeros((0, 0));
        nnet.propagate(x.view(), &mut out).unwrap();
        assert_eq!(out, x);

        nnet.feedforward(x.view(), &mut out).unwrap();
        assert_eq!(out, x);

        let mut in_diff = Array2::zeros((0, 0));
        nnet.backpropagate(x.view(), Some(&mut in_diff)).unwrap();
        assert_eq!(in_diff, x);

        assert!(matches!(nnet.input_dim(), Err(NnetErr::EmptyNetwork)));
    }

    #[test]
    fn feedforward_matches_propagate() {
        let mut nnet = three_layers();
        let x = array![[0.2, -0.4], [1.0, 0.5], [-2.0, 0.0]];

        let mut propagated = Array2::zeros((0, 0));
        nnet.propagate(x.view(), &mut propagated).unwrap();
        assert!(nnet.propagate_buffer().iter().all(|b| b.nrows() == 3));

        let mut fed = Array2::zeros((0, 0));
        nnet.feedforward(x.view(), &mut fed).unwrap();
        assert_eq!(fed, propagated);
        assert_eq!(nnet.propagate_buffer()[0].dim(), (0, 0));
        assert_eq!(nnet.propagate_buffer()[1].dim(), (0, 0));
    }

    #[test]
    fn single_component_feedforward_is_a_direct_call() {
        let layer = AffineTransform::new(array![[2.0, 0.0]], array![1.0]).unwrap();
        let mut nnet = Nnet::from_components([Component::Affine(layer.clone())]).unwrap();

        let x = array![[1.0, 5.0]];
        let mut expected = Array2::zeros((0, 0));
        layer.propagate(x.view(), &mut expected);

        let mut out = Array2::zeros((0, 0));
        nnet.feedforward(x.view(), &mut out).unwrap();
        assert_eq!(out, expected);
    }

    #[test]
    fn backpropagate_updates_each_layer_with_its_own_buffers() {
        let mut nnet = three_layers();
        nnet.set_train_options(TrainOptions::with_learn_rate(0.0));

        let x = array![[0.2, -0.4], [1.0, 0.5]];
        let mut out = Array2::zeros((0, 0));
        nnet.propagate(x.view(), &mut out).unwrap();

        let mut in_diff = Array2::zeros((0, 0));
        nnet.backpropagate(array![[1.0], [-1.0]].view(), Some(&mut in_diff))
            .unwrap();
        assert_eq!(in_diff.dim(), (2, 2));

        // with a zero learning rate the corrections are exactly diff^T * input
        let first = nnet.backpropagate_buffer()[1].t().dot(&nnet.propagate_buffer()[0]);
        let gradient = nnet.get_gradient().unwrap();
        for (g, e) in gradient.iter().zip(&first) {
            assert!((g - e).abs() < EPS);
        }
        assert_eq!(gradient.len(), nnet.num_params());
    }

    #[test]
    fn backpropagate_without_propagate_fails() {
        let mut nnet = three_layers();
        assert!(matches!(
            nnet.backpropagate(array![[1.0]].view(), None),
            Err(NnetErr::NotPropagated)
        ));
    }

    #[test]
    fn backpropagate_after_feedforward_fails_before_any_update() {
        let mut nnet = three_layers();
        nnet.append_component(Component::Activation(Activation::sigmoid(1)))
            .unwrap();
        nnet.set_train_options(TrainOptions::with_learn_rate(0.5));

        let x = array![[0.2, -0.4], [1.0, 0.5]];
        let mut out = Array2::zeros((0, 0));
        nnet.propagate(x.view(), &mut out).unwrap();
        nnet.feedforward(x.view(), &mut out).unwrap();

        let weights = nnet.get_weights().unwrap();
        assert!(matches!(
            nnet.backpropagate(array![[1.0], [-1.0]].view(), None),
            Err(NnetErr::NotPropagated)
        ));
        assert_eq!(nnet.get_weights().unwrap(), weights);
    }

    #[test]
    fn destroy_leaves_an_empty_network() {
        let mut nnet = three_layers();
        nnet.destroy();

        assert_eq!(nnet.num_components(), 0);
        assert_eq!(nnet.propagate_buffer().len(), 1);
        assert_eq!(nnet.backpropagate_buffer().len(), 1);
        assert!(nnet.check().is_ok());

        let x = array![[1.0, -1.0, 3.0]];
        let mut out = Array2::zeros((0, 0));
        nnet.propagate(x.view(), &mut out).unwrap();
        assert_eq!(out, x);
    }

    #[test]
    fn mutations_are_checked_but_never_rolled_back() {
        let mut nnet = three_layers();
        assert_eq!(nnet.num_components(), 3);

        let err = nnet.append_component(affine(Array2::zeros((2, 4)), Array1::zeros(2)));
        assert!(matches!(
            err,
            Err(NnetErr::DimMismatch {
                index: 3,
                output_dim: 1,
                input_dim: 4
            })
        ));
        assert_eq!(nnet.num_components(), 4);
        assert!(nnet.check().is_err());

        nnet.remove_component(3).unwrap();
        assert!(nnet.check().is_ok());
        assert_eq!(nnet.propagate_buffer().len(), 4);
        assert_eq!(nnet.backpropagate_buffer().len(), 4);

        assert!(matches!(
            nnet.remove_component(7),
            Err(NnetErr::IndexOutOfRange { index: 7, len: 3 })
        ));
    }

    #[test]
    fn set_component_checks_the_replacement() {
        let mut nnet = three_layers();
        nnet.set_component(1, Component::Activation(Activation::tanh(3)))
            .unwrap();
        assert_eq!(nnet.component(1).unwrap().kind().marker(), "<Tanh>");

        assert!(nnet
            .set_component(1, Component::Activation(Activation::tanh(4)))
            .is_err());
    }

    #[test]
    fn append_nnet_copies_components() {
        let mut nnet = three_layers();
        let tail = Nnet::from_components([Component::Activation(Activation::sigmoid(1))]).unwrap();
        nnet.append_nnet(&tail).unwrap();

        assert_eq!(nnet.num_components(), 4);
        assert_eq!(tail.num_components(), 1);
        assert_eq!(nnet.output_dim().unwrap(), 1);
    }

    #[test]
    fn weights_round_trip() {
        let mut nnet = three_layers();
        assert_eq!(nnet.num_params(), 9 + 4);

        let weights = nnet.get_weights().unwrap();
        nnet.set_weights(weights.view()).unwrap();
        assert_eq!(nnet.get_weights().unwrap(), weights);

        let ramp = Array1::from_iter((0..13).map(|i| i as f32));
        nnet.set_weights(ramp.view()).unwrap();
        assert_eq!(nnet.get_weights().unwrap(), ramp);

        assert!(matches!(
            nnet.set_weights(ramp.slice(s![..12])),
            Err(NnetErr::SizeMismatch { got: 12, expected: 13, .. })
        ));
    }

    #[test]
    fn check_catches_exploded_parameters() {
        let mut nnet = three_layers();
        let mut weights = nnet.get_weights().unwrap();

        weights[4] = f32::NAN;
        nnet.set_weights(weights.view()).unwrap();
        assert!(matches!(nnet.check(), Err(NnetErr::NanParams)));

        weights[4] = f32::INFINITY;
        nnet.set_weights(weights.view()).unwrap();
        assert!(matches!(nnet.check(), Err(NnetErr::InfParams)));
    }

    #[test]
    fn clones_share_nothing() {
        let mut nnet = three_layers();
        let copy = nnet.clone();

        let zeros = Array1::zeros(nnet.num_params());
        nnet.set_weights(zeros.view()).unwrap();
        assert_ne!(copy.get_weights().unwrap(), nnet.get_weights().unwrap());
        assert_eq!(copy.propagate_buffer().len(), 4);
    }

    #[test]
    fn dropout_retention_reaches_only_dropout() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut nnet = Nnet::from_components([
            Component::Activation(Activation::sigmoid(4)),
            Component::Dropout(Dropout::new(4, 0.5, &mut rng).unwrap()),
        ])
        .unwrap();

        nnet.set_dropout_retention(0.9).unwrap();
        let Component::Dropout(dropout) = nnet.component(1).unwrap() else {
            panic!("expected dropout");
        };
        assert!((dropout.retention() - 0.9).abs() < EPS);
        assert!(nnet.set_dropout_retention(0.0).is_err());
    }

    #[test]
    fn read_resets_the_learn_rate() {
        let nnet = three_layers();
        let mut writer = TokenWriter::new(Vec::new(), false);
        nnet.write(&mut writer).unwrap();

        let bytes = writer.into_inner();
        let mut reader = TokenReader::new(Cursor::new(bytes), false);
        let read = Nnet::read(&mut reader).unwrap();

        assert_eq!(read.train_options().learn_rate, 0.0);
        let affine = read.component(0).unwrap().as_updatable().unwrap();
        assert_eq!(affine.train_options().learn_rate, 0.0);
    }

    #[test]
    fn read_rejects_mismatched_neighbours() {
        let text = "<Nnet>\n<Sigmoid> 3 3\n<!EndOfComponent>\n<Tanh> 4 4\n<!EndOfComponent>\n</Nnet>\n";
        let mut reader = TokenReader::new(Cursor::new(text), false);
        assert!(matches!(
            Nnet::read(&mut reader),
            Err(NnetErr::DimMismatch {
                index: 1,
                output_dim: 3,
                input_dim: 4
            })
        ));
    }

    #[test]
    fn info_reports_the_topology() {
        let nnet = three_layers();
        let info = nnet.info();
        assert!(info.starts_with("num-components 3\ninput-dim 2\noutput-dim 1\n"));
        assert!(info.contains("component 2 : <Sigmoid>, input-dim 3, output-dim 3"));

        assert!(Nnet::new().info().contains("input-dim 0"));
        assert!(nnet.info_propagate().contains("[3] output of <AffineTransform>"));
        assert!(nnet.info_gradient().contains("Component 1 : <AffineTransform>"));
    }
}
