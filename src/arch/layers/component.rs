use std::{
    fmt,
    io::{BufRead, Write},
};

use ndarray::{Array2, ArrayView2};
use rand::Rng;

use super::{
    ActFn, Activation, AffineTransform, BLstmProjectedStreams, Dropout, LstmProjectedStreams,
    ParallelComponent,
};
use crate::{
    NnetErr, Result,
    arch::{proto::ProtoLine, updatable::UpdatableComponent},
    io::{TokenReader, TokenWriter},
};

const END_OF_COMPONENT: &str = "<!EndOfComponent>";

/// The variant tag of a `Component`, with its stable marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    AffineTransform,
    Sigmoid,
    Tanh,
    Softmax,
    Dropout,
    LstmProjectedStreams,
    BLstmProjectedStreams,
    ParallelComponent,
}
use ComponentKind as K;

impl ComponentKind {
    const ALL: [ComponentKind; 8] = [
        K::AffineTransform,
        K::Sigmoid,
        K::Tanh,
        K::Softmax,
        K::Dropout,
        K::LstmProjectedStreams,
        K::BLstmProjectedStreams,
        K::ParallelComponent,
    ];

    pub fn marker(self) -> &'static str {
        match self {
            K::AffineTransform => "<AffineTransform>",
            K::Sigmoid => "<Sigmoid>",
            K::Tanh => "<Tanh>",
            K::Softmax => "<Softmax>",
            K::Dropout => "<Dropout>",
            K::LstmProjectedStreams => "<LstmProjectedStreams>",
            K::BLstmProjectedStreams => "<BLstmProjectedStreams>",
            K::ParallelComponent => "<ParallelComponent>",
        }
    }

    /// Looks a marker up, ignoring ASCII case like the persisted format allows.
    pub fn from_marker(marker: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.marker().eq_ignore_ascii_case(marker))
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.marker())
    }
}

/// One stage of a network.
#[derive(Debug, Clone)]
pub enum Component {
    Affine(AffineTransform),
    Activation(Activation),
    Dropout(Dropout),
    Lstm(LstmProjectedStreams),
    BLstm(BLstmProjectedStreams),
    Parallel(ParallelComponent),
}
use Component::*;

impl Component {
    pub fn kind(&self) -> ComponentKind {
        match self {
            Affine(_) => K::AffineTransform,
            Activation(c) => c.kind(),
            Dropout(_) => K::Dropout,
            Lstm(_) => K::LstmProjectedStreams,
            BLstm(_) => K::BLstmProjectedStreams,
            Parallel(_) => K::ParallelComponent,
        }
    }

    pub fn input_dim(&self) -> usize {
        match self {
            Affine(c) => c.input_dim(),
            Activation(c) => c.dim(),
            Dropout(c) => c.dim(),
            Lstm(c) => c.input_dim(),
            BLstm(c) => c.input_dim(),
            Parallel(c) => c.input_dim(),
        }
    }

    pub fn output_dim(&self) -> usize {
        match self {
            Affine(c) => c.output_dim(),
            Activation(c) => c.dim(),
            Dropout(c) => c.dim(),
            Lstm(c) => c.output_dim(),
            BLstm(c) => c.output_dim(),
            Parallel(c) => c.output_dim(),
        }
    }

    pub fn is_updatable(&self) -> bool {
        self.as_updatable().is_some()
    }

    pub fn as_updatable(&self) -> Option<&dyn UpdatableComponent> {
        match self {
            Affine(c) => Some(c),
            Lstm(c) => Some(c),
            BLstm(c) => Some(c),
            Parallel(c) => Some(c),
            Activation(_) | Dropout(_) => None,
        }
    }

    pub fn as_updatable_mut(&mut self) -> Option<&mut dyn UpdatableComponent> {
        match self {
            Affine(c) => Some(c),
            Lstm(c) => Some(c),
            BLstm(c) => Some(c),
            Parallel(c) => Some(c),
            Activation(_) | Dropout(_) => None,
        }
    }

    /// Computes the output of this component, resizing `output` as needed.
    ///
    /// # Returns
    /// An error if the input width doesn't match, or the component fails.
    pub fn propagate(&mut self, input: ArrayView2<f32>, output: &mut Array2<f32>) -> Result<()> {
        if input.ncols() != self.input_dim() {
            return Err(NnetErr::SizeMismatch {
                what: "component input columns",
                got: input.ncols(),
                expected: self.input_dim(),
            });
        }

        match self {
            Affine(c) => c.propagate(input, output),
            Activation(c) => c.propagate(input, output),
            Dropout(c) => return c.propagate(input, output),
            Lstm(c) => return c.propagate(input, output),
            BLstm(c) => return c.propagate(input, output),
            Parallel(c) => return c.propagate(input, output),
        }

        Ok(())
    }

    /// Computes the gradient with respect to the input.
    ///
    /// `input` and `output` must be the pair of the last `propagate`.
    pub fn backpropagate(
        &mut self,
        input: ArrayView2<f32>,
        output: ArrayView2<f32>,
        diff: ArrayView2<f32>,
        in_diff: &mut Array2<f32>,
    ) -> Result<()> {
        if diff.nrows() != input.nrows() || output.nrows() != input.nrows() {
            return Err(NnetErr::NotPropagated);
        }

        if diff.ncols() != self.output_dim() {
            return Err(NnetErr::SizeMismatch {
                what: "component output gradient columns",
                got: diff.ncols(),
                expected: self.output_dim(),
            });
        }

        match self {
            Affine(c) => c.backpropagate(diff, in_diff),
            Activation(c) => c.backpropagate(output, diff, in_diff),
            Dropout(c) => return c.backpropagate(diff, in_diff),
            Lstm(c) => return c.backpropagate(diff, in_diff),
            BLstm(c) => return c.backpropagate(diff, in_diff),
            Parallel(c) => return c.backpropagate(diff, in_diff),
        }

        Ok(())
    }

    /// Builds a randomly initialized component out of a single prototype line.
    ///
    /// # Arguments
    /// * `line` - e.g. `<AffineTransform> <InputDim> 10 <OutputDim> 5 <ParamStddev> 0.1`.
    /// * `rng` - The source of the initial parameters.
    ///
    /// # Returns
    /// The new component or an error if the line is malformed or has unknown options.
    pub fn init<R: Rng>(line: &str, rng: &mut R) -> Result<Self> {
        let mut proto = ProtoLine::parse(line)?;
        let kind = ComponentKind::from_marker(proto.marker())
            .ok_or_else(|| NnetErr::UnknownComponent(proto.marker().to_string()))?;

        if kind.is_width_preserving() && proto.input_dim() != proto.output_dim() {
            return Err(NnetErr::parse(format!(
                "{kind} must preserve its width, got <InputDim> {} and <OutputDim> {}",
                proto.input_dim(),
                proto.output_dim()
            )));
        }

        let dim = proto.input_dim();
        let component = match kind {
            K::AffineTransform => Affine(AffineTransform::init(&mut proto, rng)?),
            K::Sigmoid => Activation(Activation::new(dim, ActFn::Sigmoid)),
            K::Tanh => Activation(Activation::new(dim, ActFn::Tanh)),
            K::Softmax => Activation(Activation::new(dim, ActFn::Softmax)),
            K::Dropout => Dropout(Dropout::init(&mut proto, rng)?),
            K::LstmProjectedStreams => Lstm(LstmProjectedStreams::init(&mut proto, rng)?),
            K::BLstmProjectedStreams => BLstm(BLstmProjectedStreams::init(&mut proto, rng)?),
            K::ParallelComponent => Parallel(ParallelComponent::init(&mut proto, rng)?),
        };

        proto.finish()?;
        Ok(component)
    }

    /// Reads the next component block.
    ///
    /// # Returns
    /// `None` once the end of the network is reached, a leading `<Nnet>` is skipped.
    pub fn read<R: BufRead>(reader: &mut TokenReader<R>) -> Result<Option<Self>> {
        let mut token = reader.read_token()?;
        if token == "<Nnet>" {
            token = reader.read_token()?;
        }

        if token == "</Nnet>" {
            return Ok(None);
        }

        let kind =
            ComponentKind::from_marker(&token).ok_or(NnetErr::UnknownComponent(token))?;
        let output_dim = reader.read_int()?;
        let input_dim = reader.read_int()?;

        if kind.is_width_preserving() && input_dim != output_dim {
            return Err(NnetErr::parse(format!(
                "{kind} must preserve its width, got input {input_dim} and output {output_dim}"
            )));
        }

        let component = match kind {
            K::AffineTransform => Affine(AffineTransform::read_data(reader, input_dim, output_dim)?),
            K::Sigmoid => Activation(Activation::new(input_dim, ActFn::Sigmoid)),
            K::Tanh => Activation(Activation::new(input_dim, ActFn::Tanh)),
            K::Softmax => Activation(Activation::new(input_dim, ActFn::Softmax)),
            K::Dropout => Dropout(Dropout::read_data(reader, input_dim, &mut rand::rng())?),
            K::LstmProjectedStreams => Lstm(LstmProjectedStreams::read_data(
                reader, input_dim, output_dim,
            )?),
            K::BLstmProjectedStreams => BLstm(BLstmProjectedStreams::read_data(
                reader, input_dim, output_dim,
            )?),
            K::ParallelComponent => Parallel(ParallelComponent::read_data(
                reader, input_dim, output_dim,
            )?),
        };

        reader.expect_token(END_OF_COMPONENT)?;
        Ok(Some(component))
    }

    pub fn write<W: Write>(&self, writer: &mut TokenWriter<W>) -> Result<()> {
        writer.write_token(self.kind().marker())?;
        writer.write_int(self.output_dim())?;
        writer.write_int(self.input_dim())?;
        writer.newline()?;

        match self {
            Affine(c) => c.write_data(writer)?,
            Dropout(c) => c.write_data(writer)?,
            Lstm(c) => c.write_data(writer)?,
            BLstm(c) => c.write_data(writer)?,
            Parallel(c) => c.write_data(writer)?,
            Activation(_) => {}
        }

        writer.write_token(END_OF_COMPONENT)?;
        writer.newline()
    }

    /// Component specific details, appended to its line of `Nnet::info`.
    pub fn info(&self) -> String {
        match self {
            Affine(c) => c.info(),
            Dropout(c) => c.info(),
            Lstm(c) => c.info(),
            BLstm(c) => c.info(),
            Parallel(c) => c.info(),
            Activation(_) => String::new(),
        }
    }

    pub fn info_gradient(&self) -> String {
        self.as_updatable()
            .map(|c| c.info_gradient())
            .unwrap_or_default()
    }
}

impl ComponentKind {
    fn is_width_preserving(self) -> bool {
        matches!(self, K::Sigmoid | K::Tanh | K::Softmax | K::Dropout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::StdRng};
    use std::io::Cursor;

    #[test]
    fn markers_round_trip() {
        for kind in ComponentKind::ALL {
            assert_eq!(ComponentKind::from_marker(kind.marker()), Some(kind));
        }
        assert_eq!(
            ComponentKind::from_marker("<affinetransform>"),
            Some(ComponentKind::AffineTransform)
        );
        assert_eq!(ComponentKind::from_marker("<Convolutional>"), None);
    }

    #[test]
    fn init_rejects_unknown_markers_and_options() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            Component::init("<Maxout> <InputDim> 2 <OutputDim> 2", &mut rng),
            Err(NnetErr::UnknownComponent(_))
        ));
        assert!(Component::init("<Sigmoid> <InputDim> 2 <OutputDim> 2 <Bogus> 1", &mut rng).is_err());
        assert!(Component::init("<Tanh> <InputDim> 2 <OutputDim> 3", &mut rng).is_err());
    }

    #[test]
    fn only_parametric_components_are_updatable() {
        let mut rng = StdRng::seed_from_u64(0);
        let affine = Component::init("<AffineTransform> <InputDim> 3 <OutputDim> 2", &mut rng).unwrap();
        let softmax = Component::init("<Softmax> <InputDim> 2 <OutputDim> 2", &mut rng).unwrap();

        assert!(affine.is_updatable());
        assert_eq!(affine.as_updatable().map(|c| c.num_params()), Some(8));
        assert!(!softmax.is_updatable());
        assert_eq!(softmax.kind(), ComponentKind::Softmax);
    }

    #[test]
    fn backpropagate_tells_rows_from_columns() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut affine = Component::init("<AffineTransform> <InputDim> 3 <OutputDim> 4", &mut rng).unwrap();
        let input = Array2::<f32>::zeros((2, 3));
        let output = Array2::<f32>::zeros((2, 4));
        let mut in_diff = Array2::zeros((0, 0));

        assert!(matches!(
            affine.backpropagate(input.view(), output.view(), Array2::zeros((3, 4)).view(), &mut in_diff),
            Err(NnetErr::NotPropagated)
        ));
        assert!(matches!(
            affine.backpropagate(input.view(), output.view(), Array2::zeros((2, 5)).view(), &mut in_diff),
            Err(NnetErr::SizeMismatch { got: 5, expected: 4, .. })
        ));
    }

    #[test]
    fn read_stops_at_the_end_of_the_network() {
        let text = "<Nnet>\n<Sigmoid> 3 3\n<!EndOfComponent>\n</Nnet>\n";
        let mut reader = TokenReader::new(Cursor::new(text), false);

        let first = Component::read(&mut reader).unwrap().unwrap();
        assert_eq!(first.kind(), ComponentKind::Sigmoid);
        assert_eq!(first.input_dim(), 3);
        assert!(Component::read(&mut reader).unwrap().is_none());
    }

    #[test]
    fn written_components_read_back() {
        let mut rng = StdRng::seed_from_u64(5);
        let dropout =
            Component::init("<Dropout> <InputDim> 4 <OutputDim> 4 <DropoutRetention> 0.8", &mut rng)
                .unwrap();

        for binary in [false, true] {
            let mut writer = TokenWriter::new(Vec::new(), binary);
            dropout.write(&mut writer).unwrap();

            let bytes = writer.into_inner();
            let mut reader = TokenReader::new(Cursor::new(bytes), binary);
            let Some(Component::Dropout(read)) = Component::read(&mut reader).unwrap() else {
                panic!("expected a dropout component");
            };
            assert_eq!(read.dim(), 4);
            assert!((read.retention() - 0.8).abs() < 1e-6);
        }
    }
}
