use std::{env, fs, io::Cursor, path::PathBuf, process};

use ndarray::{Array1, Array2, Axis};
use ndarray_rand::RandomExt;
use rand::{SeedableRng, rngs::StdRng};
use rand_distr::Uniform;

use nnet::{
    Component, ComponentKind, Nnet, NnetErr, TrainOptions, UpdatableComponent,
    arch::layers::{Activation, AffineTransform},
    io::{TokenReader, TokenWriter},
};

const EPS: f32 = 1e-5;

fn rng() -> StdRng {
    StdRng::seed_from_u64(42)
}

fn temp_path(name: &str) -> PathBuf {
    env::temp_dir().join(format!("nnet-test-{}-{name}", process::id()))
}

fn random_input(rows: usize, cols: usize) -> Array2<f32> {
    Array2::random_using((rows, cols), Uniform::new(-1f32, 1.).unwrap(), &mut rng())
}

fn affine_sigmoid() -> Nnet {
    let proto = "<NnetProto>\n\
                 <AffineTransform> <InputDim> 10 <OutputDim> 5 <ParamStddev> 0.5\n\
                 \n\
                 <Sigmoid> <InputDim> 5 <OutputDim> 5\n\
                 </NnetProto>\n";
    Nnet::init(Cursor::new(proto), &mut rng()).unwrap()
}

fn assert_close(a: &Array1<f32>, b: &Array1<f32>) {
    assert_eq!(a.len(), b.len());
    for (x, y) in a.iter().zip(b) {
        assert!((x - y).abs() < EPS, "{x} != {y}");
    }
}

#[test]
fn scenario_a_propagate_shapes() {
    let mut nnet = affine_sigmoid();
    assert_eq!(nnet.num_components(), 2);

    let mut out = Array2::zeros((0, 0));
    nnet.propagate(random_input(3, 10).view(), &mut out).unwrap();

    assert_eq!(out.dim(), (3, 5));
    assert!(nnet.check().is_ok());
}

#[test]
fn scenario_b_backpropagate_updates_the_affine_once() {
    let mut nnet = affine_sigmoid();
    let lr = 0.1;
    nnet.set_train_options(TrainOptions::with_learn_rate(lr));

    let x = random_input(3, 10);
    let mut out = Array2::zeros((0, 0));
    nnet.propagate(x.view(), &mut out).unwrap();

    let before = nnet.get_weights().unwrap();
    let mut in_diff = Array2::zeros((0, 0));
    nnet.backpropagate(Array2::ones((3, 5)).view(), Some(&mut in_diff))
        .unwrap();
    assert_eq!(in_diff.dim(), (3, 10));

    // a single step along diff^T * input, diff being the affine's output gradient
    let diff = &nnet.backpropagate_buffer()[1];
    assert_eq!(diff.dim(), (3, 5));
    assert_eq!(nnet.propagate_buffer()[0], x);

    let corr = diff.t().dot(&x);
    let bias_corr = diff.sum_axis(Axis(0));
    let expected: Array1<f32> = corr
        .iter()
        .chain(&bias_corr)
        .zip(&before)
        .map(|(g, w)| w - lr * g)
        .collect();

    assert_close(&nnet.get_weights().unwrap(), &expected);
}

#[test]
fn scenario_c_weights_round_trip() {
    let mut nnet = affine_sigmoid();
    let p = nnet.num_params();
    assert_eq!(p, 10 * 5 + 5);

    let v = Array1::from_iter((0..p).map(|i| i as f32 / p as f32 - 0.5));
    nnet.set_weights(v.view()).unwrap();
    assert_eq!(nnet.get_weights().unwrap(), v);
    assert_eq!(nnet.get_params().unwrap(), v);
}

#[test]
fn scenario_d_mismatched_append_fails() {
    let mut nnet = Nnet::new();
    nnet.append_component(Component::Affine(AffineTransform::zeros(10, 5)))
        .unwrap();

    let err = nnet
        .append_component(Component::Affine(AffineTransform::zeros(6, 3)))
        .unwrap_err();
    assert!(matches!(
        err,
        NnetErr::DimMismatch {
            output_dim: 5,
            input_dim: 6,
            ..
        }
    ));
    assert!(err.to_string().contains("Previous layer output: 5 Current layer input: 6"));
    assert!(nnet.check().is_err());
}

#[test]
fn scenario_e_empty_network_from_disk() {
    let path = temp_path("empty.nnet");
    fs::write(&path, "<Nnet>\n</Nnet>\n").unwrap();

    let mut nnet = Nnet::read_file(&path).unwrap();
    fs::remove_file(&path).unwrap();
    assert_eq!(nnet.num_components(), 0);

    let x = random_input(2, 4);
    let mut out = Array2::zeros((0, 0));
    nnet.propagate(x.view(), &mut out).unwrap();
    assert_eq!(out, x);
    assert!(nnet.info().starts_with("num-components 0\n"));
}

#[test]
fn scenario_f_buffer_footprint() {
    let proto = "<AffineTransform> <InputDim> 4 <OutputDim> 6\n\
                 <Tanh> <InputDim> 6 <OutputDim> 6\n\
                 <AffineTransform> <InputDim> 6 <OutputDim> 2\n";
    let mut nnet = Nnet::init(Cursor::new(proto), &mut rng()).unwrap();
    let x = random_input(5, 4);

    let mut fed = Array2::zeros((0, 0));
    nnet.feedforward(x.view(), &mut fed).unwrap();
    assert!(nnet.propagate_buffer()[..2].iter().all(|b| b.is_empty()));

    let mut propagated = Array2::zeros((0, 0));
    nnet.propagate(x.view(), &mut propagated).unwrap();
    assert_eq!(nnet.propagate_buffer().len(), 4);
    assert!(nnet.propagate_buffer().iter().all(|b| b.nrows() == 5));
    assert_eq!(fed, propagated);
}

#[test]
fn persisted_networks_read_back() {
    let proto = "<AffineTransform> <InputDim> 3 <OutputDim> 8 <LearnRateCoef> 0.5\n\
                 <Dropout> <InputDim> 8 <OutputDim> 8 <DropoutRetention> 0.9\n\
                 <LstmProjectedStreams> <InputDim> 8 <OutputDim> 4 <CellDim> 5 <ClipGradient> 5\n\
                 <BLstmProjectedStreams> <InputDim> 4 <OutputDim> 6 <CellDim> 3\n\
                 <AffineTransform> <InputDim> 6 <OutputDim> 2\n\
                 <Softmax> <InputDim> 2 <OutputDim> 2\n";
    let nnet = Nnet::init(Cursor::new(proto), &mut rng()).unwrap();

    for binary in [false, true] {
        let path = temp_path(if binary { "model.bin" } else { "model.txt" });
        nnet.write_file(&path, binary).unwrap();
        let read = Nnet::read_file(&path).unwrap();
        fs::remove_file(&path).unwrap();

        assert_eq!(read.num_components(), nnet.num_components());
        for (a, b) in read.components().iter().zip(nnet.components()) {
            assert_eq!(a.kind(), b.kind());
            assert_eq!(a.input_dim(), b.input_dim());
            assert_eq!(a.output_dim(), b.output_dim());
        }
        assert_close(&read.get_params().unwrap(), &nnet.get_params().unwrap());
    }
}

#[test]
fn binary_files_carry_the_header() {
    let nnet = Nnet::from_components([Component::Activation(Activation::tanh(2))]).unwrap();
    let path = temp_path("header.bin");
    nnet.write_file(&path, true).unwrap();

    let bytes = fs::read(&path).unwrap();
    fs::remove_file(&path).unwrap();
    assert!(bytes.starts_with(b"\0B<Nnet> "));
}

#[test]
fn in_memory_streams_round_trip() {
    let nnet = affine_sigmoid();
    let mut writer = TokenWriter::new(Vec::new(), false);
    nnet.write(&mut writer).unwrap();

    let text = String::from_utf8(writer.into_inner()).unwrap();
    assert!(text.starts_with("<Nnet> \n<AffineTransform> 5 10 \n"));
    assert!(text.trim_end().ends_with("</Nnet>"));

    let mut reader = TokenReader::new(Cursor::new(text), false);
    let read = Nnet::read(&mut reader).unwrap();
    assert_close(&read.get_weights().unwrap(), &nnet.get_weights().unwrap());
}

#[test]
fn prototype_errors_surface() {
    assert!(matches!(
        Nnet::init(Cursor::new("<Convolutional> <InputDim> 3 <OutputDim> 3\n"), &mut rng()),
        Err(NnetErr::UnknownComponent(_))
    ));
    assert!(Nnet::init(Cursor::new("<Sigmoid> <OutputDim> 3\n"), &mut rng()).is_err());
    assert!(
        Nnet::init(
            Cursor::new("<AffineTransform> <InputDim> 3 <OutputDim> 2 <Stddev> 1\n"),
            &mut rng()
        )
        .is_err()
    );
}

#[test]
fn unidirectional_streams_are_reset_by_flag() {
    let proto = "<LstmProjectedStreams> <InputDim> 2 <OutputDim> 3 <CellDim> 4 <ParamScale> 0.3\n";
    let mut nnet = Nnet::init(Cursor::new(proto), &mut rng()).unwrap();
    let x = random_input(6, 2);

    nnet.reset_lstm_streams(&[true, true]).unwrap();
    let mut first = Array2::zeros((0, 0));
    nnet.propagate(x.view(), &mut first).unwrap();

    // only the second stream starts over
    nnet.reset_lstm_streams(&[false, true]).unwrap();
    let mut second = Array2::zeros((0, 0));
    nnet.propagate(x.view(), &mut second).unwrap();

    for t in 0..3 {
        assert_ne!(first.row(2 * t), second.row(2 * t));
        assert_eq!(first.row(2 * t + 1), second.row(2 * t + 1));
    }

    let Component::Lstm(lstm) = nnet.component(0).unwrap() else {
        panic!("expected an lstm");
    };
    assert_eq!(lstm.num_streams(), 2);
}

#[test]
fn seq_lengths_reach_bidirectional_components() {
    let proto = "<BLstmProjectedStreams> <InputDim> 2 <OutputDim> 4 <CellDim> 3\n\
                 <Sigmoid> <InputDim> 4 <OutputDim> 4\n";
    let mut nnet = Nnet::init(Cursor::new(proto), &mut rng()).unwrap();
    nnet.set_seq_lengths(&[2, 2, 1]);

    let Component::BLstm(blstm) = nnet.component(0).unwrap() else {
        panic!("expected a blstm");
    };
    assert_eq!(blstm.seq_lengths(), [2, 2, 1]);

    let mut out = Array2::zeros((0, 0));
    assert!(nnet.propagate(random_input(5, 2).view(), &mut out).is_err());
    nnet.propagate(random_input(6, 2).view(), &mut out).unwrap();
    assert_eq!(out.dim(), (6, 4));
}

#[test]
fn parallel_component_from_nested_prototypes() {
    let left = temp_path("left.proto");
    let right = temp_path("right.proto");
    fs::write(&left, "<AffineTransform> <InputDim> 2 <OutputDim> 3\n").unwrap();
    fs::write(&right, "<Sigmoid> <InputDim> 4 <OutputDim> 4\n").unwrap();

    let proto = format!(
        "<ParallelComponent> <InputDim> 6 <OutputDim> 7 <NestedNnetProto> {} {} </NestedNnetProto>\n\
         <Softmax> <InputDim> 7 <OutputDim> 7\n",
        left.display(),
        right.display()
    );
    let mut nnet = Nnet::init(Cursor::new(proto), &mut rng()).unwrap();
    fs::remove_file(&left).unwrap();
    fs::remove_file(&right).unwrap();

    assert_eq!(nnet.component(0).unwrap().kind(), ComponentKind::ParallelComponent);
    assert_eq!(nnet.num_params(), 2 * 3 + 3);

    let mut out = Array2::zeros((0, 0));
    nnet.propagate(random_input(4, 6).view(), &mut out).unwrap();
    assert_eq!(out.dim(), (4, 7));
    nnet.backpropagate(Array2::ones((4, 7)).view(), None).unwrap();

    let info = nnet.info_propagate();
    assert!(info.contains("nested_network #2"));
    assert!(nnet.info().contains("component 1 : <ParallelComponent>, input-dim 6, output-dim 7"));

    let mut writer = TokenWriter::new(Vec::new(), true);
    nnet.write(&mut writer).unwrap();
    let mut reader = TokenReader::new(Cursor::new(writer.into_inner()), true);
    let read = Nnet::read(&mut reader).unwrap();
    assert_close(&read.get_params().unwrap(), &nnet.get_params().unwrap());
}

#[test]
fn train_options_reach_every_updatable_component() {
    let mut nnet = affine_sigmoid();
    let opts = TrainOptions::from_json(r#"{ "learn_rate": 0.5, "momentum": 0.9 }"#).unwrap();
    nnet.set_train_options(opts);

    assert_eq!(nnet.train_options(), &opts);
    let affine = nnet.component(0).unwrap().as_updatable().unwrap();
    assert_eq!(affine.train_options(), &opts);
}
