use std::env;

use anyhow::{Context, bail};
use log::info;
use rand::{SeedableRng, rngs::StdRng};

use nnet::Nnet;

const USAGE: &str = "usage:
  nnet info <model>
  nnet init <proto> <out-model> [--binary=true|false] [--seed=N]
  nnet copy <in-model> <out-model> [--binary=true|false] [--remove-first=N] [--remove-last=N]";

const DEFAULT_SEED: u64 = 777;

struct Flags {
    binary: bool,
    seed: u64,
    remove_first: usize,
    remove_last: usize,
}

impl Default for Flags {
    fn default() -> Self {
        Self {
            binary: true,
            seed: DEFAULT_SEED,
            remove_first: 0,
            remove_last: 0,
        }
    }
}

/// Splits the arguments into positional ones and `--key=value` flags.
fn parse_args(args: &[String]) -> anyhow::Result<(Vec<&str>, Flags)> {
    let mut positional = Vec::new();
    let mut flags = Flags::default();

    for arg in args {
        let Some(flag) = arg.strip_prefix("--") else {
            positional.push(arg.as_str());
            continue;
        };

        let (key, value) = flag
            .split_once('=')
            .with_context(|| format!("flag {arg} needs a value"))?;
        let invalid = || format!("invalid value for --{key}: {value}");

        match key {
            "binary" => flags.binary = value.parse().with_context(invalid)?,
            "seed" => flags.seed = value.parse().with_context(invalid)?,
            "remove-first" => flags.remove_first = value.parse().with_context(invalid)?,
            "remove-last" => flags.remove_last = value.parse().with_context(invalid)?,
            _ => bail!("unknown flag {arg}\n{USAGE}"),
        }
    }

    Ok((positional, flags))
}

fn copy(input: &str, output: &str, flags: &Flags) -> anyhow::Result<()> {
    let mut nnet = Nnet::read_file(input).with_context(|| format!("reading {input}"))?;

    for _ in 0..flags.remove_first {
        nnet.remove_component(0)?;
    }
    for _ in 0..flags.remove_last {
        let last = nnet.num_components().checked_sub(1).context("no components left")?;
        nnet.remove_component(last)?;
    }

    nnet.write_file(output, flags.binary)
        .with_context(|| format!("writing {output}"))?;
    info!("written model to {output}");
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().skip(1).collect();
    let (positional, flags) = parse_args(&args)?;

    match positional.as_slice() {
        ["info", model] => {
            let nnet = Nnet::read_file(model).with_context(|| format!("reading {model}"))?;
            print!("{}", nnet.info());
        }
        ["init", proto, output] => {
            let mut rng = StdRng::seed_from_u64(flags.seed);
            let nnet = Nnet::init_file(proto, &mut rng)
                .with_context(|| format!("initializing from {proto}"))?;
            nnet.write_file(output, flags.binary)
                .with_context(|| format!("writing {output}"))?;
            info!("written initialized model to {output}");
        }
        ["copy", input, output] => copy(input, output, &flags)?,
        _ => bail!("{USAGE}"),
    }

    Ok(())
}
