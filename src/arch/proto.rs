use std::{collections::VecDeque, str::FromStr};

use crate::{NnetErr, Result};

/// A single parsed prototype line, e.g.
/// `<AffineTransform> <InputDim> 10 <OutputDim> 5 <ParamStddev> 0.1`.
///
/// Options are consumed by the component that owns the marker; whatever is left
/// once the component is built is reported as unknown.
#[derive(Debug)]
pub struct ProtoLine {
    marker: String,
    input_dim: usize,
    output_dim: usize,
    options: VecDeque<(String, Vec<String>)>,
}

impl ProtoLine {
    /// Parses a prototype line.
    ///
    /// # Arguments
    /// * `line` - The description of a single component.
    ///
    /// # Returns
    /// The parsed line or an error if the marker or any of the dimensions is missing.
    pub fn parse(line: &str) -> Result<Self> {
        let mut tokens = line.split_whitespace();
        let marker = tokens
            .next()
            .ok_or_else(|| NnetErr::parse("empty component prototype"))?
            .to_string();

        let mut options: VecDeque<(String, Vec<String>)> = VecDeque::new();
        for token in tokens {
            if token.starts_with("</") {
                continue;
            }

            if token.starts_with('<') {
                options.push_back((token.to_string(), Vec::new()));
                continue;
            }

            let Some((_, values)) = options.back_mut() else {
                return Err(NnetErr::parse(format!("dangling value {token} in {line:?}")));
            };
            values.push(token.to_string());
        }

        let mut proto = Self {
            marker,
            input_dim: 0,
            output_dim: 0,
            options,
        };

        proto.input_dim = proto
            .take("<InputDim>")?
            .ok_or_else(|| NnetErr::parse(format!("missing <InputDim> in {line:?}")))?;
        proto.output_dim = proto
            .take("<OutputDim>")?
            .ok_or_else(|| NnetErr::parse(format!("missing <OutputDim> in {line:?}")))?;

        if proto.input_dim == 0 || proto.output_dim == 0 {
            return Err(NnetErr::parse(format!("zero sized component in {line:?}")));
        }

        Ok(proto)
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn output_dim(&self) -> usize {
        self.output_dim
    }

    /// Removes the option `key` and returns its values, if present.
    pub fn take_values(&mut self, key: &str) -> Option<Vec<String>> {
        let pos = self.options.iter().position(|(k, _)| k == key)?;
        self.options.remove(pos).map(|(_, values)| values)
    }

    /// Removes the single valued option `key` and parses it.
    pub fn take<T: FromStr>(&mut self, key: &str) -> Result<Option<T>> {
        let Some(values) = self.take_values(key) else {
            return Ok(None);
        };

        match values.as_slice() {
            [value] => value
                .parse()
                .map(Some)
                .map_err(|_| NnetErr::parse(format!("invalid value {value} for {key}"))),
            _ => Err(NnetErr::parse(format!(
                "{key} expects a single value, got {}",
                values.len()
            ))),
        }
    }

    /// Removes the option `key`, falling back to `default` when absent.
    pub fn take_or<T: FromStr>(&mut self, key: &str, default: T) -> Result<T> {
        Ok(self.take(key)?.unwrap_or(default))
    }

    /// Fails if there are options no one consumed.
    pub fn finish(self) -> Result<()> {
        match self.options.front() {
            Some((key, _)) => Err(NnetErr::parse(format!(
                "unknown option {key} for component {}",
                self.marker
            ))),
            None => Ok(()),
        }
    }
}
