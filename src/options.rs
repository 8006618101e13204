use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::Result;

/// The hyperparameters shared by every updatable component of a network.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct TrainOptions {
    pub learn_rate: f32,
    pub momentum: f32,
    pub l1_penalty: f32,
    pub l2_penalty: f32,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            learn_rate: 0.008,
            momentum: 0.0,
            l1_penalty: 0.0,
            l2_penalty: 0.0,
        }
    }
}

impl TrainOptions {
    /// Creates a new `TrainOptions` with the given learning rate and every other
    /// field at its default.
    pub fn with_learn_rate(learn_rate: f32) -> Self {
        Self {
            learn_rate,
            ..Default::default()
        }
    }

    /// Parses the options from a json document, missing fields take their default value.
    ///
    /// # Arguments
    /// * `json` - The json text.
    ///
    /// # Returns
    /// The parsed options or an error if the document is malformed.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads the options from a json file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let opts = TrainOptions::from_json(r#"{ "learn_rate": 0.1, "momentum": 0.9 }"#).unwrap();

        assert_eq!(opts.learn_rate, 0.1);
        assert_eq!(opts.momentum, 0.9);
        assert_eq!(opts.l1_penalty, 0.0);
        assert_eq!(opts.l2_penalty, 0.0);
    }

    #[test]
    fn options_load_from_a_file() {
        let path = std::env::temp_dir().join(format!("nnet-opts-{}.json", std::process::id()));
        std::fs::write(&path, r#"{ "learn_rate": 0.25, "l2_penalty": 0.5 }"#).unwrap();

        let opts = TrainOptions::from_json_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(opts.learn_rate, 0.25);
        assert_eq!(opts.l2_penalty, 0.5);
        assert_eq!(opts.momentum, 0.0);

        assert!(matches!(
            TrainOptions::from_json_file(&path),
            Err(crate::NnetErr::Io(_))
        ));
    }

    #[test]
    fn malformed_json_fails() {
        assert!(TrainOptions::from_json("{ learn_rate: }").is_err());
    }
}
