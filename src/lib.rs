pub mod arch;
pub mod error;
pub mod io;
pub mod options;
pub mod stats;

pub use arch::{
    Nnet, UpdatableComponent,
    layers::{Component, ComponentKind},
};
pub use error::{NnetErr, Result};
pub use options::TrainOptions;
