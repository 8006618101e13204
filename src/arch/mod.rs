pub mod layers;
mod nnet;
mod proto;
mod updatable;

pub use nnet::Nnet;
pub use proto::ProtoLine;
pub use updatable::UpdatableComponent;
