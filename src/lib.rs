pub mod cli;
pub mod codec;
pub mod nat;
pub mod network;
mod utils;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Result<T> = std::result::Result<T, Error>;

pub use nat::{DiscoverResult, EndpointDependencyType, Nats, discover};
