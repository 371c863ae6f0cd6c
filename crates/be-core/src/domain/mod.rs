mod error;
pub mod lru;
mod model;
mod ports;
mod types;

pub use error::*;
pub use lru::*;
pub use model::*;
pub use ports::*;
pub use types::*;
