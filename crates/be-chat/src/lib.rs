pub mod cache;
pub mod dialog;
pub mod export;
pub mod provision;
pub mod store;

pub use cache::*;
pub use dialog::*;
pub use export::*;
pub use provision::*;
pub use store::*;

#[cfg(test)]
pub(crate) mod testing;
