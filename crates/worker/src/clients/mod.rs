pub mod ca;
pub mod dsts;

pub use ca::{CaClient, CaError};
pub use dsts::{DstsClient, DstsError};
