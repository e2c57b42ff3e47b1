pub mod dsts;

pub use dsts::{DstsClient, DstsError};
