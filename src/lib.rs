pub mod cli;
pub mod config;
pub mod error;
pub mod filesystem;
pub mod orchestrator;
pub mod parse;
pub mod status;
pub mod transfer;
pub mod util;

pub use error::ScanError;
pub use error::TransferError;
