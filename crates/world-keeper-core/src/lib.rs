pub mod archive;
pub mod config;
pub mod error;
pub mod restore;
pub mod retention;

pub use error::{Error, Result};
