pub mod config;
pub mod error;
pub mod io;
pub mod lock;
pub mod paths;
pub mod state;
pub mod types;

pub use error::{Result, SpecweaveError};
