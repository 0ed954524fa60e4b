#![forbid(unsafe_code)]

pub mod prelude;

pub mod config;
pub mod error;
pub mod gate;
pub mod lease;
pub mod store;
pub mod task;
pub mod worker;

mod cli;
pub use cli::{Cli, Commands};

pub use error::{Error, Result};
