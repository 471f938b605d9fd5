pub mod config;
pub mod error;
pub mod graph;
pub mod modules;
pub mod ninja;
pub mod project;
pub mod rules;
pub mod runner;
pub mod workspace;

pub use error::{Error, ErrorKind, Result};
