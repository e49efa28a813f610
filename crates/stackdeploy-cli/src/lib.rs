//! Server assembly for the `stackdeploy` binary.

pub mod commands;

pub use commands::serve::{build_api, ApiApplication};
