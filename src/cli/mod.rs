//! Command-line interface
//!
//! Only available with the `cli` feature.

mod config;
mod interactive;
#[path = "main.rs"]
mod main_impl;

pub use main_impl::{main, Cli};
