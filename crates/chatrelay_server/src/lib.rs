#![forbid(unsafe_code)]

pub mod adapters;
pub mod config;
pub mod server;
pub mod util;
