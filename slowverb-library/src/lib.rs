//! Track loading for slowverb - decoding, metadata, and configuration

mod config;
mod loader;

pub use config::Config;
pub use loader::{LoadError, TrackLoader};
