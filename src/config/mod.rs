// src/config/mod.rs
pub mod resolver;

pub use resolver::{load_settings_default, load_settings_from, sources_path, ResolverSettings};
