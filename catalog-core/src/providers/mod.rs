//! Bundled source providers.

pub mod yaml;

pub use yaml::YamlSourceProvider;
