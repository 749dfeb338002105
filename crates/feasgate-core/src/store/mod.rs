pub mod freshness;
pub mod loader;
