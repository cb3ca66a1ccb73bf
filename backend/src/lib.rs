pub mod cache;
pub mod config;
pub mod dataset;
pub mod error;
pub mod inference;
pub mod logging;
#[cfg(feature = "torch")]
pub mod model;
pub mod preprocess;
pub mod routes;
pub mod training;
