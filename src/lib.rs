pub mod calculations;
pub mod config;
pub mod error;
pub mod fetch;
pub mod model;
pub mod orchestrator;
pub mod output;
pub mod schema;
pub mod store;
pub mod tba;

#[cfg(test)]
pub(crate) mod test_support;
