pub mod conditions;
pub mod config;
pub mod constants;
pub mod driver;
pub mod error;
pub mod json_loader;
pub mod mechanism;
pub mod output;
pub mod solver;
