pub mod animator;
pub mod config;
pub mod db;
pub mod error;
pub mod geometry;
pub mod logging;
pub mod migrations;
pub mod models;
pub mod repository;
pub mod volume;

pub use config::Config;
pub use error::{Error, Result};
