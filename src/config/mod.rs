// src/config/mod.rs
pub mod files;
pub mod settings;

pub use settings::{AppConfig, Environment, LogFormat};
