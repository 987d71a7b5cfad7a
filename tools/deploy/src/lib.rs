pub mod app;
pub mod build;
pub mod cli;
pub mod config;
pub mod engine;
pub mod inspect;
pub mod logging;
