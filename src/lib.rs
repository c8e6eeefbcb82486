pub mod cli;
pub mod commands;
pub mod config;
pub mod platform;
pub mod supervisor;
pub mod ui;
