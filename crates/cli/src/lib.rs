pub mod cli;
pub mod commands;
pub mod daemon;
pub mod error;
pub mod logging;
pub mod styles;
