pub mod cli;
pub mod config;
pub mod embed;
pub mod error;
pub mod pipeline;
pub mod protocol;
pub mod vector;
