//! Command line front end for datafy

pub mod cli;
pub mod config;
pub mod logger;
pub mod mock_llm;
