//! roster-watch command-line front end: layered configuration, logging
//! setup, run history and outcome notification around the crawl engine.

pub mod commands;
pub mod config;
pub mod logging;
pub mod notify;
pub mod run_log;
