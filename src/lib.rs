pub mod app;
pub mod client;
pub mod config;
pub mod domain;
pub mod endpoint;
pub mod error;
pub mod fs_util;
pub mod output;
pub mod pipeline;
pub mod provider;
pub mod sheet;
pub mod sources;
pub mod tui;
