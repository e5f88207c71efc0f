//! HTTP server for running boardflow flows.

pub mod app;
pub mod config;
pub mod db;
pub mod error;
pub mod owner;
