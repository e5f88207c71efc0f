//! Core domain types and utilities for boardflow.
//!
//! This crate provides the identifiers and error handling shared by the
//! flow engine, the remote session layer and the server.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{DeviceId, FlowId, ParseIdError, UserId};
