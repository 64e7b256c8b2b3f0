//! Upload observation and auto-share pipeline for a File Browser instance.
//!
//! The proxy forwards every request to the file manager unchanged while the
//! tap watches upload traffic, follows resumable sessions, groups concurrent
//! uploads into batches and creates a share link once per finished
//! single-file upload.

pub mod batch;
pub mod config;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod notify;
pub mod paths;
pub mod server;
pub mod share;
pub mod state;
pub mod tap;
pub mod tus;
pub mod utils;
