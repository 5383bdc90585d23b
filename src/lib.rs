//! Conversion Transfer Library
//!
//! Moves user files into and out of a file conversion service: direct or
//! chunked uploads with server-side reassembly, byte-range chunked downloads,
//! and packaging of a job's outputs into a single `.tar`.
//! The server binary is in main.rs.
//!
//! # Modules
//!
//! - `transfer`: Direct vs. chunked policy shared by both directions
//! - `upload`: Upload sessions, chunk storage and reassembly
//! - `download`: Chunk reads and response headers for stored files
//! - `archive`: Uncompressed tar packaging of job outputs
//! - `routes`: axum HTTP surface over the above

pub mod archive;
pub mod config;
pub mod download;
pub mod error;
pub mod routes;
pub mod state;
pub mod transfer;
pub mod upload;
