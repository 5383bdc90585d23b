//! Chunked Upload Module
//!
//! Implements resumable large file uploads with:
//! - Client-chosen upload IDs, one session per upload attempt
//! - Idempotent chunk receipt, any arrival order
//! - Server-side reassembly by numeric chunk index
//!
//! Protocol Flow:
//! 1. Client asks for a transfer plan (direct or chunked)
//! 2. Small files are sent in one request
//! 3. Large files are sent chunk by chunk under one upload ID
//! 4. The request carrying the last missing chunk gets the final path back

pub mod chunk_store;
pub mod direct;
pub mod handler;
pub mod session;
pub mod types;

pub use direct::handle_direct_upload;
pub use handler::handle_chunk_upload;
pub use session::SessionManager;
pub use types::*;
