//! Shared plumbing for the companion workspace: logging setup and the
//! admin HTTP listener.

pub mod utils;
pub mod admin_http;
