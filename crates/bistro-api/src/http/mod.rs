//! HTTP/REST API layer for Bistro.
//!
//! Axum-based REST API at `/api/v1/`: JSON envelope responses for thread
//! management and SSE streams for turns.

pub mod error;
pub mod handlers;
pub mod response;
pub mod router;
