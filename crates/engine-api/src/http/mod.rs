//! HTTP/REST API layer for the workflow and campaign engine.
//!
//! Axum-based REST API at `/api/v1/` with an envelope response format and
//! permissive CORS. Authentication and project/membership management are
//! out-of-scope external collaborators (spec.md §1).

pub mod error;
pub mod handlers;
pub mod response;
pub mod router;
