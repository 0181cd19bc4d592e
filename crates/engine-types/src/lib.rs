//! Shared domain types for the workflow and campaign engine.
//!
//! Pure data definitions: entities, discriminated-union configs, and the
//! shared error enums consumed across every other crate in the workspace.
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod activity;
pub mod campaign;
pub mod config;
pub mod contact;
pub mod email;
pub mod error;
pub mod event;
pub mod job;
pub mod template;
pub mod workflow;
