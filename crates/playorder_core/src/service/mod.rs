//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate ordering store calls into membership use-cases.
//! - Keep callers decoupled from storage details.

pub mod ordering_service;
