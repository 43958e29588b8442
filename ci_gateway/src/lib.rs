//! Centrix CI gateway: webhook ingestion and build admission.
//!
//! Receives source-control webhooks, records each delivery as a sequenced
//! hook, reconciles repository lifecycle changes, and admits builds into the
//! execution queue (or holds them for approval).

pub mod compiler;
pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod queue;
pub mod routes;
pub mod scm;
pub mod seeder;
pub mod services;
pub mod store;
