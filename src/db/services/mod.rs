//! High-level database API, one sub-module per domain entity. Everything
//! else in the crate (the dispatcher, the scheduler, the web layer) talks to
//! these functions instead of writing queries of its own.

pub mod account_service;
pub mod campaign_service;
pub mod queue_service;
pub mod subscription_service;
pub mod target_service;
pub mod user_service;
