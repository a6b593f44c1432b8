//! # FluxPay Engine
//!
//! A domain-independent payment/billing engine front-ending backend services
//! with order, payment, refund, and webhook capabilities. The engine
//! guarantees eventual consistency across its own store, the external payment
//! gateway, and downstream subscribers:
//!
//! - every committed domain mutation writes its events to a transactional
//!   outbox in the same transaction ([`events`], [`outbox`]);
//! - a background publisher ships outbox rows to the broker with retry and a
//!   poisoning policy ([`outbox::publisher`]);
//! - retried commands are deduplicated by a two-tier idempotency guard
//!   ([`idempotency`]);
//! - multi-step flows run under a persisted saga with compensation and crash
//!   recovery ([`saga`]);
//! - subscribers receive signed webhooks with scheduled retries ([`webhook`]).
//!
//! Everything tenant-scoped: repositories and publishers refuse to act
//! without a [`tenant::TenantContext`].

pub mod config;
pub mod domain;
pub mod error;
pub mod events;
pub mod gateway;
pub mod idempotency;
pub mod outbox;
pub mod repos;
pub mod routes;
pub mod saga;
pub mod services;
pub mod tenant;
pub mod webhook;

pub use config::Config;
pub use error::{EngineError, EngineResult};
pub use tenant::{TenantContext, TenantId};
