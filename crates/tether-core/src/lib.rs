//! # tether-core
//!
//! Foundation types for the Tether control-plane link.
//!
//! This crate provides the shared vocabulary the other tether crates depend
//! on:
//!
//! - **Branded IDs**: [`ids::RequestId`], [`ids::ClientInstanceId`] as newtypes
//! - **Wire envelopes**: [`envelope::RequestEnvelope`],
//!   [`envelope::ResponseEnvelope`], [`envelope::PushEnvelope`] and
//!   shape-based classification via [`envelope::classify`]
//! - **Errors**: [`errors::LinkError`] hierarchy via `thiserror`
//! - **Backoff**: [`backoff::reconnect_delay`] for capped exponential retry
//! - **Logging**: [`logging::init_subscriber`] for `tracing` setup
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by `tether-link`, `tether-api` and
//! `tether-kb`.

#![deny(unsafe_code)]

pub mod backoff;
pub mod constants;
pub mod envelope;
pub mod errors;
pub mod ids;
pub mod logging;
