//! Callout service library crate.
//!
//! # Purpose
//! Answers connection-authorization requests published by the messaging
//! server: decode, pick a policy, sign the verdict, reply.
//!
//! # Notes
//! The binary wires these pieces to an [`callout_bus::InProcessBus`]; any
//! [`callout_bus::BusConnection`] works the same way.
pub mod bootstrap;
pub mod config;
pub mod observability;
pub mod service;
pub mod signer;
