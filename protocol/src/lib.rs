// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # TinyBank Protocol: Core Library
//!
//! Shared primitives for the TinyBank contracts: who is acting
//! ([`address::Address`]), how much is moving ([`config::Amount`]), and when
//! ([`config::BlockHeight`]).
//!
//! ## Modules
//!
//! - **address**: 20-byte account identifiers and their derivations.
//! - **config**: Protocol constants and the deployment config document.
//! - **logging**: `tracing` subscriber setup for embedders and tests.
//!
//! The contracts themselves live in `tinybank-contracts`; this crate stays
//! free of any business logic so both sides can agree on the vocabulary.

pub mod address;
pub mod config;
pub mod logging;

pub use address::Address;
pub use config::{Amount, BlockHeight};
