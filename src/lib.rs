#![cfg_attr(docsrs, feature(doc_cfg))]
//! # pqbms_lib
//!
//! This crate polls Power Queen style BMS (Battery Management System) devices over
//! Bluetooth Low Energy and decodes their telemetry frames.
//!
//! The device understands a small fixed command set, written to a single
//! characteristic that answers with notifications. [`poller::Poller`] sends each
//! command in turn and decodes the reply with the decoders in [`protocol`].
//!
//! ## Features
//!
//! - `default`: Enables `bin-dependencies`, which is intended for compiling the `pqbms` command-line tool and pulls in `bluetooth` and `serde`.
//!
//! ### Transport Features
//! - `bluetooth`: Enables the Bluetooth Low Energy transport using the `bluest` crate.
//!
//! ### Utility Features
//! - `serde`: Enables `serde` support for serializing/deserializing decoded records.
//! - `bin-dependencies`: Enables all features required by the `pqbms` binary executable.

/// Contains error types for the library.
mod error;
/// Sequential polling of the command catalog.
pub mod poller;
/// Command catalog and frame decoders for the BMS protocol.
pub mod protocol;
/// The transport abstraction consumed by the poller.
pub mod transport;

pub use error::{DecodeError, Error, TransportError, UnknownCommand};

/// Bluetooth Low Energy transport.
#[cfg_attr(docsrs, doc(cfg(feature = "bluetooth")))]
#[cfg(feature = "bluetooth")]
pub mod bluetooth;
