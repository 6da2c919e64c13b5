//! Core types and utilities for the Z/IP transport
//!
//! This crate provides the error taxonomy, protocol constants and key
//! material shared by the transport, session, client and server crates.

pub mod constants;
pub mod error;
pub mod psk;

pub use constants::*;
pub use error::{DecodeError, ZipError, ZipResult};
pub use psk::{Psk, DEFAULT_PSK};
