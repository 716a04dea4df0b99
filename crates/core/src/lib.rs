//! storelink core - shared domain types.
//!
//! This crate provides the types shared by the storelink service and its
//! integration tests:
//! - typed identifiers for the three order id spaces (local storefront,
//!   Shopify, keyCRM)
//! - Shopify global ids (`gid://shopify/<Type>/<id>`)
//! - the keyCRM status translation table
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions - no I/O, no database
//! access, no HTTP clients.
//!
//! # Modules
//!
//! - [`types`] - Newtype ids, GIDs, statuses, subscription kinds and emails

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
