//! storelink server library.
//!
//! Bridges three systems around one order:
//! - Shopify, where the order is placed and fulfilled
//! - keyCRM, where operators move it through statuses
//! - eSputnik, which mails the customer on lifecycle changes
//!
//! keyCRM status webhooks are fanned out to Shopify mutations and eSputnik
//! events through the order id mapping store. Shopify webhooks feed three
//! in-process job queues: order sync into keyCRM, lifecycle events, and price
//! tracking for subscriber alerts.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod db;
pub mod error;
pub mod esputnik;
pub mod fanout;
pub mod keycrm;
pub mod pricing;
pub mod queue;
pub mod routes;
pub mod shopify;
pub mod state;
pub mod workers;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;
