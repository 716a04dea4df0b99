//! Core types for storelink.

pub mod email;
pub mod gid;
pub mod id;
pub mod status;

pub use email::{Email, EmailError};
pub use gid::{GidError, ShopifyGid, ShopifyOrderId};
pub use id::*;
pub use status::*;
