//! Shopify global identifiers.
//!
//! The Admin GraphQL API addresses every object by a GID of the form
//! `gid://shopify/<Type>/<id>`, while webhooks and the mapping table carry the
//! bare numeric id. [`ShopifyGid`] converts between the two.

use core::fmt;

use serde::{Deserialize, Serialize};

const GID_PREFIX: &str = "gid://shopify/";

/// Errors that can occur when parsing a Shopify identifier.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum GidError {
    /// Input does not start with `gid://shopify/`.
    #[error("not a Shopify GID: {0}")]
    MissingPrefix(String),
    /// The `<Type>/<id>` part is malformed.
    #[error("malformed Shopify GID: {0}")]
    Malformed(String),
    /// The id part is not numeric.
    #[error("Shopify id must be numeric: {0}")]
    NotNumeric(String),
}

/// A parsed Shopify GID, e.g. `gid://shopify/Order/5551234`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShopifyGid {
    resource: String,
    id: String,
}

impl ShopifyGid {
    /// Build a GID from a resource type and numeric id.
    #[must_use]
    pub fn new(resource: &str, id: impl Into<String>) -> Self {
        Self {
            resource: resource.to_string(),
            id: id.into(),
        }
    }

    /// Parse a `gid://shopify/<Type>/<id>` string.
    ///
    /// Query strings (`?inventory_item=..`) are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`GidError`] if the prefix or the `<Type>/<id>` part is missing.
    pub fn parse(s: &str) -> Result<Self, GidError> {
        let rest = s
            .strip_prefix(GID_PREFIX)
            .ok_or_else(|| GidError::MissingPrefix(s.to_string()))?;
        let rest = rest.split('?').next().unwrap_or(rest);
        let (resource, id) = rest
            .split_once('/')
            .ok_or_else(|| GidError::Malformed(s.to_string()))?;
        if resource.is_empty() || id.is_empty() || id.contains('/') {
            return Err(GidError::Malformed(s.to_string()));
        }
        Ok(Self::new(resource, id))
    }

    /// Resource type, e.g. `Order`.
    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Bare id part.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for ShopifyGid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{GID_PREFIX}{}/{}", self.resource, self.id)
    }
}

/// Numeric Shopify order id as stored in the mapping table.
///
/// Kept as a string of digits because Shopify ids exceed what some clients
/// handle as numbers; construction validates the digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ShopifyOrderId(String);

impl ShopifyOrderId {
    /// Parse a numeric order id, or extract it from an order GID.
    ///
    /// # Errors
    ///
    /// Returns [`GidError`] if the value is neither digits nor an `Order` GID.
    pub fn parse(s: &str) -> Result<Self, GidError> {
        let s = s.trim();
        let digits = if s.starts_with(GID_PREFIX) {
            let gid = ShopifyGid::parse(s)?;
            if gid.resource() != "Order" {
                return Err(GidError::Malformed(s.to_string()));
            }
            gid.id
        } else {
            s.to_string()
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(GidError::NotNumeric(s.to_string()));
        }
        Ok(Self(digits))
    }

    /// The bare numeric id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The order's GraphQL id.
    #[must_use]
    pub fn to_gid(&self) -> ShopifyGid {
        ShopifyGid::new("Order", self.0.clone())
    }
}

impl From<u64> for ShopifyOrderId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl TryFrom<String> for ShopifyOrderId {
    type Error = GidError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ShopifyOrderId> for String {
    fn from(id: ShopifyOrderId) -> Self {
        id.0
    }
}

impl fmt::Display for ShopifyOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(feature = "postgres")]
impl sqlx::Type<sqlx::Postgres> for ShopifyOrderId {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Postgres>>::compatible(ty)
    }
}

#[cfg(feature = "postgres")]
impl<'r> sqlx::Decode<'r, sqlx::Postgres> for ShopifyOrderId {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <String as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        Ok(Self::parse(&s)?)
    }
}

#[cfg(feature = "postgres")]
impl sqlx::Encode<'_, sqlx::Postgres> for ShopifyOrderId {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <String as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.0, buf)
    }
}
