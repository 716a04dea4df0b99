//! Order statuses and the keyCRM status translation table.
//!
//! keyCRM reports order progress as numeric status ids. Each id translates to
//! at most one eSputnik lifecycle event and to zero or more Shopify order
//! actions. The table is static configuration: it is not computed and unknown
//! ids translate to nothing.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Numeric order status id as configured in keyCRM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeycrmStatusId(i32);

impl KeycrmStatusId {
    #[must_use]
    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn as_i32(&self) -> i32 {
        self.0
    }
}

impl fmt::Display for KeycrmStatusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for KeycrmStatusId {
    fn from(id: i32) -> Self {
        Self(id)
    }
}

/// Order lifecycle status understood by eSputnik's orders API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EsputnikOrderStatus {
    Initialized,
    InProgress,
    Delivered,
    Cancelled,
}

impl EsputnikOrderStatus {
    /// Wire value sent in the `status` field.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Initialized => "INITIALIZED",
            Self::InProgress => "IN_PROGRESS",
            Self::Delivered => "DELIVERED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for EsputnikOrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A Shopify order mutation triggered by a keyCRM status.
///
/// The declaration order is the execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShopifyAction {
    MarkPaid,
    Fulfill,
    Close,
    Cancel,
}

impl ShopifyAction {
    /// All actions in execution order.
    pub const ALL: [Self; 4] = [Self::MarkPaid, Self::Fulfill, Self::Close, Self::Cancel];

    /// keyCRM status ids that trigger this action.
    #[must_use]
    pub const fn status_ids(&self) -> &'static [i32] {
        match self {
            Self::MarkPaid => PAID_STATUS_IDS,
            Self::Fulfill => FULFILL_STATUS_IDS,
            Self::Close => CLOSE_STATUS_IDS,
            Self::Cancel => CANCEL_STATUS_IDS,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MarkPaid => "mark_paid",
            Self::Fulfill => "fulfill",
            Self::Close => "close",
            Self::Cancel => "cancel",
        }
    }
}

impl fmt::Display for ShopifyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const PAID_STATUS_IDS: &[i32] = &[3, 21];
const FULFILL_STATUS_IDS: &[i32] = &[8, 9, 10];
const CLOSE_STATUS_IDS: &[i32] = &[12];
const CANCEL_STATUS_IDS: &[i32] = &[18, 19, 20, 15, 13, 14, 16, 17];

const ESPUTNIK_EVENTS: &[(i32, EsputnikOrderStatus)] = &[
    (3, EsputnikOrderStatus::Initialized),
    (10, EsputnikOrderStatus::InProgress),
    (12, EsputnikOrderStatus::Delivered),
    (19, EsputnikOrderStatus::Cancelled),
    (15, EsputnikOrderStatus::Cancelled),
];

/// Downstream work derived from one keyCRM status.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ActionSet {
    /// eSputnik lifecycle event to send, if any.
    pub esputnik_event: Option<EsputnikOrderStatus>,
    /// Shopify actions, always in [`ShopifyAction::ALL`] order.
    pub shopify_actions: Vec<ShopifyAction>,
}

impl ActionSet {
    /// Translate a keyCRM status id. Unknown ids yield an empty set.
    #[must_use]
    pub fn for_status(status: KeycrmStatusId) -> Self {
        let id = status.as_i32();
        let esputnik_event = ESPUTNIK_EVENTS
            .iter()
            .find(|(status_id, _)| *status_id == id)
            .map(|(_, event)| *event);
        let shopify_actions = ShopifyAction::ALL
            .into_iter()
            .filter(|action| action.status_ids().contains(&id))
            .collect();

        Self {
            esputnik_event,
            shopify_actions,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.esputnik_event.is_none() && self.shopify_actions.is_empty()
    }

    #[must_use]
    pub fn contains(&self, action: ShopifyAction) -> bool {
        self.shopify_actions.contains(&action)
    }
}

/// What a price subscriber wants to hear about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionKind {
    PriceDrop,
    BackInStock,
    AnyChange,
}

impl SubscriptionKind {
    /// eSputnik event type key used when notifying the subscriber.
    #[must_use]
    pub const fn event_type_key(&self) -> &'static str {
        match self {
            Self::PriceDrop => "price_drop",
            Self::BackInStock => "back_in_stock",
            Self::AnyChange => "price_change",
        }
    }

    /// Whether the subscription is spent once it has fired.
    #[must_use]
    pub const fn is_one_shot(&self) -> bool {
        matches!(self, Self::PriceDrop | Self::BackInStock)
    }
}

impl fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PriceDrop => write!(f, "PRICE_DROP"),
            Self::BackInStock => write!(f, "BACK_IN_STOCK"),
            Self::AnyChange => write!(f, "ANY_CHANGE"),
        }
    }
}

impl std::str::FromStr for SubscriptionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PRICE_DROP" => Ok(Self::PriceDrop),
            "BACK_IN_STOCK" => Ok(Self::BackInStock),
            "ANY_CHANGE" => Ok(Self::AnyChange),
            _ => Err(format!("invalid subscription kind: {s}")),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use EsputnikOrderStatus::{Cancelled, Delivered, InProgress, Initialized};
    use ShopifyAction::{Cancel, Close, Fulfill, MarkPaid};

    fn set(id: i32) -> ActionSet {
        ActionSet::for_status(KeycrmStatusId::new(id))
    }

    #[test]
    fn test_translation_table_matches_configuration() {
        let expected: &[(i32, &[ShopifyAction], Option<EsputnikOrderStatus>)] = &[
            (3, &[MarkPaid], Some(Initialized)),
            (21, &[MarkPaid], None),
            (8, &[Fulfill], None),
            (9, &[Fulfill], None),
            (10, &[Fulfill], Some(InProgress)),
            (12, &[Close], Some(Delivered)),
            (18, &[Cancel], None),
            (19, &[Cancel], Some(Cancelled)),
            (20, &[Cancel], None),
            (15, &[Cancel], Some(Cancelled)),
            (13, &[Cancel], None),
            (14, &[Cancel], None),
            (16, &[Cancel], None),
            (17, &[Cancel], None),
        ];

        for (id, actions, event) in expected {
            let got = set(*id);
            assert_eq!(got.shopify_actions, actions.to_vec(), "actions for {id}");
            assert_eq!(got.esputnik_event, *event, "event for {id}");
        }
    }

    #[test]
    fn test_unlisted_codes_are_empty() {
        for id in [0, 1, 2, 4, 5, 6, 7, 11, 22, 99, -1] {
            assert!(set(id).is_empty(), "status {id} should be empty");
        }
    }

    #[test]
    fn test_every_event_status_also_has_an_action() {
        for (id, _) in ESPUTNIK_EVENTS {
            assert!(!set(*id).shopify_actions.is_empty());
        }
    }

    #[test]
    fn test_action_order_is_fixed() {
        let mut sorted = ShopifyAction::ALL;
        sorted.sort();
        assert_eq!(sorted, ShopifyAction::ALL);
    }

    #[test]
    fn test_esputnik_status_wire_values() {
        assert_eq!(
            serde_json::to_string(&InProgress).unwrap(),
            "\"IN_PROGRESS\""
        );
        assert_eq!(Cancelled.to_string(), "CANCELLED");
    }

    #[test]
    fn test_subscription_kind_parse() {
        assert_eq!(
            "BACK_IN_STOCK".parse::<SubscriptionKind>().unwrap(),
            SubscriptionKind::BackInStock
        );
        assert!("back_in_stock".parse::<SubscriptionKind>().is_err());
        assert!(SubscriptionKind::PriceDrop.is_one_shot());
        assert!(!SubscriptionKind::AnyChange.is_one_shot());
    }
}
