//! Price alert subscriptions.

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, post},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use storelink_core::{Email, ProductId, SubscriptionKind, VariantId};
use tracing::{info, instrument};
use uuid::Uuid;

use super::parse_json;
use crate::db::{NewPriceSubscription, PriceSubscription};
use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/price-subscriptions", post(create_subscription))
        .route("/api/price-subscriptions/{id}", delete(delete_subscription))
}

#[derive(Debug, Deserialize)]
pub struct CreateSubscriptionRequest {
    pub email: String,
    pub product_id: i64,
    #[serde(default)]
    pub variant_id: Option<i64>,
    pub kind: SubscriptionKind,
    #[serde(default)]
    pub target_price: Option<Decimal>,
}

impl CreateSubscriptionRequest {
    fn validate(self) -> Result<NewPriceSubscription, AppError> {
        let email = Email::parse(&self.email).map_err(|e| AppError::BadRequest(e.to_string()))?;

        if let Some(target) = self.target_price {
            if self.kind != SubscriptionKind::PriceDrop {
                return Err(AppError::BadRequest(
                    "target_price only applies to PRICE_DROP".into(),
                ));
            }
            if target <= Decimal::ZERO {
                return Err(AppError::BadRequest("target_price must be positive".into()));
            }
        }

        Ok(NewPriceSubscription {
            email,
            product_id: ProductId::new(self.product_id),
            variant_id: self.variant_id.map(VariantId::new),
            kind: self.kind,
            target_price: self.target_price,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    pub id: Uuid,
    pub email: Email,
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub kind: SubscriptionKind,
    pub target_price: Option<Decimal>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<PriceSubscription> for SubscriptionResponse {
    fn from(s: PriceSubscription) -> Self {
        Self {
            id: s.id,
            email: s.email,
            product_id: s.product_id,
            variant_id: s.variant_id,
            kind: s.kind,
            target_price: s.target_price,
            active: s.active,
            created_at: s.created_at,
        }
    }
}

#[instrument(skip_all)]
async fn create_subscription(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<SubscriptionResponse>), AppError> {
    let request: CreateSubscriptionRequest = parse_json(&body)?;
    let subscription = state
        .prices()
        .create_subscription(&request.validate()?)
        .await?;

    info!(
        subscription_id = %subscription.id,
        product_id = %subscription.product_id,
        kind = %subscription.kind,
        "Price subscription created"
    );
    Ok((StatusCode::CREATED, Json(subscription.into())))
}

#[instrument(skip(state))]
async fn delete_subscription(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if state.prices().deactivate_subscription(id).await? {
        info!(subscription_id = %id, "Price subscription deactivated");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("subscription {id}")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn request(json: &str) -> CreateSubscriptionRequest {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_valid_request() {
        let new = request(
            r#"{"email":"Tea@Example.ua","product_id":10,"variant_id":11,"kind":"PRICE_DROP","target_price":"95.50"}"#,
        )
        .validate()
        .unwrap();
        assert_eq!(new.product_id, ProductId::new(10));
        assert_eq!(new.variant_id, Some(VariantId::new(11)));
        assert_eq!(new.target_price, Some(Decimal::new(9550, 2)));
    }

    #[test]
    fn test_bad_email_is_rejected() {
        let err = request(r#"{"email":"nope","product_id":10,"kind":"ANY_CHANGE"}"#)
            .validate()
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn test_target_price_needs_price_drop() {
        let err = request(
            r#"{"email":"a@b.ua","product_id":10,"kind":"BACK_IN_STOCK","target_price":10}"#,
        )
        .validate()
        .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        let err = request(
            r#"{"email":"a@b.ua","product_id":10,"kind":"PRICE_DROP","target_price":0}"#,
        )
        .validate()
        .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }
}
