//! keyCRM webhook.
//!
//! Status changes are applied inline; a 5xx response makes keyCRM redeliver.

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Query, State},
    response::IntoResponse,
    routing::post,
};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use storelink_core::{KeycrmOrderId, KeycrmStatusId, ShopifyAction};
use tracing::{debug, info, instrument};

use super::parse_json;
use crate::error::AppError;
use crate::fanout::{FanoutOutcome, NotificationOutcome, StatusEvent};
use crate::state::AppState;

/// Event name keyCRM sends when an order moves to another status.
pub const STATUS_CHANGE_EVENT: &str = "order.change_order_status";

pub fn router() -> Router<AppState> {
    Router::new().route("/webhooks/keycrm", post(handle_webhook))
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct KeycrmWebhook {
    event: String,
    #[serde(default)]
    context: serde_json::Value,
}

/// The part of an order context the fanout needs.
#[derive(Debug, Deserialize)]
struct StatusContext {
    id: i64,
    status_id: i32,
}

/// Response body; mostly useful when replaying webhooks by hand.
#[derive(Debug, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
enum WebhookResponse {
    Ignored {
        event: String,
    },
    Dropped {
        keycrm_order_id: KeycrmOrderId,
    },
    Applied {
        keycrm_order_id: KeycrmOrderId,
        actions: Vec<ShopifyAction>,
        notification: &'static str,
    },
}

#[instrument(skip(state, query, body))]
async fn handle_webhook(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    if let Some(expected) = &state.secrets().keycrm {
        let provided = query.token.as_deref().unwrap_or_default();
        if !constant_time_compare(provided, expected.expose_secret()) {
            return Err(AppError::Unauthorized("invalid webhook token".into()));
        }
    }

    let webhook: KeycrmWebhook = parse_json(&body)?;
    if webhook.event != STATUS_CHANGE_EVENT {
        debug!(event = %webhook.event, "Ignoring keyCRM event");
        return Ok(Json(WebhookResponse::Ignored {
            event: webhook.event,
        }));
    }

    let context: StatusContext = serde_json::from_value(webhook.context)
        .map_err(|e| AppError::BadRequest(format!("invalid status context: {e}")))?;
    let event = StatusEvent::new(
        KeycrmOrderId::new(context.id),
        KeycrmStatusId::new(context.status_id),
    );

    let response = match state.fanout().handle(&event).await? {
        FanoutOutcome::Dropped { keycrm_order_id } => {
            WebhookResponse::Dropped { keycrm_order_id }
        }
        FanoutOutcome::Completed {
            mapping,
            notification,
            actions,
        } => {
            info!(
                keycrm_order_id = context.id,
                local_order_id = %mapping.local_order_id,
                ?actions,
                "keyCRM status applied"
            );
            WebhookResponse::Applied {
                keycrm_order_id: event.keycrm_order_id,
                actions,
                notification: match notification {
                    NotificationOutcome::NotApplicable => "not_applicable",
                    NotificationOutcome::Sent(_) => "sent",
                    NotificationOutcome::Failed { .. } => "failed",
                },
            }
        }
    };

    Ok(Json(response))
}

/// Constant-time string comparison to prevent timing attacks.
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result: u8 = 0;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }

    result == 0
}
