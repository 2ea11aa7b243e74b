//! HTTP API handlers.

use super::types::*;
use crate::card::{CardCheckout, CardCheckoutLink, CardCheckoutRequest, FiatCurrency, CARD_PROVIDERS};
use crate::catalog::CRYPTOS;
use crate::config::PaymentsConfig;
use crate::error::PaymentError;
use crate::ipn::{self, CardCallback, IpnNotification, SIGNATURE_HEADER};
use crate::manager::{PollOutcome, SessionManager, SessionRequest};
use crate::notify::NotificationSink;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use secrecy::ExposeSecret;
use serde_json::Value;
use session_store::{Namespace, PackageType};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state for handlers.
pub struct AppState {
    pub manager: Arc<SessionManager>,
    /// Present when card checkout is enabled and configured.
    pub card: Option<CardCheckout>,
    pub notifier: Arc<dyn NotificationSink>,
    pub config: PaymentsConfig,
}

impl AppState {
    pub fn new(
        manager: Arc<SessionManager>,
        card: Option<CardCheckout>,
        notifier: Arc<dyn NotificationSink>,
        config: PaymentsConfig,
    ) -> Self {
        Self {
            manager,
            card,
            notifier,
            config,
        }
    }

    fn description(&self, package: PackageType) -> &str {
        match package {
            PackageType::Full => &self.config.pricing.full_description,
            PackageType::Single => &self.config.pricing.single_description,
        }
    }
}

/// Create the payment API router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/v1/catalog", get(get_catalog))
        .route("/v1/sessions", post(create_session))
        .route("/v1/sessions/:user", get(get_sessions).delete(clear_sessions))
        .route("/v1/sessions/:user/cancel", post(cancel_session))
        .route("/v1/sessions/:user/poll", post(poll_session))
        .route("/v1/card-checkout", post(card_checkout))
        .route("/api/payment-callback", post(payment_callback))
        .route(
            "/api/paygate-callback",
            get(paygate_callback).post(paygate_callback),
        )
        .with_state(state)
}

fn namespace(user: &str) -> Namespace {
    Namespace::for_user(Some(user))
}

/// Health check endpoint.
async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let provider_healthy = state.manager.provider_healthy().await;

    Json(HealthResponse {
        healthy: provider_healthy,
        provider_healthy,
        active_polls: state.manager.active_polls().await.len(),
        card_enabled: state.card.is_some(),
        notifications_enabled: state.config.notifications.enabled,
    })
}

/// Supported cryptos, networks and prices.
async fn get_catalog(State(state): State<Arc<AppState>>) -> Json<CatalogResponse> {
    Json(CatalogResponse {
        cryptos: CRYPTOS,
        prices: state.config.pricing.prices(),
        card: state.card.as_ref().map(|card| CardCatalog {
            providers: CARD_PROVIDERS,
            currencies: FiatCurrency::ALL,
            fee_percent: card.fee_percent(),
        }),
    })
}

/// Return the active session for a key, creating one if needed, and keep
/// polling it in the background.
async fn create_session(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<SessionResponse>), PaymentError> {
    let namespace = Namespace::for_user(request.user.as_deref());
    let package = request.package_type;

    let outcome = state
        .manager
        .request_session(
            &namespace,
            SessionRequest {
                crypto_id: request.crypto_id,
                network_id: request.network_id,
                package_type: package,
                usd_amount: state.config.pricing.prices().price(package),
                description: state.description(package).to_string(),
            },
        )
        .await?;

    let polling = !outcome.session.is_terminal();
    if polling {
        state
            .manager
            .start_polling(&namespace, &outcome.session.key())
            .await;
    }

    let status = if outcome.reused {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };

    Ok((
        status,
        Json(SessionResponse {
            session: outcome.session,
            reused: outcome.reused,
            polling,
        }),
    ))
}

/// Active sessions and history of a user.
async fn get_sessions(
    State(state): State<Arc<AppState>>,
    Path(user): Path<String>,
) -> Json<SessionsResponse> {
    let namespace = namespace(&user);
    let stored = state.manager.sessions(&namespace).await;

    Json(SessionsResponse {
        namespace: namespace.to_string(),
        active: stored.active_sessions().cloned().collect(),
        history: stored.history.iter().rev().cloned().collect(),
    })
}

/// Cancel the active session for a key.
async fn cancel_session(
    State(state): State<Arc<AppState>>,
    Path(user): Path<String>,
    Json(request): Json<SessionKeyRequest>,
) -> Json<CancelResponse> {
    let session = state.manager.cancel(&namespace(&user), &request.key()).await;

    Json(CancelResponse {
        cancelled: session.is_some(),
        session,
    })
}

/// Check the status of an active session now.
async fn poll_session(
    State(state): State<Arc<AppState>>,
    Path(user): Path<String>,
    Json(request): Json<SessionKeyRequest>,
) -> Json<PollResponse> {
    let namespace = namespace(&user);

    let outcome = match state.manager.active_session(&namespace, &request.key()).await {
        Some(session) => state.manager.poll_status(&namespace, &session).await,
        None => PollOutcome::Skipped,
    };

    Json(outcome.into())
}

/// Delete every session of a user.
async fn clear_sessions(
    State(state): State<Arc<AppState>>,
    Path(user): Path<String>,
) -> Result<StatusCode, PaymentError> {
    state.manager.clear_all(&namespace(&user)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Create a card checkout link.
async fn card_checkout(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CardCheckoutBody>,
) -> Result<Json<CardCheckoutLink>, PaymentError> {
    let card = state
        .card
        .as_ref()
        .ok_or_else(|| PaymentError::CardUnavailable("card payments are disabled".into()))?;

    let link = card
        .create(
            &Namespace::for_user(request.user.as_deref()),
            CardCheckoutRequest {
                email: request.email,
                provider: request.provider,
                currency: request.currency,
                package_type: request.package_type,
            },
        )
        .await?;

    Ok(Json(link))
}

/// Provider IPN. Always acknowledged.
async fn payment_callback(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Json<CallbackAck> {
    let ack = Json(CallbackAck { success: true });

    let value: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            warn!("Ignoring malformed IPN body: {}", e);
            return ack;
        }
    };

    if let Some(secret) = &state.config.provider.ipn_secret {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();

        if !ipn::verify_signature(&body, secret.expose_secret(), signature) {
            warn!("IPN signature mismatch, not forwarding");
            return ack;
        }
    }

    let notification = IpnNotification::from_value(&value);
    info!(
        "IPN for payment {}: {}",
        notification.payment_id.as_deref().unwrap_or("N/A"),
        notification.payment_status.as_deref().unwrap_or("unknown")
    );
    state.notifier.notify(notification.into_event()).await;

    ack
}

/// Card provider callback. Always acknowledged.
async fn paygate_callback(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> &'static str {
    let body = serde_json::from_slice::<Value>(&body).ok();
    let callback = CardCallback::from_parts(&query, body.as_ref());

    info!(
        "Card callback for {}: {}",
        callback.tracking_id.as_deref().unwrap_or("N/A"),
        callback.status
    );
    state.notifier.notify(callback.into_event()).await;

    "OK"
}
