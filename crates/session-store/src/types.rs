//! Payment session data model.

use crate::error::ParseError;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Namespace used when no user is signed in.
pub const GUEST_NAMESPACE: &str = "guest";

/// Maximum number of archived sessions kept per namespace.
pub const MAX_HISTORY: usize = 100;

/// Current time as epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Status of a payment as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Waiting,
    Processing,
    Sending,
    Finished,
    Failed,
    Rejected,
    /// Set locally when the user abandons the payment.
    Cancelled,
}

impl PaymentStatus {
    /// Whether no further transition can happen from this status.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PaymentStatus::Finished
                | PaymentStatus::Failed
                | PaymentStatus::Rejected
                | PaymentStatus::Cancelled
        )
    }

    /// Position on the way to a terminal state. All terminal statuses share the last stage.
    fn stage(self) -> u8 {
        match self {
            PaymentStatus::Waiting => 0,
            PaymentStatus::Processing => 1,
            PaymentStatus::Sending => 2,
            _ => 3,
        }
    }

    /// Whether moving from `current` to `self` is a forward transition.
    ///
    /// Terminal statuses never advance, and a non-terminal status only
    /// advances to a later stage, so stale poll responses are rejected.
    pub fn advances_from(self, current: PaymentStatus) -> bool {
        !current.is_terminal() && self.stage() > current.stage()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Waiting => "waiting",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Sending => "sending",
            PaymentStatus::Finished => "finished",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Rejected => "rejected",
            PaymentStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "waiting" => Ok(PaymentStatus::Waiting),
            "processing" => Ok(PaymentStatus::Processing),
            "sending" => Ok(PaymentStatus::Sending),
            "finished" => Ok(PaymentStatus::Finished),
            "failed" => Ok(PaymentStatus::Failed),
            "rejected" => Ok(PaymentStatus::Rejected),
            "cancelled" | "canceled" => Ok(PaymentStatus::Cancelled),
            other => Err(ParseError::Status(other.to_string())),
        }
    }
}

/// Product a session pays for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageType {
    Full,
    Single,
}

impl PackageType {
    pub fn as_str(self) -> &'static str {
        match self {
            PackageType::Full => "full",
            PackageType::Single => "single",
        }
    }
}

impl fmt::Display for PackageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PackageType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(PackageType::Full),
            "single" => Ok(PackageType::Single),
            other => Err(ParseError::Package(other.to_string())),
        }
    }
}

/// Composite identifier of one payment attempt slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub crypto_id: String,
    pub network_id: Option<String>,
    pub package_type: PackageType,
}

impl SessionKey {
    /// Create a key, normalizing ids to lowercase. A blank network is no network.
    pub fn new(crypto_id: &str, network_id: Option<&str>, package_type: PackageType) -> Self {
        Self {
            crypto_id: crypto_id.trim().to_lowercase(),
            network_id: network_id
                .map(|n| n.trim().to_lowercase())
                .filter(|n| !n.is_empty()),
            package_type,
        }
    }

    /// Key under which the session is stored in its namespace map.
    pub fn storage_key(&self) -> String {
        match &self.network_id {
            Some(network) => format!("{}_{}_{}", self.crypto_id, network, self.package_type),
            None => format!("{}_{}", self.crypto_id, self.package_type),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}

/// Per-user storage scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespace(String);

impl Namespace {
    /// Namespace for a signed-in user, or the guest namespace.
    pub fn for_user(username: Option<&str>) -> Self {
        match username.map(str::trim).filter(|u| !u.is_empty()) {
            Some(user) => Self(user.to_string()),
            None => Self::guest(),
        }
    }

    pub fn guest() -> Self {
        Self(GUEST_NAMESPACE.to_string())
    }

    pub fn is_guest(&self) -> bool {
        self.0 == GUEST_NAMESPACE
    }

    /// The username behind this namespace, if any.
    pub fn username(&self) -> Option<&str> {
        (!self.is_guest()).then_some(self.0.as_str())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A crypto payment tracked from creation to a terminal status.
///
/// Field names on the wire match the blobs the browser front-end used to
/// keep in local storage, so older records keep decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSession {
    #[serde(rename = "crypto")]
    pub crypto_id: String,
    #[serde(rename = "network", default)]
    pub network_id: Option<String>,
    pub package_type: PackageType,
    /// Provider-assigned id. Never changes once set.
    pub payment_id: String,
    /// Deposit address. Never changes once set.
    #[serde(rename = "address")]
    pub pay_address: String,
    /// Decimal string in the pay currency.
    #[serde(rename = "amount")]
    pub pay_amount: String,
    #[serde(default)]
    pub pay_currency: String,
    #[serde(default)]
    pub order_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr_url: Option<String>,
    pub status: PaymentStatus,
    /// Creation time, epoch milliseconds.
    #[serde(rename = "timestamp")]
    pub created_at: i64,
}

impl PaymentSession {
    pub fn key(&self) -> SessionKey {
        SessionKey::new(
            &self.crypto_id,
            self.network_id.as_deref(),
            self.package_type,
        )
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether the session has outlived the retention window at `now` (epoch millis).
    pub fn is_expired(&self, now: i64, retention: Duration) -> bool {
        let retention_ms = i64::try_from(retention.as_millis()).unwrap_or(i64::MAX);
        now.saturating_sub(self.created_at) >= retention_ms
    }

    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.created_at).single()
    }
}

/// Outcome of applying a status to a stored session.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusUpdate {
    /// The status advanced. Terminal sessions have been moved to history.
    Applied {
        previous: PaymentStatus,
        session: PaymentSession,
    },
    /// The stored session is terminal or already further along.
    Stale(PaymentSession),
    /// No session with that payment id.
    NotFound,
}

/// Everything persisted for one namespace.
///
/// `sessions` holds the current slot per session key; `history` keeps
/// archived terminal sessions, most recent last.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "StoredRepr")]
pub struct StoredSessions {
    pub sessions: BTreeMap<String, PaymentSession>,
    pub history: Vec<PaymentSession>,
}

/// Accepts both the current layout and the legacy bare map.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredRepr {
    Current {
        sessions: BTreeMap<String, PaymentSession>,
        #[serde(default)]
        history: Vec<PaymentSession>,
    },
    Legacy(BTreeMap<String, PaymentSession>),
}

impl From<StoredRepr> for StoredSessions {
    fn from(repr: StoredRepr) -> Self {
        match repr {
            StoredRepr::Current { sessions, history } => Self { sessions, history },
            StoredRepr::Legacy(sessions) => Self {
                sessions,
                history: Vec::new(),
            },
        }
    }
}

impl StoredSessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty() && self.history.is_empty()
    }

    /// Session currently occupying the slot for `key`, whatever its status.
    pub fn get(&self, key: &SessionKey) -> Option<&PaymentSession> {
        self.sessions.get(&key.storage_key())
    }

    /// Non-terminal session for `key`, if one exists.
    pub fn active(&self, key: &SessionKey) -> Option<&PaymentSession> {
        self.get(key).filter(|s| !s.is_terminal())
    }

    pub fn active_sessions(&self) -> impl Iterator<Item = &PaymentSession> {
        self.sessions.values().filter(|s| !s.is_terminal())
    }

    /// Look a session up by provider payment id, active slots first.
    pub fn find_by_payment_id(&self, payment_id: &str) -> Option<&PaymentSession> {
        self.sessions
            .values()
            .find(|s| s.payment_id == payment_id)
            .or_else(|| self.history.iter().rev().find(|s| s.payment_id == payment_id))
    }

    /// Put `session` in its slot. A previous occupant is moved to history and returned.
    pub fn insert(&mut self, session: PaymentSession) -> Option<PaymentSession> {
        let previous = self
            .sessions
            .insert(session.key().storage_key(), session);

        if let Some(ref old) = previous {
            self.push_history(old.clone());
        }
        previous
    }

    /// Move the session in the slot for `key` to history.
    pub fn archive(&mut self, key: &SessionKey) -> Option<PaymentSession> {
        let session = self.sessions.remove(&key.storage_key())?;
        self.push_history(session.clone());
        Some(session)
    }

    /// Apply `status` to the active session with `payment_id`.
    ///
    /// Only forward transitions are applied; a session reaching a terminal
    /// status leaves its slot and is archived.
    pub fn apply_status(&mut self, payment_id: &str, status: PaymentStatus) -> StatusUpdate {
        let slot = self
            .sessions
            .iter()
            .find(|(_, s)| s.payment_id == payment_id)
            .map(|(slot, _)| slot.clone());

        let Some(session) = slot.as_ref().and_then(|slot| self.sessions.get_mut(slot)) else {
            return match self.find_by_payment_id(payment_id) {
                Some(archived) => StatusUpdate::Stale(archived.clone()),
                None => StatusUpdate::NotFound,
            };
        };

        if !status.advances_from(session.status) {
            return StatusUpdate::Stale(session.clone());
        }

        let previous = session.status;
        session.status = status;
        let session = session.clone();

        if status.is_terminal() {
            if let Some(slot) = slot {
                self.sessions.remove(&slot);
            }
            self.push_history(session.clone());
        }

        StatusUpdate::Applied { previous, session }
    }

    /// Drop every session created more than `retention` before `now`.
    ///
    /// Returns the number of sessions removed.
    pub fn purge_expired(&mut self, now: i64, retention: Duration) -> usize {
        let before = self.sessions.len() + self.history.len();
        self.sessions.retain(|_, s| !s.is_expired(now, retention));
        self.history.retain(|s| !s.is_expired(now, retention));
        before - (self.sessions.len() + self.history.len())
    }

    fn push_history(&mut self, session: PaymentSession) {
        self.history.push(session);
        if self.history.len() > MAX_HISTORY {
            let excess = self.history.len() - MAX_HISTORY;
            self.history.drain(..excess);
        }
    }
}
