//! Per-namespace persistence of in-flight crypto payment sessions.
//!
//! Each namespace (a username, or `guest`) maps to one JSON blob holding the
//! active session per [`SessionKey`] plus a bounded history of archived
//! terminal sessions. Sessions older than the retention window are purged
//! whenever a namespace is loaded.
//!
//! # Example
//!
//! ```no_run
//! use session_store::{Namespace, SessionStore};
//!
//! # async fn example() -> Result<(), session_store::StoreError> {
//! let store = SessionStore::file("./data/sessions");
//! let namespace = Namespace::for_user(Some("alice"));
//!
//! let stored = store.load(&namespace).await;
//! store.save(&namespace, &stored).await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod store;
pub mod types;

pub use error::{ParseError, StoreError};
pub use store::{SessionStore, DEFAULT_KEY_PREFIX, DEFAULT_RETENTION};
pub use types::{
    now_millis, Namespace, PackageType, PaymentSession, PaymentStatus, SessionKey, StatusUpdate,
    StoredSessions, GUEST_NAMESPACE, MAX_HISTORY,
};
