//! Tableside POS core.
//!
//! Tables, order entry, catalog, sales history and expenses for a small
//! restaurant, stored in a local SQLite database and scoped by the signed-in
//! owner. The UI layer drives everything through the module functions below
//! and keeps a [`state::RestaurantState`] fed by a [`subscription`].

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;

pub mod commit;
pub mod config;
pub mod db;
pub mod draft;
pub mod error;
pub mod expenses;
pub mod feed;
pub mod identity;
pub mod logging;
pub mod menu;
pub mod models;
pub mod orders;
pub mod persistence;
pub mod sales;
pub mod state;
pub mod subscription;
pub mod tables;
pub mod validation;

pub use commit::{commit, complete_order, CommitMode, CommitPlan, CommitReport, LineOp};
pub use config::PosConfig;
pub use db::DbState;
pub use draft::{DraftItem, OrderDraft, Tag};
pub use error::{PosError, PosResult};
pub use feed::{Collection, CollectionSnapshot, Snapshot};
pub use identity::{Identity, OwnerId, StaticIdentity};
pub use persistence::LineStore;
pub use state::RestaurantState;
pub use subscription::SubscriptionHandle;

/// Snapshots buffered between the subscription task and the UI.
const SUBSCRIPTION_BUFFER: usize = 64;

// ============================================================================
// Runtime
// ============================================================================

/// Everything a running app holds on to: the database, the loaded
/// configuration and the log writer guard.
pub struct PosRuntime {
    pub db: Arc<DbState>,
    pub config: PosConfig,
    _log_guard: Option<WorkerGuard>,
}

impl PosRuntime {
    /// Install logging and open the database described by `config`.
    pub fn start(config: PosConfig) -> PosResult<Self> {
        let guard = logging::init(&config)?;
        info!("Starting Tableside POS v{}", env!("CARGO_PKG_VERSION"));
        let db = db::init(&config.db_path(), config.feed_capacity)?;
        info!(db_path = %db.db_path.display(), "Database ready");
        Ok(Self {
            db: Arc::new(db),
            config,
            _log_guard: Some(guard),
        })
    }

    /// Load configuration from the environment and start.
    pub fn from_env() -> PosResult<Self> {
        Self::start(PosConfig::load()?)
    }

    /// A runtime over an existing database, without touching logging.
    pub fn with_db(db: Arc<DbState>, config: PosConfig) -> Self {
        Self {
            db,
            config,
            _log_guard: None,
        }
    }

    /// Register the signed-in owner's restaurant on first sign-in.
    pub fn sign_in(
        &self,
        identity: &dyn Identity,
        display_name: Option<&str>,
        email: Option<&str>,
    ) -> PosResult<models::Restaurant> {
        let owner = identity.require_owner()?;
        identity::ensure_restaurant(&self.db, &owner, display_name, email)
    }

    /// Start a subscription for the signed-in owner. Must be called inside a
    /// tokio runtime.
    pub fn subscribe(
        &self,
        identity: &dyn Identity,
    ) -> PosResult<(SubscriptionHandle, mpsc::Receiver<Snapshot>)> {
        let owner = identity.require_owner()?;
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        Ok((subscription::spawn(self.db.clone(), owner, tx), rx))
    }
}
