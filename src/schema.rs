//! Database schema management for `envmon-stats`.
//!
//! The schema lives in versioned files under `migrations/`, embedded at build
//! time. Applied once on startup from `main.rs` (EMBP: single gateway call);
//! already-applied versions are skipped, so this is safe on every start.

use sqlx::{migrate::Migrator, PgPool};
use tracing::info;

use crate::Result;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

// ---

/// Apply every pending migration in version order.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    // ---
    let known = MIGRATOR.iter().count();
    info!(migrations = known, "Applying database migrations");

    MIGRATOR.run(pool).await?;

    info!("Database schema is up to date");
    Ok(())
}
