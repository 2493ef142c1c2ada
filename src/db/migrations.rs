//! Database migrations
//!
//! Versioned catalog schema, applied in order and tracked in `schema_migrations`.

use crate::core::error::{CatalogError, Result};
use crate::core::media_types::SEEDED_MEDIA_TYPES;
use rusqlite::{params, Connection};
use tracing::{info, warn};

/// Migration version tracking table
const MIGRATION_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    applied_at DATETIME DEFAULT CURRENT_TIMESTAMP
)
"#;

/// Initial catalog schema (version 1)
const MIGRATION_V1: &str = r#"
-- Raw file listing, written by the share scanner
CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    path TEXT NOT NULL,
    is_directory INTEGER NOT NULL DEFAULT 0,
    size INTEGER NOT NULL DEFAULT 0,
    last_modified TEXT NOT NULL,
    extension TEXT,
    mime_type TEXT,
    share_id TEXT NOT NULL,
    UNIQUE(share_id, path)
);

CREATE TABLE IF NOT EXISTS media_types (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT UNIQUE NOT NULL,
    description TEXT
);

CREATE TABLE IF NOT EXISTS media_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    media_type_id INTEGER NOT NULL,
    title TEXT NOT NULL,
    original_title TEXT,
    year INTEGER,
    description TEXT,
    genre TEXT NOT NULL DEFAULT '[]',
    director TEXT,
    cast_crew TEXT NOT NULL DEFAULT '{}',
    rating REAL,
    runtime INTEGER,
    language TEXT,
    country TEXT,
    status TEXT NOT NULL DEFAULT 'active',
    first_detected TEXT NOT NULL,
    last_updated TEXT NOT NULL,
    FOREIGN KEY (media_type_id) REFERENCES media_types(id)
);

CREATE TABLE IF NOT EXISTS directory_analysis (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    directory_path TEXT NOT NULL,
    share_id TEXT NOT NULL,
    media_item_id INTEGER,
    confidence_score REAL NOT NULL,
    detection_method TEXT NOT NULL,
    analysis_data TEXT NOT NULL DEFAULT '{}',
    last_analyzed TEXT NOT NULL,
    files_count INTEGER NOT NULL DEFAULT 0,
    total_size INTEGER NOT NULL DEFAULT 0,
    UNIQUE(directory_path, share_id),
    FOREIGN KEY (media_item_id) REFERENCES media_items(id) ON DELETE SET NULL
);

CREATE TABLE IF NOT EXISTS external_metadata (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    media_item_id INTEGER NOT NULL,
    provider TEXT NOT NULL,
    external_id TEXT NOT NULL,
    data TEXT NOT NULL DEFAULT '{}',
    rating REAL,
    review_url TEXT,
    cover_url TEXT,
    trailer_url TEXT,
    last_fetched TEXT NOT NULL,
    UNIQUE(media_item_id, provider),
    FOREIGN KEY (media_item_id) REFERENCES media_items(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS media_files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    media_item_id INTEGER NOT NULL,
    file_path TEXT NOT NULL,
    share_id TEXT NOT NULL,
    filename TEXT NOT NULL,
    file_size INTEGER NOT NULL DEFAULT 0,
    file_extension TEXT,
    quality_info TEXT NOT NULL DEFAULT '{}',
    direct_link TEXT NOT NULL,
    virtual_link TEXT NOT NULL,
    last_verified TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(media_item_id, file_path),
    FOREIGN KEY (media_item_id) REFERENCES media_items(id) ON DELETE CASCADE
);
"#;

/// Lookup indexes (version 2)
const MIGRATION_V2: &str = r#"
CREATE INDEX IF NOT EXISTS idx_files_share_path ON files(share_id, path);
CREATE INDEX IF NOT EXISTS idx_media_items_type ON media_items(media_type_id);
CREATE INDEX IF NOT EXISTS idx_directory_analysis_item ON directory_analysis(media_item_id);
CREATE INDEX IF NOT EXISTS idx_media_files_item ON media_files(media_item_id);
"#;

const MIGRATIONS: &[(i64, &str, &str)] = &[
    (1, "Initial catalog schema", MIGRATION_V1),
    (2, "Lookup indexes", MIGRATION_V2),
];

/// Run all pending database migrations, then make sure the media types are seeded
pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    info!("Running database migrations");

    conn.execute_batch(MIGRATION_TABLE)?;

    let current_version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    info!("Current database schema version: {}", current_version);

    for (version, description, sql) in MIGRATIONS {
        if current_version < *version {
            info!("Applying migration v{}: {}", version, description);
            apply_migration(conn, *version, sql)?;
        }
    }

    seed_media_types(conn)?;

    info!("Database migrations completed successfully");
    Ok(())
}

/// Insert the built-in media types that are missing
fn seed_media_types(conn: &Connection) -> Result<()> {
    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO media_types (name, description) VALUES (?1, ?2)",
    )?;
    let mut inserted = 0;
    for (name, description) in SEEDED_MEDIA_TYPES {
        inserted += stmt.execute(params![name, description])?;
    }
    if inserted > 0 {
        info!(count = inserted, "Seeded media types");
    }
    Ok(())
}

/// Apply a single migration
fn apply_migration(conn: &mut Connection, version: i64, sql: &str) -> Result<()> {
    let tx = conn.transaction()?;

    tx.execute_batch(sql).map_err(|e| {
        warn!("Migration v{} failed: {}", version, e);
        CatalogError::DatabaseError(e)
    })?;

    tx.execute("INSERT INTO schema_migrations (version) VALUES (?)", [version])?;

    tx.commit()?;

    info!("Migration v{} applied successfully", version);
    Ok(())
}
