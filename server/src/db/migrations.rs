use rusqlite_migration::{Migrations, M};

/// Define all schema migrations.
/// Uses SQLite user_version pragma for tracking, no migration table needed.
pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(
        "-- Migration 1: Feed entries

CREATE TABLE feed_items (
    post INTEGER PRIMARY KEY,
    author TEXT NOT NULL,
    created TEXT NOT NULL
);

CREATE INDEX idx_feed_items_author_created ON feed_items(author, created);
CREATE INDEX idx_feed_items_created ON feed_items(created);
",
    )])
}
