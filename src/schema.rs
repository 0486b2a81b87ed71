use anyhow::Result;
use rusqlite::Connection;

pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(CREATE_TABLES_SQL)?;
    add_content_hash_column(conn);
    Ok(())
}

/// Databases created before unchanged-file skipping lack `content_hash`.
fn add_content_hash_column(conn: &Connection) {
    let _ = conn.execute_batch(
        "ALTER TABLE source_code_embeddings ADD COLUMN content_hash TEXT NOT NULL DEFAULT '';",
    );
}

const CREATE_TABLES_SQL: &str = "
CREATE TABLE IF NOT EXISTS projects (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    github_url  TEXT NOT NULL,
    created_at  TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS source_code_embeddings (
    id                 TEXT PRIMARY KEY,
    project_id         TEXT NOT NULL,
    file_name          TEXT NOT NULL,
    source_code        TEXT NOT NULL,
    summary            TEXT NOT NULL,
    summary_embedding  BLOB,
    content_hash       TEXT NOT NULL DEFAULT '',
    created_at         TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_embeddings_project ON source_code_embeddings(project_id);
CREATE INDEX IF NOT EXISTS idx_embeddings_file
    ON source_code_embeddings(project_id, file_name, content_hash);

CREATE TABLE IF NOT EXISTS commits (
    id                    TEXT PRIMARY KEY,
    project_id            TEXT NOT NULL,
    commit_hash           TEXT NOT NULL,
    commit_message        TEXT NOT NULL,
    commit_author_name    TEXT NOT NULL,
    commit_author_avatar  TEXT NOT NULL,
    commit_date           TEXT NOT NULL,
    summary               TEXT NOT NULL,
    created_at            TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE(project_id, commit_hash)
);

CREATE INDEX IF NOT EXISTS idx_commits_project ON commits(project_id);
";
