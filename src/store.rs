// repolens/src/store.rs
use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::models::{CommitRecord, EmbeddingRecord, NewCommit, NewEmbedding, Project};
use anyhow::Result;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Persistence seam for both pipelines.
///
/// Embedding rows are written in two steps: the scalar fields first, then the
/// vector. Backends that can do both atomically override `persist_embedding`.
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_project(&self, name: &str, github_url: &str) -> Result<Project>;

    async fn get_project(&self, project_id: &str) -> Result<Option<Project>>;

    async fn list_projects(&self) -> Result<Vec<Project>>;

    /// Inserts the scalar fields of a record and returns its new id. Any
    /// earlier row for the same project and file name is replaced.
    async fn insert_embedding(&self, record: &NewEmbedding) -> Result<String>;

    async fn set_embedding_vector(&self, id: &str, vector: &[f32]) -> Result<()>;

    /// Writes a record and, when present, its vector.
    async fn persist_embedding(&self, record: &NewEmbedding) -> Result<String> {
        let id = self.insert_embedding(record).await?;
        if !record.embedding.is_empty() {
            self.set_embedding_vector(&id, &record.embedding).await?;
        }
        Ok(id)
    }

    async fn embedding_records(&self, project_id: &str) -> Result<Vec<EmbeddingRecord>>;

    /// `(file_name, content_hash)` pairs stored for a project with a vector.
    /// Rows saved without one are left out so the next run embeds them again.
    async fn content_hashes(&self, project_id: &str) -> Result<Vec<(String, String)>>;

    /// Deletes a project's rows whose file name is not in `keep`. Returns the
    /// number of rows removed.
    async fn remove_missing_files(&self, project_id: &str, keep: &HashSet<String>) -> Result<usize>;

    async fn commit_hashes(&self, project_id: &str) -> Result<HashSet<String>>;

    /// Bulk insert; rows whose `(project_id, commit_hash)` already exist are
    /// ignored. Returns the number of rows actually written.
    async fn insert_commits(&self, commits: &[NewCommit]) -> Result<usize>;

    /// Commits for a project, newest first.
    async fn commits(&self, project_id: &str) -> Result<Vec<CommitRecord>>;
}

#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.db.lock().map_err(|e| anyhow::anyhow!("{e}"))
    }
}

const EMBEDDING_COLUMNS: &str = "id, project_id, file_name, source_code, summary, summary_embedding, content_hash, created_at";
const COMMIT_COLUMNS: &str = "id, project_id, commit_hash, commit_message, commit_author_name, commit_author_avatar, commit_date, summary, created_at";

fn replace_embedding_row(conn: &Connection, record: &NewEmbedding, blob: Option<Vec<u8>>) -> Result<String> {
    conn.execute(
        "DELETE FROM source_code_embeddings WHERE project_id = ?1 AND file_name = ?2",
        params![record.project_id, record.file_name],
    )?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO source_code_embeddings
            (id, project_id, file_name, source_code, summary, summary_embedding, content_hash, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            id,
            record.project_id,
            record.file_name,
            record.source_code,
            record.summary,
            blob,
            record.content_hash,
            chrono::Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(id)
}

fn row_to_project(row: &Row) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        name: row.get(1)?,
        github_url: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn row_to_embedding(row: &Row) -> rusqlite::Result<EmbeddingRecord> {
    let blob: Option<Vec<u8>> = row.get(5)?;
    Ok(EmbeddingRecord {
        id: row.get(0)?,
        project_id: row.get(1)?,
        file_name: row.get(2)?,
        source_code: row.get(3)?,
        summary: row.get(4)?,
        summary_embedding: blob.map(|b| blob_to_vec(&b)),
        content_hash: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn row_to_commit(row: &Row) -> rusqlite::Result<CommitRecord> {
    Ok(CommitRecord {
        id: row.get(0)?,
        project_id: row.get(1)?,
        commit_hash: row.get(2)?,
        commit_message: row.get(3)?,
        commit_author_name: row.get(4)?,
        commit_author_avatar: row.get(5)?,
        commit_date: row.get(6)?,
        summary: row.get(7)?,
        created_at: row.get(8)?,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn create_project(&self, name: &str, github_url: &str) -> Result<Project> {
        let project = Project {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            github_url: github_url.to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO projects (id, name, github_url, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![project.id, project.name, project.github_url, project.created_at],
        )?;
        Ok(project)
    }

    async fn get_project(&self, project_id: &str) -> Result<Option<Project>> {
        let conn = self.lock()?;
        let project = conn
            .query_row(
                "SELECT id, name, github_url, created_at FROM projects WHERE id = ?1",
                params![project_id],
                row_to_project,
            )
            .optional()?;
        Ok(project)
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT id, name, github_url, created_at FROM projects ORDER BY created_at")?;
        let projects = stmt
            .query_map([], row_to_project)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(projects)
    }

    async fn insert_embedding(&self, record: &NewEmbedding) -> Result<String> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let id = replace_embedding_row(&tx, record, None)?;
        tx.commit()?;
        Ok(id)
    }

    async fn set_embedding_vector(&self, id: &str, vector: &[f32]) -> Result<()> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE source_code_embeddings SET summary_embedding = ?1 WHERE id = ?2",
            params![vec_to_blob(vector), id],
        )?;
        if updated == 0 {
            anyhow::bail!("no embedding record with id {id}");
        }
        Ok(())
    }

    /// Single transaction, so a row never exists without its vector unless
    /// the embedding itself was unavailable.
    async fn persist_embedding(&self, record: &NewEmbedding) -> Result<String> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let blob = (!record.embedding.is_empty()).then(|| vec_to_blob(&record.embedding));
        let id = replace_embedding_row(&tx, record, blob)?;
        tx.commit()?;
        Ok(id)
    }

    async fn embedding_records(&self, project_id: &str) -> Result<Vec<EmbeddingRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {EMBEDDING_COLUMNS} FROM source_code_embeddings
             WHERE project_id = ?1 ORDER BY created_at, rowid"
        ))?;
        let records = stmt
            .query_map(params![project_id], row_to_embedding)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    async fn content_hashes(&self, project_id: &str) -> Result<Vec<(String, String)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT file_name, content_hash FROM source_code_embeddings
             WHERE project_id = ?1 AND content_hash != '' AND summary_embedding IS NOT NULL",
        )?;
        let pairs = stmt
            .query_map(params![project_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(pairs)
    }

    async fn remove_missing_files(&self, project_id: &str, keep: &HashSet<String>) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let stored: Vec<String> = {
            let mut stmt = tx.prepare(
                "SELECT DISTINCT file_name FROM source_code_embeddings WHERE project_id = ?1",
            )?;
            let names = stmt
                .query_map(params![project_id], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            names
        };
        let mut removed = 0;
        for file_name in stored.iter().filter(|name| !keep.contains(*name)) {
            removed += tx.execute(
                "DELETE FROM source_code_embeddings WHERE project_id = ?1 AND file_name = ?2",
                params![project_id, file_name],
            )?;
        }
        tx.commit()?;
        Ok(removed)
    }

    async fn commit_hashes(&self, project_id: &str) -> Result<HashSet<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT commit_hash FROM commits WHERE project_id = ?1")?;
        let hashes = stmt
            .query_map(params![project_id], |row| row.get(0))?
            .collect::<rusqlite::Result<HashSet<String>>>()?;
        Ok(hashes)
    }

    async fn insert_commits(&self, commits: &[NewCommit]) -> Result<usize> {
        if commits.is_empty() {
            return Ok(0);
        }
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO commits
                    (id, project_id, commit_hash, commit_message, commit_author_name,
                     commit_author_avatar, commit_date, summary, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            let now = chrono::Utc::now().to_rfc3339();
            for commit in commits {
                inserted += stmt.execute(params![
                    Uuid::new_v4().to_string(),
                    commit.project_id,
                    commit.commit_hash,
                    commit.commit_message,
                    commit.commit_author_name,
                    commit.commit_author_avatar,
                    commit.commit_date,
                    commit.summary,
                    now,
                ])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    async fn commits(&self, project_id: &str) -> Result<Vec<CommitRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COMMIT_COLUMNS} FROM commits WHERE project_id = ?1
             ORDER BY commit_date DESC, rowid"
        ))?;
        let records = stmt
            .query_map(params![project_id], row_to_commit)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema;

    fn store() -> SqliteStore {
        let conn = Connection::open_in_memory().unwrap();
        schema::run_migrations(&conn).unwrap();
        SqliteStore::new(Arc::new(Mutex::new(conn)))
    }

    fn embedding(file: &str, vector: Vec<f32>) -> NewEmbedding {
        NewEmbedding {
            project_id: "p1".into(),
            file_name: file.into(),
            source_code: "fn main() {}".into(),
            summary: "Entry point".into(),
            embedding: vector,
            content_hash: "abc".into(),
        }
    }

    fn commit(hash: &str, date: &str) -> NewCommit {
        NewCommit {
            project_id: "p1".into(),
            commit_hash: hash.into(),
            commit_message: format!("commit {hash}"),
            commit_author_name: "Ada".into(),
            commit_author_avatar: "https://avatars.example/ada".into(),
            commit_date: date.into(),
            summary: "* Add X [src/x.rs]".into(),
        }
    }

    #[tokio::test]
    async fn project_roundtrip() {
        let store = store();
        let created = store.create_project("widgets", "https://github.com/acme/widgets").await.unwrap();
        let fetched = store.get_project(&created.id).await.unwrap().unwrap();
        assert_eq!(fetched, created);
        assert_eq!(store.list_projects().await.unwrap().len(), 1);
        assert!(store.get_project("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn embedding_vector_roundtrips() {
        let store = store();
        let vector: Vec<f32> = (0..768).map(|i| i as f32 / 768.0).collect();
        store.persist_embedding(&embedding("src/main.rs", vector.clone())).await.unwrap();

        let records = store.embedding_records("p1").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].file_name, "src/main.rs");
        assert_eq!(records[0].summary_embedding.as_deref(), Some(vector.as_slice()));
    }

    #[tokio::test]
    async fn empty_embedding_is_stored_without_vector() {
        let store = store();
        store.persist_embedding(&embedding("a.rs", Vec::new())).await.unwrap();
        let records = store.embedding_records("p1").await.unwrap();
        assert!(records[0].summary_embedding.is_none());
    }

    #[tokio::test]
    async fn two_phase_write_sets_vector_after_insert() {
        let store = store();
        let id = store.insert_embedding(&embedding("a.rs", vec![1.0; 4])).await.unwrap();
        assert!(store.embedding_records("p1").await.unwrap()[0].summary_embedding.is_none());

        store.set_embedding_vector(&id, &[1.0; 4]).await.unwrap();
        let records = store.embedding_records("p1").await.unwrap();
        assert_eq!(records[0].summary_embedding.as_ref().map(Vec::len), Some(4));
        assert!(store.set_embedding_vector("nope", &[1.0]).await.is_err());
    }

    #[tokio::test]
    async fn saving_a_file_again_replaces_its_row() {
        let store = store();
        store.persist_embedding(&embedding("a.rs", vec![1.0; 4])).await.unwrap();
        let mut edited = embedding("a.rs", vec![2.0; 4]);
        edited.source_code = "fn main() { run(); }".into();
        store.persist_embedding(&edited).await.unwrap();
        store.insert_embedding(&embedding("b.rs", Vec::new())).await.unwrap();
        store.insert_embedding(&embedding("b.rs", Vec::new())).await.unwrap();

        let records = store.embedding_records("p1").await.unwrap();
        assert_eq!(records.len(), 2);
        let a = records.iter().find(|r| r.file_name == "a.rs").unwrap();
        assert_eq!(a.source_code, "fn main() { run(); }");
    }

    #[tokio::test]
    async fn files_missing_from_the_tree_are_removed() {
        let store = store();
        for file in ["a.rs", "b.rs", "c.rs"] {
            store.persist_embedding(&embedding(file, vec![1.0; 4])).await.unwrap();
        }
        let keep: HashSet<String> = ["b.rs".to_string()].into_iter().collect();
        assert_eq!(store.remove_missing_files("p1", &keep).await.unwrap(), 2);

        let names: Vec<String> = store
            .embedding_records("p1")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.file_name)
            .collect();
        assert_eq!(names, vec!["b.rs"]);
    }

    #[tokio::test]
    async fn rows_without_vectors_are_not_reported_as_indexed() {
        let store = store();
        store.persist_embedding(&embedding("a.rs", Vec::new())).await.unwrap();
        assert!(store.content_hashes("p1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn content_hashes_are_scoped_to_project() {
        let store = store();
        store.persist_embedding(&embedding("a.rs", vec![1.0; 4])).await.unwrap();
        assert_eq!(
            store.content_hashes("p1").await.unwrap(),
            vec![("a.rs".to_string(), "abc".to_string())]
        );
        assert!(store.content_hashes("p2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_commits_are_ignored() {
        let store = store();
        let batch = vec![commit("a", "2024-01-01T00:00:00Z"), commit("b", "2024-01-02T00:00:00Z")];
        assert_eq!(store.insert_commits(&batch).await.unwrap(), 2);
        assert_eq!(store.insert_commits(&batch).await.unwrap(), 0);

        let hashes = store.commit_hashes("p1").await.unwrap();
        assert!(hashes.contains("a") && hashes.contains("b"));

        let listed = store.commits("p1").await.unwrap();
        assert_eq!(listed[0].commit_hash, "b");
    }
}
