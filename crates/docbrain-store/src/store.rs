use crate::migrations::run_migrations;
use crate::models::{BehaviorRecord, ConversationKey, ConversationSnapshot, MessageRecord};
use crate::ContextStore;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use docbrain_schema::KeyDocument;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};
use tokio::task;
use uuid::Uuid;

#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        run_migrations(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        run_migrations(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }
}

struct ConversationRow {
    id: String,
    last_active: DateTime<Utc>,
    summary: Option<String>,
    first_message: Option<String>,
}

fn find_candidate(conn: &Connection, key: &ConversationKey) -> Result<Option<ConversationRow>> {
    let map_row = |row: &rusqlite::Row<'_>| {
        Ok(ConversationRow {
            id: row.get(0)?,
            last_active: row.get::<_, String>(1)?.parse().unwrap_or_else(|_| Utc::now()),
            summary: row.get(2)?,
            first_message: row.get(3)?,
        })
    };

    if let Some(id) = key.conversation_id {
        let row = conn
            .query_row(
                "SELECT id, last_active, summary, first_message FROM conversations WHERE id = ?1",
                params![id.to_string()],
                map_row,
            )
            .optional()?;
        return Ok(row);
    }

    let row = conn
        .query_row(
            r#"
            SELECT id, last_active, summary, first_message
            FROM conversations
            WHERE user_id = ?1 AND org_id IS ?2 AND project_id IS ?3 AND app_id IS ?4
            ORDER BY last_active DESC
            LIMIT 1
            "#,
            params![key.user_id, key.org_id, key.project_id, key.app_id],
            map_row,
        )
        .optional()?;
    Ok(row)
}

fn load_key_documents(conn: &Connection, org_id: Option<&str>) -> Result<Vec<KeyDocument>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT slug, label FROM key_documents
        WHERE org_id = '' OR org_id = ?1
        ORDER BY slug
        "#,
    )?;
    let rows = stmt.query_map(params![org_id.unwrap_or("")], |row| {
        Ok(KeyDocument {
            slug: row.get(0)?,
            label: row.get(1)?,
        })
    })?;
    let mut docs = Vec::new();
    for row in rows {
        docs.push(row?);
    }
    Ok(docs)
}

#[async_trait]
impl ContextStore for SqliteStore {
    async fn resolve_conversation(
        &self,
        key: &ConversationKey,
        idle_timeout_minutes: i64,
        history_limit: usize,
    ) -> Result<ConversationSnapshot> {
        let db = Arc::clone(&self.db);
        let key = key.clone();
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let tx = conn.unchecked_transaction()?;
            let now = Utc::now();

            let candidate = find_candidate(&tx, &key)?;
            let idle_window = TimeDelta::try_minutes(idle_timeout_minutes)
                .ok_or_else(|| anyhow!("invalid idle timeout: {idle_timeout_minutes}"))?;

            let (row, created) = match candidate {
                Some(row) if now - row.last_active < idle_window => {
                    tx.execute(
                        "UPDATE conversations SET last_active = ?1 WHERE id = ?2",
                        params![now.to_rfc3339(), row.id],
                    )?;
                    (row, false)
                }
                _ => {
                    let id = Uuid::new_v4().to_string();
                    tx.execute(
                        r#"
                        INSERT INTO conversations (id, user_id, org_id, project_id, app_id, created_at, last_active)
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                        "#,
                        params![
                            id,
                            key.user_id,
                            key.org_id,
                            key.project_id,
                            key.app_id,
                            now.to_rfc3339(),
                        ],
                    )?;
                    (
                        ConversationRow {
                            id,
                            last_active: now,
                            summary: None,
                            first_message: None,
                        },
                        true,
                    )
                }
            };

            let mut stmt = tx.prepare(
                r#"
                SELECT role, content, at, sources FROM messages
                WHERE conversation_id = ?1
                ORDER BY at DESC
                LIMIT ?2
                "#,
            )?;
            let rows = stmt.query_map(params![row.id, history_limit as i64], |r| {
                Ok(MessageRecord {
                    role: r.get(0)?,
                    content: r.get(1)?,
                    at: r.get::<_, String>(2)?.parse().unwrap_or_else(|_| Utc::now()),
                    sources: r.get(3)?,
                })
            })?;
            let mut messages = Vec::new();
            for r in rows {
                messages.push(r?);
            }
            messages.reverse();
            drop(stmt);

            let previous_sources: Option<String> = tx
                .query_row(
                    r#"
                    SELECT sources FROM messages
                    WHERE conversation_id = ?1 AND role = 'assistant' AND sources IS NOT NULL
                    ORDER BY at DESC
                    LIMIT 1
                    "#,
                    params![row.id],
                    |r| r.get(0),
                )
                .optional()?;

            let message_count: i64 = tx.query_row(
                "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
                params![row.id],
                |r| r.get(0),
            )?;

            let key_documents = load_key_documents(&tx, key.org_id.as_deref())?;
            tx.commit()?;

            Ok::<ConversationSnapshot, anyhow::Error>(ConversationSnapshot {
                conversation_id: Uuid::parse_str(&row.id)?,
                created,
                messages,
                summary: row.summary,
                first_message: row.first_message,
                previous_sources,
                key_documents,
                message_count,
            })
        })
        .await?
    }

    async fn behavior_record(
        &self,
        agent_type: &str,
        app_id: &str,
        org_id: Option<&str>,
    ) -> Result<Option<BehaviorRecord>> {
        let db = Arc::clone(&self.db);
        let agent_type = agent_type.to_owned();
        let app_id = app_id.to_owned();
        let org_id = org_id.map(ToOwned::to_owned);
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;

            let config: Option<String> = conn
                .query_row(
                    r#"
                    SELECT config FROM agent_behaviors
                    WHERE agent_type = ?1 AND app_id = ?2 AND org_id IS ?3 AND active = 1
                    ORDER BY updated_at DESC
                    LIMIT 1
                    "#,
                    params![agent_type, app_id, org_id],
                    |r| r.get(0),
                )
                .optional()?;

            let Some(raw) = config else {
                return Ok(None);
            };

            match serde_json::from_str::<BehaviorRecord>(&raw) {
                Ok(record) => Ok(Some(record)),
                Err(error) => {
                    tracing::warn!(%error, "unreadable behavior config, ignoring row");
                    Ok(None)
                }
            }
        })
        .await?
    }

    async fn append_message(
        &self,
        conversation_id: Uuid,
        role: &str,
        content: &str,
        sources: &[String],
    ) -> Result<()> {
        let db = Arc::clone(&self.db);
        let role = role.to_owned();
        let content = content.to_owned();
        let sources = if sources.is_empty() {
            None
        } else {
            Some(serde_json::to_string(sources)?)
        };
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let now = Utc::now().to_rfc3339();
            conn.execute(
                r#"
                INSERT INTO messages (id, conversation_id, role, content, at, sources)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    Uuid::new_v4().to_string(),
                    conversation_id.to_string(),
                    role,
                    content,
                    now,
                    sources,
                ],
            )?;
            if role == "user" {
                conn.execute(
                    "UPDATE conversations SET first_message = COALESCE(first_message, ?1), last_active = ?2 WHERE id = ?3",
                    params![content, now, conversation_id.to_string()],
                )?;
            } else {
                conn.execute(
                    "UPDATE conversations SET last_active = ?1 WHERE id = ?2",
                    params![now, conversation_id.to_string()],
                )?;
            }
            Ok::<(), anyhow::Error>(())
        })
        .await??;
        Ok(())
    }

    async fn upsert_key_document(&self, org_id: Option<&str>, doc: &KeyDocument) -> Result<()> {
        let db = Arc::clone(&self.db);
        let org_id = org_id.unwrap_or("").to_owned();
        let doc = doc.clone();
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            conn.execute(
                r#"
                INSERT INTO key_documents (slug, label, org_id) VALUES (?1, ?2, ?3)
                ON CONFLICT(slug, org_id) DO UPDATE SET label = excluded.label
                "#,
                params![doc.slug, doc.label, org_id],
            )?;
            Ok::<(), anyhow::Error>(())
        })
        .await??;
        Ok(())
    }

    async fn put_behavior(
        &self,
        agent_type: &str,
        app_id: &str,
        org_id: Option<&str>,
        config: &serde_json::Value,
        active: bool,
    ) -> Result<()> {
        let db = Arc::clone(&self.db);
        let agent_type = agent_type.to_owned();
        let app_id = app_id.to_owned();
        let org_id = org_id.map(ToOwned::to_owned);
        let config = serde_json::to_string(config)?;
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            conn.execute(
                "UPDATE agent_behaviors SET active = 0 WHERE agent_type = ?1 AND app_id = ?2 AND org_id IS ?3",
                params![agent_type, app_id, org_id],
            )?;
            conn.execute(
                r#"
                INSERT INTO agent_behaviors (agent_type, app_id, org_id, config, active, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    agent_type,
                    app_id,
                    org_id,
                    config,
                    active as i64,
                    Utc::now().to_rfc3339(),
                ],
            )?;
            Ok::<(), anyhow::Error>(())
        })
        .await??;
        Ok(())
    }
}
