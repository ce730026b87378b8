use anyhow::Result;
use rusqlite::Connection;
use std::collections::HashSet;

type Migration = (i64, &'static str);

fn migrations() -> Vec<Migration> {
    vec![
        (
            1,
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                org_id TEXT,
                project_id TEXT,
                app_id TEXT,
                created_at TEXT NOT NULL,
                last_active TEXT NOT NULL,
                summary TEXT,
                first_message TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_conversations_scope
                ON conversations(user_id, org_id, project_id, app_id, last_active DESC);
            "#,
        ),
        (
            2,
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                at TEXT NOT NULL,
                sources TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id, at DESC);
            "#,
        ),
        (
            3,
            r#"
            CREATE TABLE IF NOT EXISTS key_documents (
                slug TEXT NOT NULL,
                label TEXT NOT NULL,
                org_id TEXT NOT NULL DEFAULT '',
                PRIMARY KEY (slug, org_id)
            );
            "#,
        ),
        (
            4,
            r#"
            CREATE TABLE IF NOT EXISTS agent_behaviors (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                agent_type TEXT NOT NULL,
                app_id TEXT NOT NULL,
                org_id TEXT,
                config TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_agent_behaviors_lookup
                ON agent_behaviors(agent_type, app_id, org_id, active);
            "#,
        ),
    ]
}

pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS __schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        "#,
    )?;

    let mut stmt = conn.prepare("SELECT version FROM __schema_version")?;
    let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
    let mut applied = HashSet::new();
    for row in rows {
        applied.insert(row?);
    }

    for (version, sql) in migrations() {
        if applied.contains(&version) {
            continue;
        }

        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(sql)?;
        tx.execute(
            "INSERT INTO __schema_version(version, applied_at) VALUES (?1, datetime('now'))",
            [version],
        )?;
        tx.commit()?;
    }

    Ok(())
}
