use rusqlite::{Connection, params};
use crate::error::{Result, RepoRagError};

/// Migration metadata
struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

/// Schema history, applied in order. Never edit an entry once released; append instead.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "001_repositories",
        sql: r#"
            CREATE TABLE repositories (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                full_name TEXT NOT NULL,
                owner TEXT NOT NULL,
                name TEXT NOT NULL,
                remote_id INTEGER,
                default_branch TEXT,
                status TEXT NOT NULL DEFAULT 'pending'
                    CHECK (status IN ('pending', 'importing', 'ready', 'error')),
                file_count INTEGER NOT NULL DEFAULT 0,
                indexed_files INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX idx_repositories_user ON repositories(user_id, full_name);
            CREATE UNIQUE INDEX idx_repositories_ready_remote
                ON repositories(user_id, remote_id) WHERE status = 'ready';
        "#,
    },
    Migration {
        version: 2,
        name: "002_files",
        sql: r#"
            CREATE TABLE files (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                repository_id TEXT NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
                path TEXT NOT NULL,
                extension TEXT NOT NULL DEFAULT '',
                content TEXT NOT NULL,
                digest TEXT NOT NULL,
                tokens INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (repository_id, path)
            );
        "#,
    },
    Migration {
        version: 3,
        name: "003_chunks",
        sql: r#"
            CREATE TABLE chunks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
                repository_id TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                content TEXT NOT NULL,
                start_line INTEGER NOT NULL DEFAULT 1,
                embedding BLOB NOT NULL,
                dimensions INTEGER NOT NULL,
                model TEXT NOT NULL,
                digest TEXT NOT NULL,
                tokens INTEGER NOT NULL DEFAULT 0,
                UNIQUE (file_id, chunk_index)
            );
            CREATE INDEX idx_chunks_repository ON chunks(repository_id, id);
        "#,
    },
];

/// Create schema_migrations table if it doesn't exist
fn ensure_migrations_table(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Get list of applied migrations
pub fn get_applied_migrations(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM schema_migrations ORDER BY version")?;
    let names: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()
        .map_err(RepoRagError::Database)?;
    Ok(names)
}

/// Run all pending migrations
pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    ensure_migrations_table(conn)?;

    let applied = get_applied_migrations(conn)?;

    for migration in MIGRATIONS {
        if applied.iter().any(|name| name == migration.name) {
            log::debug!("Migration {} already applied, skipping", migration.name);
            continue;
        }

        log::info!("Applying migration: {} (version {})", migration.name, migration.version);

        let tx = conn.transaction()?;

        tx.execute_batch(migration.sql).map_err(|e| {
            RepoRagError::Config(format!("Failed to execute migration {}: {}", migration.name, e))
        })?;

        tx.execute(
            "INSERT INTO schema_migrations (version, name) VALUES (?1, ?2)",
            params![migration.version, migration.name],
        )?;

        tx.commit()?;
    }

    Ok(())
}
