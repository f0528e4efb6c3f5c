use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                name        TEXT NOT NULL,
                email       TEXT NOT NULL UNIQUE,
                phone       TEXT,
                address     TEXT,
                password    TEXT NOT NULL,
                role        TEXT NOT NULL DEFAULT 'resident',
                verified    INTEGER NOT NULL DEFAULT 0,
                submitted   INTEGER NOT NULL DEFAULT 0,
                id_image    TEXT,
                error_note  TEXT,
                verified_at TEXT,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_users_verification
                ON users(role, verified, submitted);

            CREATE TABLE messages (
                id              TEXT PRIMARY KEY,
                sender_id       TEXT NOT NULL REFERENCES users(id),
                sender_name     TEXT NOT NULL,
                receiver_id     TEXT NOT NULL REFERENCES users(id),
                receiver_name   TEXT NOT NULL,
                body            TEXT NOT NULL,
                read            INTEGER NOT NULL DEFAULT 0,
                created_at      TEXT NOT NULL
            );

            CREATE INDEX idx_messages_receiver
                ON messages(receiver_id, created_at);

            CREATE INDEX idx_messages_pair
                ON messages(sender_id, receiver_id, created_at);

            CREATE TABLE settings (
                name        TEXT PRIMARY KEY,
                value       TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            );

            CREATE TABLE notifications (
                id          TEXT PRIMARY KEY,
                user_id     TEXT NOT NULL REFERENCES users(id),
                title       TEXT NOT NULL,
                body        TEXT NOT NULL,
                read        INTEGER NOT NULL DEFAULT 0,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_notifications_user
                ON notifications(user_id, created_at);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    if version < 2 {
        info!("Running migration v2 (certificate requests)");
        conn.execute_batch(
            "
            CREATE TABLE certificate_requests (
                id          TEXT PRIMARY KEY,
                user_id     TEXT NOT NULL REFERENCES users(id),
                kind        TEXT NOT NULL,
                purpose     TEXT NOT NULL,
                status      TEXT NOT NULL DEFAULT 'pending',
                remark      TEXT,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            );

            CREATE INDEX idx_requests_user
                ON certificate_requests(user_id, created_at);

            CREATE INDEX idx_requests_status
                ON certificate_requests(status, created_at);

            INSERT INTO schema_version (version) VALUES (2);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
