use ::duckdb::Connection;

struct Migration {
    version: &'static str,
    sql: &'static str,
}

// Decimal amounts are stored as TEXT so that fixed-point values round-trip exactly.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "0001_ledger",
        sql: r#"
CREATE TABLE IF NOT EXISTS positions (
    position_id TEXT PRIMARY KEY,
    symbol TEXT NOT NULL,
    side TEXT NOT NULL,
    size TEXT NOT NULL,
    entry_price TEXT NOT NULL,
    current_price TEXT,
    stop_loss TEXT,
    take_profit TEXT,
    status TEXT NOT NULL,
    unrealized_pnl TEXT NOT NULL,
    realized_pnl TEXT NOT NULL,
    broker_ticket TEXT NOT NULL,
    last_request_id TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    version UBIGINT NOT NULL
);

CREATE TABLE IF NOT EXISTS order_records (
    idempotency_key TEXT PRIMARY KEY,
    request_id TEXT NOT NULL,
    symbol TEXT NOT NULL,
    action TEXT NOT NULL,
    size TEXT NOT NULL,
    status TEXT NOT NULL,
    reason TEXT,
    broker_ticket TEXT,
    fill_price TEXT,
    fill_size TEXT,
    position_applied BOOLEAN NOT NULL DEFAULT FALSE,
    payload TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE SEQUENCE IF NOT EXISTS order_events_seq;

CREATE TABLE IF NOT EXISTS order_events (
    event_id BIGINT PRIMARY KEY DEFAULT nextval('order_events_seq'),
    idempotency_key TEXT NOT NULL,
    request_id TEXT NOT NULL,
    from_status TEXT,
    to_status TEXT NOT NULL,
    reason TEXT,
    recorded_at TEXT NOT NULL
);
"#,
    },
    Migration {
        version: "0002_kill_switch",
        sql: r#"
CREATE TABLE IF NOT EXISTS kill_switch (
    id INTEGER PRIMARY KEY,
    status TEXT NOT NULL,
    reason TEXT,
    updated_by TEXT,
    last_updated_utc TEXT NOT NULL,
    version UBIGINT NOT NULL
);
"#,
    },
    Migration {
        version: "0003_order_queue",
        sql: r#"
CREATE SEQUENCE IF NOT EXISTS order_queue_seq;

CREATE TABLE IF NOT EXISTS order_queue (
    seq BIGINT PRIMARY KEY DEFAULT nextval('order_queue_seq'),
    message_id TEXT NOT NULL,
    group_key TEXT NOT NULL,
    body TEXT NOT NULL,
    enqueued_at TEXT NOT NULL,
    receive_count INTEGER NOT NULL DEFAULT 0,
    invisible_until_ms BIGINT NOT NULL DEFAULT 0
);
"#,
    },
    Migration {
        version: "0004_archive_manifest",
        sql: r#"
CREATE TABLE IF NOT EXISTS archive_manifest (
    symbol TEXT NOT NULL,
    timeframe TEXT NOT NULL,
    partition_date DATE NOT NULL,
    path TEXT NOT NULL,
    row_count BIGINT NOT NULL,
    min_ts_unix BIGINT,
    max_ts_unix BIGINT,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY(symbol, timeframe, partition_date)
);
"#,
    },
    Migration {
        version: "0005_indexes",
        sql: r#"
CREATE INDEX IF NOT EXISTS idx_order_events_key ON order_events(idempotency_key);
"#,
    },
];

pub fn apply_migrations(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    )?;

    for migration in MIGRATIONS {
        let applied_count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM schema_migrations WHERE version = ?",
            [migration.version],
            |row| row.get(0),
        )?;

        if applied_count == 0 {
            connection.execute_batch(migration.sql)?;
            connection.execute(
                "INSERT INTO schema_migrations (version) VALUES (?)",
                [migration.version],
            )?;
        }
    }

    Ok(())
}

pub fn applied_versions(connection: &Connection) -> Result<Vec<String>, ::duckdb::Error> {
    let mut statement =
        connection.prepare("SELECT version FROM schema_migrations ORDER BY version")?;
    let rows = statement.query_map([], |row| row.get::<_, String>(0))?;
    rows.collect()
}
