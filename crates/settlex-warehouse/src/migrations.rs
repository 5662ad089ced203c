use ::duckdb::Connection;

pub(crate) struct Migration {
    version: &'static str,
    sql: &'static str,
}

pub(crate) const SERIES_MIGRATIONS: &[Migration] = &[
    Migration {
        version: "0001_settlement_series",
        sql: r#"
CREATE TABLE IF NOT EXISTS settlement_series (
    trading_date DATE NOT NULL,
    series TEXT NOT NULL,
    expiry DATE NOT NULL,
    strike DECIMAL(18, 6) NOT NULL,
    call_put TEXT NOT NULL,
    symbol TEXT NOT NULL,
    settlement_price DECIMAL(18, 6) NOT NULL,
    volume BIGINT NOT NULL,
    open_interest BIGINT NOT NULL,
    run_id TEXT NOT NULL,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY(trading_date, series, expiry, strike, call_put)
);

CREATE TABLE IF NOT EXISTS ingest_log (
    run_id TEXT NOT NULL,
    trading_date DATE NOT NULL,
    record_count BIGINT NOT NULL,
    status TEXT NOT NULL,
    timestamp TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    },
    Migration {
        version: "0002_series_indexes",
        sql: r#"
CREATE INDEX IF NOT EXISTS idx_settlement_series_symbol_date ON settlement_series(symbol, trading_date);
CREATE INDEX IF NOT EXISTS idx_ingest_log_trading_date ON ingest_log(trading_date);
"#,
    },
];

pub(crate) const DOCUMENT_MIGRATIONS: &[Migration] = &[
    Migration {
        version: "0001_settlement_documents",
        sql: r#"
CREATE TABLE IF NOT EXISTS settlement_documents (
    trading_date DATE NOT NULL,
    series TEXT NOT NULL,
    expiry DATE NOT NULL,
    strike TEXT NOT NULL,
    call_put TEXT NOT NULL,
    symbol TEXT NOT NULL,
    body TEXT NOT NULL,
    run_id TEXT NOT NULL,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY(trading_date, series, expiry, strike, call_put)
);

CREATE TABLE IF NOT EXISTS trading_dates (
    trading_date DATE PRIMARY KEY,
    record_count BIGINT NOT NULL,
    symbols TEXT NOT NULL,
    status TEXT NOT NULL,
    ingested_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS ingest_log (
    run_id TEXT NOT NULL,
    trading_date DATE NOT NULL,
    record_count BIGINT NOT NULL,
    status TEXT NOT NULL,
    timestamp TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    },
    Migration {
        version: "0002_document_indexes",
        sql: r#"
CREATE INDEX IF NOT EXISTS idx_settlement_documents_symbol ON settlement_documents(trading_date, symbol);
CREATE INDEX IF NOT EXISTS idx_ingest_log_trading_date ON ingest_log(trading_date);
"#,
    },
];

pub(crate) fn apply_migrations(
    connection: &Connection,
    migrations: &[Migration],
) -> Result<usize, ::duckdb::Error> {
    connection.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    )?;

    let mut applied = 0;
    for migration in migrations {
        let already: i64 = connection.query_row(
            "SELECT COUNT(*) FROM schema_migrations WHERE version = ?",
            [migration.version],
            |row| row.get(0),
        )?;
        if already > 0 {
            continue;
        }

        connection.execute_batch(migration.sql)?;
        connection.execute(
            "INSERT INTO schema_migrations (version) VALUES (?)",
            [migration.version],
        )?;
        applied += 1;
    }

    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_apply_once() {
        let connection = Connection::open_in_memory().expect("connection");
        assert_eq!(
            apply_migrations(&connection, SERIES_MIGRATIONS).expect("first"),
            SERIES_MIGRATIONS.len()
        );
        assert_eq!(
            apply_migrations(&connection, SERIES_MIGRATIONS).expect("second"),
            0
        );
    }
}
