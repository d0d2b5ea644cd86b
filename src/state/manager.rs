//! PostgreSQL store

use super::{AtomicTxRecord, AtomicTxState, Store, StoreStats, SwapRecord, SwapState, TxIntent};
use crate::chain::Chain;
use crate::config::DatabaseConfig;
use crate::error::{RelayerError, RelayerResult};

use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Postgres, Row};
use std::collections::BTreeMap;
use tracing::{debug, info};
use uuid::Uuid;

const TX_COLUMNS: &str = "id, from_path, from_address, to_path, to_address, amount, description, \
     source_chain, destination_chain, unsigned_transaction, custody_job_id, signed_transaction, \
     ledger_tx_id, state, attempts, last_error, created_at, updated_at";

const SWAP_COLUMNS: &str =
    "id, source_chain, destination_chain, export_tx_id, import_tx_id, state, created_at, updated_at";

/// [`Store`] backed by a PostgreSQL pool
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn new(config: &DatabaseConfig) -> RelayerResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    /// Create tables and indexes
    pub async fn run_migrations(&self) -> RelayerResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS atomic_transactions (
                id UUID PRIMARY KEY,
                from_path TEXT NOT NULL,
                from_address TEXT NOT NULL,
                to_path TEXT NOT NULL,
                to_address TEXT NOT NULL,
                amount BIGINT NOT NULL CHECK (amount > 0),
                description TEXT NOT NULL,
                source_chain VARCHAR(1) NOT NULL,
                destination_chain VARCHAR(1) NOT NULL,
                unsigned_transaction TEXT NOT NULL,
                custody_job_id TEXT,
                signed_transaction TEXT,
                ledger_tx_id TEXT,
                state VARCHAR(30) NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_atomic_transactions_custody_job
            ON atomic_transactions (custody_job_id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_atomic_transactions_ledger_tx
            ON atomic_transactions (ledger_tx_id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_atomic_transactions_state
            ON atomic_transactions (state, created_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS swaps (
                id UUID PRIMARY KEY,
                source_chain VARCHAR(1) NOT NULL,
                destination_chain VARCHAR(1) NOT NULL,
                export_tx_id UUID NOT NULL UNIQUE REFERENCES atomic_transactions (id),
                import_tx_id UUID UNIQUE REFERENCES atomic_transactions (id),
                state VARCHAR(30) NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_swaps_state
            ON swaps (state, created_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Database migrations complete");
        Ok(())
    }
}

fn insert_tx_query(tx: &AtomicTxRecord) -> RelayerResult<Query<'_, Postgres, PgArguments>> {
    let amount = i64::try_from(tx.intent.amount).map_err(|_| {
        RelayerError::Build(format!("amount {} does not fit in the database", tx.intent.amount))
    })?;

    Ok(sqlx::query(
        r#"
        INSERT INTO atomic_transactions
            (id, from_path, from_address, to_path, to_address, amount, description,
             source_chain, destination_chain, unsigned_transaction, custody_job_id,
             signed_transaction, ledger_tx_id, state, attempts, last_error,
             created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
        "#,
    )
    .bind(tx.id)
    .bind(&tx.intent.from_path)
    .bind(&tx.intent.from_address)
    .bind(&tx.intent.to_path)
    .bind(&tx.intent.to_address)
    .bind(amount)
    .bind(&tx.intent.description)
    .bind(tx.intent.source_chain.to_string())
    .bind(tx.intent.destination_chain.to_string())
    .bind(&tx.unsigned_transaction)
    .bind(&tx.custody_job_id)
    .bind(&tx.signed_transaction)
    .bind(&tx.ledger_tx_id)
    .bind(tx.state.as_str())
    .bind(attempts_column(tx)?)
    .bind(&tx.last_error)
    .bind(tx.created_at)
    .bind(tx.updated_at))
}

fn attempts_column(tx: &AtomicTxRecord) -> RelayerResult<i32> {
    i32::try_from(tx.attempts)
        .map_err(|_| RelayerError::Internal(format!("attempt count {} overflows", tx.attempts)))
}

/// Non-negative database integer as an unsigned count
fn unsigned<T: TryFrom<i64>>(value: i64, column: &str) -> RelayerResult<T> {
    T::try_from(value)
        .map_err(|_| RelayerError::Internal(format!("{} value {} out of range", column, value)))
}

fn parse_chain(text: &str) -> RelayerResult<Chain> {
    text.parse()
        .map_err(|_| RelayerError::Internal(format!("unknown chain {} in database", text)))
}

fn tx_from_row(row: &PgRow) -> RelayerResult<AtomicTxRecord> {
    Ok(AtomicTxRecord {
        id: row.try_get("id")?,
        intent: TxIntent {
            from_path: row.try_get("from_path")?,
            from_address: row.try_get("from_address")?,
            to_path: row.try_get("to_path")?,
            to_address: row.try_get("to_address")?,
            amount: unsigned(row.try_get::<i64, _>("amount")?, "amount")?,
            description: row.try_get("description")?,
            source_chain: parse_chain(row.try_get("source_chain")?)?,
            destination_chain: parse_chain(row.try_get("destination_chain")?)?,
        },
        unsigned_transaction: row.try_get("unsigned_transaction")?,
        custody_job_id: row.try_get("custody_job_id")?,
        signed_transaction: row.try_get("signed_transaction")?,
        ledger_tx_id: row.try_get("ledger_tx_id")?,
        state: row.try_get::<&str, _>("state")?.parse()?,
        attempts: unsigned(row.try_get::<i32, _>("attempts")?.into(), "attempts")?,
        last_error: row.try_get("last_error")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn swap_from_row(row: &PgRow) -> RelayerResult<SwapRecord> {
    Ok(SwapRecord {
        id: row.try_get("id")?,
        source_chain: parse_chain(row.try_get("source_chain")?)?,
        destination_chain: parse_chain(row.try_get("destination_chain")?)?,
        export_tx_id: row.try_get("export_tx_id")?,
        import_tx_id: row.try_get("import_tx_id")?,
        state: row.try_get::<&str, _>("state")?.parse()?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn count_by_state(rows: Vec<PgRow>) -> RelayerResult<BTreeMap<String, u64>> {
    rows.iter()
        .map(|row| {
            Ok((
                row.try_get::<String, _>("state")?,
                unsigned(row.try_get::<i64, _>("count")?, "count")?,
            ))
        })
        .collect()
}

#[async_trait]
impl Store for PgStore {
    async fn get_atomic_tx(&self, id: Uuid) -> RelayerResult<AtomicTxRecord> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM atomic_transactions WHERE id = $1",
            TX_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| RelayerError::NotFound {
            entity: "atomic transaction",
            id: id.to_string(),
        })?;

        tx_from_row(&row)
    }

    async fn atomic_txs_in_state(
        &self,
        state: AtomicTxState,
    ) -> RelayerResult<Vec<AtomicTxRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM atomic_transactions WHERE state = $1 ORDER BY created_at",
            TX_COLUMNS
        ))
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(tx_from_row).collect()
    }

    async fn update_atomic_tx(
        &self,
        tx: &AtomicTxRecord,
        expected: AtomicTxState,
    ) -> RelayerResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE atomic_transactions
            SET custody_job_id = $2, signed_transaction = $3, ledger_tx_id = $4,
                state = $5, attempts = $6, last_error = $7, updated_at = $8
            WHERE id = $1 AND state = $9
            "#,
        )
        .bind(tx.id)
        .bind(&tx.custody_job_id)
        .bind(&tx.signed_transaction)
        .bind(&tx.ledger_tx_id)
        .bind(tx.state.as_str())
        .bind(attempts_column(tx)?)
        .bind(&tx.last_error)
        .bind(tx.updated_at)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RelayerError::StaleState {
                entity: "atomic transaction",
                id: tx.id.to_string(),
                expected: expected.to_string(),
            });
        }

        debug!("Atomic transaction {}: {} -> {}", tx.id, expected, tx.state);
        Ok(())
    }

    async fn create_swap(&self, export: &AtomicTxRecord, swap: &SwapRecord) -> RelayerResult<()> {
        let mut db_tx = self.pool.begin().await?;

        insert_tx_query(export)?.execute(&mut *db_tx).await?;

        sqlx::query(
            r#"
            INSERT INTO swaps
                (id, source_chain, destination_chain, export_tx_id, import_tx_id, state,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(swap.id)
        .bind(swap.source_chain.to_string())
        .bind(swap.destination_chain.to_string())
        .bind(swap.export_tx_id)
        .bind(swap.import_tx_id)
        .bind(swap.state.as_str())
        .bind(swap.created_at)
        .bind(swap.updated_at)
        .execute(&mut *db_tx)
        .await?;

        db_tx.commit().await?;
        debug!("Stored swap {} with export {}", swap.id, export.id);
        Ok(())
    }

    async fn get_swap(&self, id: Uuid) -> RelayerResult<SwapRecord> {
        let row = sqlx::query(&format!("SELECT {} FROM swaps WHERE id = $1", SWAP_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| RelayerError::NotFound {
                entity: "swap",
                id: id.to_string(),
            })?;

        swap_from_row(&row)
    }

    async fn swaps_in_state(&self, state: SwapState) -> RelayerResult<Vec<SwapRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM swaps WHERE state = $1 ORDER BY created_at",
            SWAP_COLUMNS
        ))
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(swap_from_row).collect()
    }

    async fn update_swap(&self, swap: &SwapRecord, expected: SwapState) -> RelayerResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE swaps
            SET state = $2, import_tx_id = $3, updated_at = $4
            WHERE id = $1 AND state = $5
            "#,
        )
        .bind(swap.id)
        .bind(swap.state.as_str())
        .bind(swap.import_tx_id)
        .bind(swap.updated_at)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RelayerError::StaleState {
                entity: "swap",
                id: swap.id.to_string(),
                expected: expected.to_string(),
            });
        }

        debug!("Swap {}: {} -> {}", swap.id, expected, swap.state);
        Ok(())
    }

    async fn attach_import(
        &self,
        swap: &SwapRecord,
        import: &AtomicTxRecord,
        expected: SwapState,
    ) -> RelayerResult<()> {
        let mut db_tx = self.pool.begin().await?;

        insert_tx_query(import)?.execute(&mut *db_tx).await?;

        let result = sqlx::query(
            r#"
            UPDATE swaps
            SET import_tx_id = $2, updated_at = $3
            WHERE id = $1 AND state = $4 AND import_tx_id IS NULL
            "#,
        )
        .bind(swap.id)
        .bind(import.id)
        .bind(swap.updated_at)
        .bind(expected.as_str())
        .execute(&mut *db_tx)
        .await?;

        if result.rows_affected() == 0 {
            // Dropping the transaction rolls back the import insert
            return Err(RelayerError::StaleState {
                entity: "swap",
                id: swap.id.to_string(),
                expected: expected.to_string(),
            });
        }

        db_tx.commit().await?;
        debug!("Swap {} import {} attached", swap.id, import.id);
        Ok(())
    }

    async fn stats(&self) -> RelayerResult<StoreStats> {
        let transactions = sqlx::query(
            "SELECT state, COUNT(*) AS count FROM atomic_transactions GROUP BY state",
        )
        .fetch_all(&self.pool)
        .await?;

        let swaps = sqlx::query("SELECT state, COUNT(*) AS count FROM swaps GROUP BY state")
            .fetch_all(&self.pool)
            .await?;

        Ok(StoreStats {
            transactions: count_by_state(transactions)?,
            swaps: count_by_state(swaps)?,
        })
    }

    async fn health_check(&self) -> RelayerResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
