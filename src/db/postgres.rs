use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{PnlSnapshot, TradeRecord, TradeSide};
use crate::ports::{SessionRepository, TradeJournal};
use crate::session::{SessionStatus, StopReason, StopReasonCode, TradingSession};

const SESSION_COLUMNS: &str = r#"
    id, user_id, account_id, strategy_id, status, started_at, stopped_at,
    stop_code, stop_message, stop_at, pnl_realized, pnl_unrealized, pnl_updated_at
"#;

/// Postgres-backed session store and trade journal
pub struct PostgresSessionRepository {
    pool: PgPool,
}

impl PostgresSessionRepository {
    /// Connect to Postgres and run pending migrations
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("failed to connect to Postgres")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run migrations")?;

        tracing::info!("Connected to Postgres session store");

        Ok(Self { pool })
    }

    fn session_from_row(row: &PgRow) -> Result<TradingSession> {
        let status: String = row.try_get("status")?;
        let status = status
            .parse::<SessionStatus>()
            .map_err(|e| anyhow!("invalid session status: {e}"))?;

        let stop_code: Option<String> = row.try_get("stop_code")?;
        let stop_reason = match stop_code {
            Some(code) => {
                let code = code
                    .parse::<StopReasonCode>()
                    .map_err(|e| anyhow!("invalid stop code: {e}"))?;
                let message: Option<String> = row.try_get("stop_message")?;
                let at: Option<DateTime<Utc>> = row.try_get("stop_at")?;
                Some(StopReason::new(
                    code,
                    message.unwrap_or_default(),
                    at.context("stop_at missing for stop reason")?,
                ))
            }
            None => None,
        };

        let pnl_updated_at: Option<DateTime<Utc>> = row.try_get("pnl_updated_at")?;
        let pnl = match pnl_updated_at {
            Some(updated_at) => Some(PnlSnapshot {
                realized: row.try_get::<Option<f64>, _>("pnl_realized")?.unwrap_or(0.0),
                unrealized: row
                    .try_get::<Option<f64>, _>("pnl_unrealized")?
                    .unwrap_or(0.0),
                updated_at,
            }),
            None => None,
        };

        Ok(TradingSession::rehydrate(
            row.try_get("id")?,
            row.try_get("user_id")?,
            row.try_get("account_id")?,
            row.try_get("strategy_id")?,
            status,
            row.try_get("started_at")?,
            row.try_get("stopped_at")?,
            stop_reason,
            pnl,
        ))
    }

    fn sessions_from_rows(rows: &[PgRow]) -> Result<Vec<TradingSession>> {
        rows.iter().map(Self::session_from_row).collect()
    }

    /// Trades journaled for a user, oldest first
    pub async fn load_trades(&self, user_id: &str) -> Result<Vec<TradeRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, job_key, symbol, side, quantity, price, stop_price, executed_at
            FROM trade_journal
            WHERE user_id = $1
            ORDER BY executed_at ASC, id ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<TradeRecord> {
                let side = match row.try_get::<String, _>("side")?.as_str() {
                    "BUY" => TradeSide::Buy,
                    "SELL" => TradeSide::Sell,
                    other => return Err(anyhow!("invalid trade side '{other}'")),
                };
                Ok(TradeRecord {
                    user_id: row.try_get("user_id")?,
                    job_key: row.try_get("job_key")?,
                    symbol: row.try_get("symbol")?,
                    side,
                    quantity: row.try_get("quantity")?,
                    price: row.try_get("price")?,
                    stop_price: row.try_get("stop_price")?,
                    timestamp: row.try_get("executed_at")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl SessionRepository for PostgresSessionRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<TradingSession>> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM trading_sessions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::session_from_row).transpose()
    }

    async fn find_active_by_user(&self, user_id: &str) -> Result<Option<TradingSession>> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM trading_sessions \
             WHERE user_id = $1 AND status = 'RUNNING' LIMIT 1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::session_from_row).transpose()
    }

    async fn find_running(&self) -> Result<Vec<TradingSession>> {
        let rows = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM trading_sessions \
             WHERE status = 'RUNNING' ORDER BY started_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        Self::sessions_from_rows(&rows)
    }

    async fn save(&self, session: &TradingSession) -> Result<()> {
        let reason = session.stop_reason();
        let pnl = session.pnl();

        sqlx::query(
            r#"
            INSERT INTO trading_sessions (
                id, user_id, account_id, strategy_id, status, started_at, stopped_at,
                stop_code, stop_message, stop_at, pnl_realized, pnl_unrealized, pnl_updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                started_at = EXCLUDED.started_at,
                stopped_at = EXCLUDED.stopped_at,
                stop_code = EXCLUDED.stop_code,
                stop_message = EXCLUDED.stop_message,
                stop_at = EXCLUDED.stop_at,
                pnl_realized = EXCLUDED.pnl_realized,
                pnl_unrealized = EXCLUDED.pnl_unrealized,
                pnl_updated_at = EXCLUDED.pnl_updated_at,
                updated_at = NOW()
            "#,
        )
        .bind(session.id())
        .bind(session.user_id())
        .bind(session.account_id())
        .bind(session.strategy_id())
        .bind(session.status().as_str())
        .bind(session.started_at())
        .bind(session.stopped_at())
        .bind(reason.map(|r| r.code.as_str()))
        .bind(reason.map(|r| r.message.as_str()))
        .bind(reason.map(|r| r.at))
        .bind(pnl.map(|p| p.realized))
        .bind(pnl.map(|p| p.unrealized))
        .bind(pnl.map(|p| p.updated_at))
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to save session {}", session.id()))?;

        tracing::debug!(
            session = %session.id(),
            status = %session.status(),
            "Saved session to Postgres"
        );

        Ok(())
    }
}

#[async_trait]
impl TradeJournal for PostgresSessionRepository {
    async fn log_trade(&self, record: &TradeRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trade_journal (
                user_id, job_key, symbol, side, quantity, price, stop_price, executed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&record.user_id)
        .bind(&record.job_key)
        .bind(&record.symbol)
        .bind(record.side.as_str())
        .bind(record.quantity)
        .bind(record.price)
        .bind(record.stop_price)
        .bind(record.timestamp)
        .execute(&self.pool)
        .await
        .context("failed to journal trade")?;

        Ok(())
    }
}
