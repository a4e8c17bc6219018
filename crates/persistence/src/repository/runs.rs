//! Backtest run history repository

use crate::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// A stored backtest run: request identity, headline metrics and the full report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct BacktestRunRecord {
    pub id: Option<i64>,
    pub params_hash: String,
    pub strategy_description: String,
    /// Structured strategy, JSON
    pub parsed_strategy: String,
    pub symbol: String,
    pub timeframe: String,
    pub initial_capital: f64,
    pub commission: f64,
    pub data_points: i64,
    pub data_source: String,
    pub outcome: String,
    pub fallback_reason: Option<String>,
    pub net_profit: Option<f64>,
    pub profit_factor: Option<f64>,
    pub sharpe_ratio: Option<f64>,
    pub win_rate: Option<f64>,
    pub max_drawdown: Option<f64>,
    pub total_trades: i64,
    /// Full metrics report, JSON
    pub metrics_json: String,
    pub created_at: Option<i64>,
}

/// Aggregated history stats
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub total_runs: i64,
    pub fallback_runs: i64,
    pub unique_symbols: i64,
    pub best_net_profit: Option<f64>,
    pub best_params_hash: Option<String>,
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, params_hash, strategy_description, parsed_strategy,
           symbol, timeframe, initial_capital, commission,
           data_points, data_source, outcome, fallback_reason,
           net_profit, profit_factor, sharpe_ratio, win_rate, max_drawdown,
           total_trades, metrics_json, created_at
    FROM backtest_runs
"#;

/// Repository for backtest run history
pub struct BacktestRunRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> BacktestRunRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or replace the run stored under the record's params_hash, returning its row id
    pub async fn save(&self, record: &BacktestRunRecord) -> DbResult<i64> {
        let (id,): (i64,) = sqlx::query_as(
            r#"INSERT INTO backtest_runs
                (params_hash, strategy_description, parsed_strategy, symbol, timeframe,
                 initial_capital, commission, data_points, data_source, outcome,
                 fallback_reason, net_profit, profit_factor, sharpe_ratio, win_rate,
                 max_drawdown, total_trades, metrics_json, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                       ?16, ?17, ?18, strftime('%s', 'now'))
               ON CONFLICT(params_hash) DO UPDATE SET
                 strategy_description = excluded.strategy_description,
                 parsed_strategy = excluded.parsed_strategy,
                 data_points = excluded.data_points,
                 data_source = excluded.data_source,
                 outcome = excluded.outcome,
                 fallback_reason = excluded.fallback_reason,
                 net_profit = excluded.net_profit,
                 profit_factor = excluded.profit_factor,
                 sharpe_ratio = excluded.sharpe_ratio,
                 win_rate = excluded.win_rate,
                 max_drawdown = excluded.max_drawdown,
                 total_trades = excluded.total_trades,
                 metrics_json = excluded.metrics_json,
                 created_at = strftime('%s', 'now')
               RETURNING id
            "#,
        )
        .bind(&record.params_hash)
        .bind(&record.strategy_description)
        .bind(&record.parsed_strategy)
        .bind(&record.symbol)
        .bind(&record.timeframe)
        .bind(record.initial_capital)
        .bind(record.commission)
        .bind(record.data_points)
        .bind(&record.data_source)
        .bind(&record.outcome)
        .bind(&record.fallback_reason)
        .bind(record.net_profit)
        .bind(record.profit_factor)
        .bind(record.sharpe_ratio)
        .bind(record.win_rate)
        .bind(record.max_drawdown)
        .bind(record.total_trades)
        .bind(&record.metrics_json)
        .fetch_one(self.pool)
        .await?;

        Ok(id)
    }

    pub async fn get_by_hash(&self, hash: &str) -> DbResult<Option<BacktestRunRecord>> {
        let sql = format!("{SELECT_COLUMNS} WHERE params_hash = ?");
        let record = sqlx::query_as::<_, BacktestRunRecord>(&sql)
            .bind(hash)
            .fetch_optional(self.pool)
            .await?;

        Ok(record)
    }

    /// Runs whose params_hash starts with `prefix`, most recent first
    pub async fn find_by_hash_prefix(
        &self,
        prefix: &str,
        limit: i64,
    ) -> DbResult<Vec<BacktestRunRecord>> {
        let escaped = prefix
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        let sql = format!(
            "{SELECT_COLUMNS} WHERE params_hash LIKE ? || '%' ESCAPE '\\' \
             ORDER BY created_at DESC, id DESC LIMIT ?"
        );
        let records = sqlx::query_as::<_, BacktestRunRecord>(&sql)
            .bind(escaped)
            .bind(limit)
            .fetch_all(self.pool)
            .await?;

        Ok(records)
    }

    /// Most recent runs first
    pub async fn get_recent(&self, limit: i64) -> DbResult<Vec<BacktestRunRecord>> {
        let sql = format!("{SELECT_COLUMNS} ORDER BY created_at DESC, id DESC LIMIT ?");
        let records = sqlx::query_as::<_, BacktestRunRecord>(&sql)
            .bind(limit)
            .fetch_all(self.pool)
            .await?;

        Ok(records)
    }

    pub async fn get_stats(&self) -> DbResult<RunStats> {
        let (total_runs, fallback_runs, unique_symbols): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*),
                   COALESCE(SUM(CASE WHEN outcome = 'fallback' THEN 1 ELSE 0 END), 0),
                   COUNT(DISTINCT symbol)
            FROM backtest_runs
            "#,
        )
        .fetch_one(self.pool)
        .await?;

        let best: Option<(f64, String)> = sqlx::query_as(
            r#"
            SELECT net_profit, params_hash
            FROM backtest_runs
            WHERE outcome = 'completed' AND net_profit IS NOT NULL
            ORDER BY net_profit DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(self.pool)
        .await?;

        let (best_net_profit, best_params_hash) = match best {
            Some((profit, hash)) => (Some(profit), Some(hash)),
            None => (None, None),
        };

        Ok(RunStats {
            total_runs,
            fallback_runs,
            unique_symbols,
            best_net_profit,
            best_params_hash,
        })
    }

    /// Keep only the `keep` most recent runs; returns how many were deleted
    pub async fn delete_older_than_keep(&self, keep: i64) -> DbResult<u64> {
        if keep < 0 {
            return Err(DbError::Query(format!("keep must be non-negative, got {keep}")));
        }

        let result = sqlx::query(
            r#"
            DELETE FROM backtest_runs
            WHERE id NOT IN (
                SELECT id FROM backtest_runs
                ORDER BY created_at DESC, id DESC
                LIMIT ?
            )
            "#,
        )
        .bind(keep)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
