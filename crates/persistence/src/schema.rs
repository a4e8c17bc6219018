//! Database schema definitions

/// SQL to create all tables.
/// Metric columns are nullable: non-finite values are stored as NULL.
pub const CREATE_TABLES: &str = r#"
-- Backtest run history, one row per distinct request
CREATE TABLE IF NOT EXISTS backtest_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    params_hash TEXT NOT NULL UNIQUE,
    strategy_description TEXT NOT NULL,
    parsed_strategy TEXT NOT NULL,
    symbol TEXT NOT NULL,
    timeframe TEXT NOT NULL,
    initial_capital REAL NOT NULL,
    commission REAL NOT NULL,
    data_points INTEGER NOT NULL DEFAULT 0,
    data_source TEXT NOT NULL,
    outcome TEXT NOT NULL,
    net_profit REAL,
    profit_factor REAL,
    sharpe_ratio REAL,
    win_rate REAL,
    max_drawdown REAL,
    total_trades INTEGER NOT NULL DEFAULT 0,
    metrics_json TEXT NOT NULL,
    created_at INTEGER DEFAULT (strftime('%s', 'now'))
);

-- ========== INDEXES ==========

CREATE INDEX IF NOT EXISTS idx_runs_symbol ON backtest_runs(symbol, timeframe);
CREATE INDEX IF NOT EXISTS idx_runs_created ON backtest_runs(created_at DESC)
"#;

/// Column additions applied after table creation; "duplicate column" errors are tolerated
pub const MIGRATIONS: &[&str] = &["ALTER TABLE backtest_runs ADD COLUMN fallback_reason TEXT"];
