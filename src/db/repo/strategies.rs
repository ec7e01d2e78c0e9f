//! Strategy catalog, assignments, and the attribution resolver.
//!
//! The core only *reads* assignments; the CRUD below exists for the
//! external management surface and for test setup.

use crate::domain::{AccountId, StrategyAssignment, Symbol, TimeMs};
use sqlx::Row;

use super::Repository;

impl Repository {
    /// Create a strategy in the catalog, returning its id.
    pub async fn create_strategy(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query("INSERT INTO strategies (name, description) VALUES (?, ?)")
            .bind(name.trim())
            .bind(description)
            .execute(&self.pool)
            .await?;

        Ok(result.last_insert_rowid())
    }

    /// Create a time-bounded assignment, returning its id.
    pub async fn create_assignment(
        &self,
        account: &AccountId,
        symbol: &Symbol,
        strategy_id: i64,
        starts_at: TimeMs,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO strategy_assignments
            (account, symbol, strategy_id, starts_at_ms, ends_at_ms, active)
            VALUES (?, ?, ?, ?, NULL, 1)
            "#,
        )
        .bind(account.as_str())
        .bind(symbol.as_str())
        .bind(strategy_id)
        .bind(starts_at.as_ms())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// End an assignment at the given instant and mark it inactive.
    pub async fn end_assignment(
        &self,
        assignment_id: i64,
        ends_at: TimeMs,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE strategy_assignments
            SET ends_at_ms = ?, active = 0
            WHERE id = ?
            "#,
        )
        .bind(ends_at.as_ms())
        .bind(assignment_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// List assignments for an account, newest first per symbol.
    pub async fn list_assignments(
        &self,
        account: &AccountId,
    ) -> Result<Vec<StrategyAssignment>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, account, symbol, strategy_id, starts_at_ms, ends_at_ms, active
            FROM strategy_assignments
            WHERE account = ?
            ORDER BY symbol ASC, starts_at_ms DESC
            "#,
        )
        .bind(account.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| StrategyAssignment {
                id: row.get("id"),
                account: AccountId::new(row.get::<String, _>("account")),
                symbol: Symbol::new(row.get::<String, _>("symbol")),
                strategy_id: row.get("strategy_id"),
                starts_at: TimeMs::new(row.get("starts_at_ms")),
                ends_at: row.get::<Option<i64>, _>("ends_at_ms").map(TimeMs::new),
                active: row.get::<i64, _>("active") != 0,
            })
            .collect())
    }

    /// Resolve the strategy active for (account, symbol) at an instant.
    ///
    /// Overlapping assignments are a data-entry error upstream; the one
    /// with the latest `starts_at` wins deterministically. `None` means
    /// "no attribution", never an error.
    pub async fn resolve_strategy_id(
        &self,
        account: &AccountId,
        symbol: &Symbol,
        at: TimeMs,
    ) -> Result<Option<i64>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT strategy_id
            FROM strategy_assignments
            WHERE account = ? AND symbol = ?
              AND starts_at_ms <= ?
              AND (ends_at_ms IS NULL OR ends_at_ms >= ?)
            ORDER BY starts_at_ms DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(account.as_str())
        .bind(symbol.as_str())
        .bind(at.as_ms())
        .bind(at.as_ms())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.get("strategy_id")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::init_db;
    use tempfile::TempDir;

    async fn setup_test_db() -> (Repository, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        (Repository::new(pool), temp_dir)
    }

    fn account() -> AccountId {
        AccountId::new("0x1".to_string())
    }

    fn btc() -> Symbol {
        Symbol::new("BTC".to_string())
    }

    #[tokio::test]
    async fn test_resolve_before_any_assignment_is_none() {
        let (repo, _temp) = setup_test_db().await;
        let strategy_id = repo.create_strategy("trend", None).await.unwrap();
        repo.create_assignment(&account(), &btc(), strategy_id, TimeMs::new(1000))
            .await
            .unwrap();

        let resolved = repo
            .resolve_strategy_id(&account(), &btc(), TimeMs::new(999))
            .await
            .unwrap();
        assert_eq!(resolved, None);
    }

    #[tokio::test]
    async fn test_resolve_open_ended_and_bounded() {
        let (repo, _temp) = setup_test_db().await;
        let strategy_id = repo.create_strategy("trend", Some("breakouts")).await.unwrap();
        let assignment_id = repo
            .create_assignment(&account(), &btc(), strategy_id, TimeMs::new(1000))
            .await
            .unwrap();

        assert_eq!(
            repo.resolve_strategy_id(&account(), &btc(), TimeMs::new(5000))
                .await
                .unwrap(),
            Some(strategy_id)
        );

        repo.end_assignment(assignment_id, TimeMs::new(2000))
            .await
            .unwrap();

        // ends_at is inclusive.
        assert_eq!(
            repo.resolve_strategy_id(&account(), &btc(), TimeMs::new(2000))
                .await
                .unwrap(),
            Some(strategy_id)
        );
        assert_eq!(
            repo.resolve_strategy_id(&account(), &btc(), TimeMs::new(2001))
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_overlapping_assignments_latest_start_wins() {
        let (repo, _temp) = setup_test_db().await;
        let older = repo.create_strategy("trend", None).await.unwrap();
        let newer = repo.create_strategy("meanrev", None).await.unwrap();

        repo.create_assignment(&account(), &btc(), older, TimeMs::new(1000))
            .await
            .unwrap();
        repo.create_assignment(&account(), &btc(), newer, TimeMs::new(2000))
            .await
            .unwrap();

        // Both rows cover t=3000; the later starts_at wins.
        assert_eq!(
            repo.resolve_strategy_id(&account(), &btc(), TimeMs::new(3000))
                .await
                .unwrap(),
            Some(newer)
        );
    }

    #[tokio::test]
    async fn test_resolve_scoped_by_account_and_symbol() {
        let (repo, _temp) = setup_test_db().await;
        let strategy_id = repo.create_strategy("trend", None).await.unwrap();
        repo.create_assignment(&account(), &btc(), strategy_id, TimeMs::new(1000))
            .await
            .unwrap();

        let other_account = AccountId::new("0x2".to_string());
        assert_eq!(
            repo.resolve_strategy_id(&other_account, &btc(), TimeMs::new(5000))
                .await
                .unwrap(),
            None
        );

        let eth = Symbol::new("ETH".to_string());
        assert_eq!(
            repo.resolve_strategy_id(&account(), &eth, TimeMs::new(5000))
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_list_assignments_orders_newest_first() {
        let (repo, _temp) = setup_test_db().await;
        let strategy_id = repo.create_strategy("trend", None).await.unwrap();
        repo.create_assignment(&account(), &btc(), strategy_id, TimeMs::new(1000))
            .await
            .unwrap();
        repo.create_assignment(&account(), &btc(), strategy_id, TimeMs::new(3000))
            .await
            .unwrap();

        let list = repo.list_assignments(&account()).await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].starts_at, TimeMs::new(3000));
        assert!(list[0].active);
    }
}
