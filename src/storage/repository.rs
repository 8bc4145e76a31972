use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::debug;
use uuid::Uuid;

use crate::domain::{Material, Movement, MovementKind, Quantity, StockKey, Subject, SubjectKind};

use super::MIGRATIONS;

const MOVEMENT_COLUMNS: &str =
    "id, sequence, kind, subject, material, quantity, reference, timestamp, recorded_at, transfer_id";

/// Signed contribution of a row, mirroring `Movement::signed_quantity`.
const SIGNED_QUANTITY: &str =
    "CASE WHEN kind IN ('CONSUMPTION', 'TRANSFER_OUT', 'ADJUSTMENT_DEBIT') THEN -quantity ELSE quantity END";

/// Optional filters for listing movements.
#[derive(Debug, Clone, Default)]
pub struct MovementQuery<'a> {
    pub subject: Option<&'a str>,
    pub material: Option<&'a str>,
    pub kind: Option<MovementKind>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// Repository for persisting and querying catalogs and movements.
///
/// Functions taking a `SqliteConnection` are the building blocks used
/// inside a transaction; the `&self` methods run on the pool.
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite database at the given URL.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Apply pending migrations, recording each applied version.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_migrations (version INTEGER PRIMARY KEY NOT NULL, applied_at TEXT NOT NULL)",
        )
        .execute(&self.pool)
        .await
        .context("Failed to create schema_migrations table")?;

        for &(version, sql) in MIGRATIONS {
            let applied: Option<i64> =
                sqlx::query_scalar("SELECT version FROM schema_migrations WHERE version = ?")
                    .bind(version)
                    .fetch_optional(&self.pool)
                    .await
                    .context("Failed to read schema_migrations")?;
            if applied.is_some() {
                continue;
            }

            let mut tx = self.pool.begin().await?;
            sqlx::raw_sql(sql)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("Failed to run migration {:03}", version))?;
            sqlx::query("INSERT INTO schema_migrations (version, applied_at) VALUES (?, ?)")
                .bind(version)
                .bind(Utc::now().to_rfc3339())
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            debug!(version, "applied migration");
        }

        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(database_url: &str) -> Result<Self> {
        let repo = Self::connect(database_url).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    /// Start a write transaction.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        self.pool
            .begin()
            .await
            .context("Failed to start transaction")
    }

    // ========================
    // Catalog operations
    // ========================

    pub async fn save_subject(&self, subject: &Subject) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        Self::insert_subject(&mut conn, subject).await
    }

    pub async fn insert_subject(conn: &mut SqliteConnection, subject: &Subject) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO subjects (id, code, name, kind, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(subject.id.to_string())
        .bind(&subject.code)
        .bind(&subject.name)
        .bind(subject.kind.as_str())
        .bind(subject.created_at.to_rfc3339())
        .execute(&mut *conn)
        .await
        .context("Failed to save subject")?;
        Ok(())
    }

    pub async fn get_subject_by_code(&self, code: &str) -> Result<Option<Subject>> {
        let mut conn = self.pool.acquire().await?;
        Self::find_subject(&mut conn, code).await
    }

    pub async fn find_subject(conn: &mut SqliteConnection, code: &str) -> Result<Option<Subject>> {
        let row = sqlx::query(
            r#"
            SELECT id, code, name, kind, created_at
            FROM subjects
            WHERE code = ?
            "#,
        )
        .bind(code)
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to fetch subject")?;

        row.as_ref().map(Self::row_to_subject).transpose()
    }

    pub async fn list_subjects(&self) -> Result<Vec<Subject>> {
        let rows = sqlx::query("SELECT id, code, name, kind, created_at FROM subjects ORDER BY code")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list subjects")?;

        rows.iter().map(Self::row_to_subject).collect()
    }

    pub async fn save_material(&self, material: &Material) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        Self::insert_material(&mut conn, material).await
    }

    pub async fn insert_material(conn: &mut SqliteConnection, material: &Material) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO materials (id, code, name, unit, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(material.id.to_string())
        .bind(&material.code)
        .bind(&material.name)
        .bind(&material.unit)
        .bind(material.created_at.to_rfc3339())
        .execute(&mut *conn)
        .await
        .context("Failed to save material")?;
        Ok(())
    }

    pub async fn get_material_by_code(&self, code: &str) -> Result<Option<Material>> {
        let mut conn = self.pool.acquire().await?;
        Self::find_material(&mut conn, code).await
    }

    pub async fn find_material(
        conn: &mut SqliteConnection,
        code: &str,
    ) -> Result<Option<Material>> {
        let row = sqlx::query(
            r#"
            SELECT id, code, name, unit, created_at
            FROM materials
            WHERE code = ?
            "#,
        )
        .bind(code)
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to fetch material")?;

        row.as_ref().map(Self::row_to_material).transpose()
    }

    pub async fn list_materials(&self) -> Result<Vec<Material>> {
        let rows =
            sqlx::query("SELECT id, code, name, unit, created_at FROM materials ORDER BY code")
                .fetch_all(&self.pool)
                .await
                .context("Failed to list materials")?;

        rows.iter().map(Self::row_to_material).collect()
    }

    fn row_to_subject(row: &SqliteRow) -> Result<Subject> {
        let id_str: String = row.get("id");
        let kind_str: String = row.get("kind");
        let created_at_str: String = row.get("created_at");

        Ok(Subject {
            id: Uuid::parse_str(&id_str).context("Invalid subject ID")?,
            code: row.get("code"),
            name: row.get("name"),
            kind: SubjectKind::from_str(&kind_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid subject kind: {}", kind_str))?,
            created_at: parse_rfc3339(&created_at_str).context("Invalid created_at timestamp")?,
        })
    }

    fn row_to_material(row: &SqliteRow) -> Result<Material> {
        let id_str: String = row.get("id");
        let created_at_str: String = row.get("created_at");

        Ok(Material {
            id: Uuid::parse_str(&id_str).context("Invalid material ID")?,
            code: row.get("code"),
            name: row.get("name"),
            unit: row.get("unit"),
            created_at: parse_rfc3339(&created_at_str).context("Invalid created_at timestamp")?,
        })
    }

    // ========================
    // Movement operations
    // ========================

    /// Append a movement, assigning the next sequence number.
    pub async fn insert_movement(conn: &mut SqliteConnection, movement: &mut Movement) -> Result<()> {
        movement.sequence = Self::next_sequence(conn).await?;

        sqlx::query(
            r#"
            INSERT INTO movements (id, sequence, kind, subject, material, quantity, reference, timestamp, recorded_at, transfer_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(movement.id.to_string())
        .bind(movement.sequence)
        .bind(movement.kind.as_str())
        .bind(&movement.subject)
        .bind(&movement.material)
        .bind(movement.quantity)
        .bind(&movement.reference)
        .bind(format_timestamp(movement.timestamp))
        .bind(format_timestamp(movement.recorded_at))
        .bind(movement.transfer_id.map(|id| id.to_string()))
        .execute(&mut *conn)
        .await
        .context("Failed to save movement")?;

        Ok(())
    }

    /// Get the next sequence number and increment the counter.
    async fn next_sequence(conn: &mut SqliteConnection) -> Result<i64> {
        let row = sqlx::query(
            r#"
            UPDATE sequence_counter
            SET value = value + 1
            WHERE name = 'movement_sequence'
            RETURNING value
            "#,
        )
        .fetch_one(&mut *conn)
        .await
        .context("Failed to get next sequence number")?;

        Ok(row.get("value"))
    }

    /// List all movements, ordered by sequence number.
    pub async fn list_movements(&self) -> Result<Vec<Movement>> {
        self.list_movements_filtered(&MovementQuery::default()).await
    }

    /// List movements with optional filters, ordered by sequence number.
    pub async fn list_movements_filtered(&self, filter: &MovementQuery<'_>) -> Result<Vec<Movement>> {
        let mut query = format!("SELECT {} FROM movements WHERE 1=1", MOVEMENT_COLUMNS);

        let from_date_str = filter.from_date.map(format_timestamp);
        let to_date_str = filter.to_date.map(format_timestamp);

        if filter.subject.is_some() {
            query.push_str(" AND subject = ?");
        }
        if filter.material.is_some() {
            query.push_str(" AND material = ?");
        }
        if filter.kind.is_some() {
            query.push_str(" AND kind = ?");
        }
        if from_date_str.is_some() {
            query.push_str(" AND timestamp >= ?");
        }
        if to_date_str.is_some() {
            query.push_str(" AND timestamp <= ?");
        }

        query.push_str(" ORDER BY sequence");

        if let Some(lim) = filter.limit {
            query.push_str(&format!(" LIMIT {}", lim));
        }

        let mut sql_query = sqlx::query(&query);

        if let Some(subject) = filter.subject {
            sql_query = sql_query.bind(subject);
        }
        if let Some(material) = filter.material {
            sql_query = sql_query.bind(material);
        }
        if let Some(kind) = filter.kind {
            sql_query = sql_query.bind(kind.as_str());
        }
        if let Some(ref fd_str) = from_date_str {
            sql_query = sql_query.bind(fd_str);
        }
        if let Some(ref td_str) = to_date_str {
            sql_query = sql_query.bind(td_str);
        }

        let rows = sql_query
            .fetch_all(&self.pool)
            .await
            .context("Failed to list movements")?;

        rows.iter().map(Self::row_to_movement).collect()
    }

    /// Compute the balance of one key using SQL aggregation.
    pub async fn compute_balance(&self, subject: &str, material: &str) -> Result<Quantity> {
        let mut conn = self.pool.acquire().await?;
        Self::balance_on(&mut conn, subject, material).await
    }

    /// Balance of one key as seen by the given connection, so a write
    /// transaction can check and append against the same snapshot.
    pub async fn balance_on(
        conn: &mut SqliteConnection,
        subject: &str,
        material: &str,
    ) -> Result<Quantity> {
        let query = format!(
            "SELECT COALESCE(SUM({}), 0) AS balance FROM movements WHERE subject = ? AND material = ?",
            SIGNED_QUANTITY
        );
        let row = sqlx::query(&query)
            .bind(subject)
            .bind(material)
            .fetch_one(&mut *conn)
            .await
            .context("Failed to compute balance")?;

        Ok(row.get("balance"))
    }

    /// Compute balances for all keys in a single query.
    pub async fn compute_all_balances(&self) -> Result<BTreeMap<StockKey, Quantity>> {
        let query = format!(
            "SELECT subject, material, SUM({}) AS balance FROM movements GROUP BY subject, material",
            SIGNED_QUANTITY
        );
        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .await
            .context("Failed to compute all balances")?;

        let mut balances = BTreeMap::new();
        for row in rows {
            let key = StockKey::new(row.get::<String, _>("subject"), row.get::<String, _>("material"));
            balances.insert(key, row.get::<Quantity, _>("balance"));
        }

        Ok(balances)
    }

    pub async fn count_movements(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM movements")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count movements")?;
        Ok(count)
    }

    fn row_to_movement(row: &SqliteRow) -> Result<Movement> {
        let id_str: String = row.get("id");
        let kind_str: String = row.get("kind");
        let timestamp_str: String = row.get("timestamp");
        let recorded_at_str: String = row.get("recorded_at");
        let transfer_id_str: Option<String> = row.get("transfer_id");

        Ok(Movement {
            id: Uuid::parse_str(&id_str).context("Invalid movement ID")?,
            sequence: row.get("sequence"),
            kind: MovementKind::from_label(&kind_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid movement kind: {}", kind_str))?,
            subject: row.get("subject"),
            material: row.get("material"),
            quantity: row.get("quantity"),
            reference: row.get("reference"),
            timestamp: parse_rfc3339(&timestamp_str).context("Invalid timestamp")?,
            recorded_at: parse_rfc3339(&recorded_at_str).context("Invalid recorded_at")?,
            transfer_id: transfer_id_str
                .map(|s| Uuid::parse_str(&s))
                .transpose()
                .context("Invalid transfer ID")?,
        })
    }
}

/// Fixed-width UTC form so that text comparison in SQL orders correctly.
fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    async fn temp_repo() -> (Repository, TempDir) {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("repo.db").display());
        (Repository::init(&url).await.unwrap(), dir)
    }

    async fn append(repo: &Repository, movement: Movement) -> Movement {
        let mut movement = movement;
        let mut tx = repo.begin().await.unwrap();
        Repository::insert_movement(&mut tx, &mut movement).await.unwrap();
        tx.commit().await.unwrap();
        movement
    }

    #[tokio::test]
    async fn test_sequence_is_gapless_and_survives_rollback() {
        let (repo, _dir) = temp_repo().await;

        let now = Utc::now();
        let first = append(&repo, Movement::new(MovementKind::Initial, "T1", "CABLE", 10, now)).await;

        {
            let mut tx = repo.begin().await.unwrap();
            let mut discarded = Movement::new(MovementKind::Initial, "T1", "CABLE", 5, now);
            Repository::insert_movement(&mut tx, &mut discarded).await.unwrap();
            tx.rollback().await.unwrap();
        }

        let second =
            append(&repo, Movement::new(MovementKind::Consumption, "T1", "CABLE", 4, now)).await;

        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert_eq!(repo.compute_balance("T1", "CABLE").await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_movements_are_append_only() {
        let (repo, _dir) = temp_repo().await;
        append(&repo, Movement::new(MovementKind::Initial, "T1", "CABLE", 10, Utc::now())).await;

        let update = sqlx::query("UPDATE movements SET quantity = 99")
            .execute(&repo.pool)
            .await;
        assert!(update.is_err());

        let delete = sqlx::query("DELETE FROM movements").execute(&repo.pool).await;
        assert!(delete.is_err());

        assert_eq!(repo.count_movements().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let (repo, _dir) = temp_repo().await;
        repo.migrate().await.unwrap();

        let versions: Vec<i64> =
            sqlx::query_scalar("SELECT version FROM schema_migrations ORDER BY version")
                .fetch_all(&repo.pool)
                .await
                .unwrap();
        assert_eq!(versions, vec![1]);
    }

    #[tokio::test]
    async fn test_transfer_leg_row_roundtrip() {
        let (repo, _dir) = temp_repo().await;
        let transfer_id = Uuid::new_v4();
        let at = parse_rfc3339("2024-03-01T10:15:00.250Z").unwrap();
        let stored = append(
            &repo,
            Movement::new(MovementKind::TransferIn, "TECH1", "ROUTER", 2, at)
                .with_reference("GUIA-1")
                .with_transfer(transfer_id),
        )
        .await;

        let loaded = repo.list_movements().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, stored.id);
        assert_eq!(loaded[0].transfer_id, Some(transfer_id));
        assert_eq!(loaded[0].reference.as_deref(), Some("GUIA-1"));
        assert_eq!(loaded[0].timestamp, stored.timestamp);
    }

    #[test]
    fn test_signed_quantity_sql_matches_debit_kinds() {
        for kind in MovementKind::ALL {
            let quoted = format!("'{}'", kind.as_str());
            assert_eq!(SIGNED_QUANTITY.contains(&quoted), kind.is_debit(), "{kind}");
        }
    }

    #[tokio::test]
    async fn test_sql_balance_counts_transfer_out_as_debit() {
        let (repo, _dir) = temp_repo().await;
        let now = Utc::now();
        append(&repo, Movement::new(MovementKind::Initial, "W1", "CABLE", 10, now)).await;
        append(&repo, Movement::new(MovementKind::TransferOut, "W1", "CABLE", 4, now)).await;

        assert_eq!(repo.compute_balance("W1", "CABLE").await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_legacy_kind_label_violates_schema() {
        let (repo, _dir) = temp_repo().await;
        let insert = sqlx::query(
            "INSERT INTO movements (id, sequence, kind, subject, material, quantity, timestamp, recorded_at) \
             VALUES ('x', 1, 'Ajuste-', 'T1', 'CABLE', 1, '2024-01-01T00:00:00.000000Z', '2024-01-01T00:00:00.000000Z')",
        )
        .execute(&repo.pool)
        .await;

        assert!(insert.is_err());
    }

    #[tokio::test]
    async fn test_zero_quantity_violates_schema() {
        let (repo, _dir) = temp_repo().await;
        let mut tx = repo.begin().await.unwrap();
        let mut movement = Movement::new(MovementKind::Initial, "T1", "CABLE", 0, Utc::now());

        assert!(Repository::insert_movement(&mut tx, &mut movement).await.is_err());
    }
}
