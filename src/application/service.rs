use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{
    normalize_code, validate_against_balance, validate_deposit, validate_quantity,
    validate_withdrawal, Ledger, Material,
    Movement, MovementKind, Quantity, StockKey, Subject, SubjectKind,
};
use crate::storage::{MovementQuery, Repository};

use super::{build_consumption_report, AppError, ConsumptionReport};

/// Application service over the persisted ledger.
/// This is the primary interface for any client (CLI, API, TUI, etc.).
///
/// Writes are serialized: the sufficiency check and the append of a
/// movement run under one lock and inside one transaction, so concurrent
/// withdrawals against the same stock cannot both pass the check.
pub struct LedgerService {
    repo: Repository,
    write_lock: Mutex<()>,
}

/// A movement to be appended
#[derive(Debug, Clone)]
pub struct NewMovement {
    pub kind: MovementKind,
    pub subject: String,
    pub material: String,
    pub quantity: Quantity,
    pub reference: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl NewMovement {
    pub fn new(
        kind: MovementKind,
        subject: impl Into<String>,
        material: impl Into<String>,
        quantity: Quantity,
    ) -> Self {
        Self {
            kind,
            subject: subject.into(),
            material: material.into(),
            quantity,
            reference: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    fn into_movement(self) -> Movement {
        let movement = Movement::new(
            self.kind,
            normalize_code(&self.subject),
            normalize_code(&self.material),
            self.quantity,
            self.timestamp,
        );
        match self.reference {
            Some(reference) => movement.with_reference(reference),
            None => movement,
        }
    }
}

/// A stock move from one holder to another
#[derive(Debug, Clone)]
pub struct NewTransfer {
    pub material: String,
    pub quantity: Quantity,
    pub from_subject: String,
    pub to_subject: String,
    pub reference: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Result of a transfer: the debit against the source and the credit for the destination
#[derive(Debug, Clone)]
pub struct TransferResult {
    pub debit: Movement,
    pub credit: Movement,
}

/// One row of a bulk import, with the source line for error reporting
#[derive(Debug, Clone)]
pub struct ImportRow {
    pub line: usize,
    pub movement: NewMovement,
}

/// Outcome of a committed bulk import
#[derive(Debug, Clone, Default)]
pub struct ImportSummary {
    pub imported: usize,
    pub registered_subjects: Vec<String>,
    pub registered_materials: Vec<String>,
}

/// Balance of one `(subject, material)` key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceEntry {
    pub subject: String,
    pub material: String,
    pub quantity: Quantity,
}

/// Filter for querying movements
#[derive(Debug, Clone, Default)]
pub struct MovementFilter {
    pub subject: Option<String>,
    pub material: Option<String>,
    pub kind: Option<MovementKind>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl MovementFilter {
    fn as_query(&self) -> MovementQuery<'_> {
        MovementQuery {
            subject: self.subject.as_deref().map(str::trim),
            material: self.material.as_deref().map(str::trim),
            kind: self.kind,
            from_date: self.from_date,
            to_date: self.to_date,
            limit: self.limit,
        }
    }
}

impl LedgerService {
    /// Create a new ledger service with the given repository.
    pub fn new(repo: Repository) -> Self {
        Self {
            repo,
            write_lock: Mutex::new(()),
        }
    }

    /// Initialize a database at the given path, creating it if needed.
    pub async fn init(database_path: &str) -> Result<Self, AppError> {
        let db_url = format!("sqlite:{}?mode=rwc", database_path);
        let repo = Repository::init(&db_url).await?;
        Ok(Self::new(repo))
    }

    /// Connect to an existing database, applying any pending migrations.
    pub async fn connect(database_path: &str) -> Result<Self, AppError> {
        let db_url = format!("sqlite:{}", database_path);
        let repo = Repository::connect(&db_url).await?;
        repo.migrate().await?;
        Ok(Self::new(repo))
    }

    // ========================
    // Catalog operations
    // ========================

    /// Register a holder under a unique code.
    pub async fn register_subject(
        &self,
        code: &str,
        name: Option<String>,
        kind: SubjectKind,
    ) -> Result<Subject, AppError> {
        let code = checked_code(code)?;
        if self.repo.get_subject_by_code(&code).await?.is_some() {
            return Err(AppError::SubjectAlreadyExists(code));
        }

        let subject = Subject::new(code.clone(), name.unwrap_or(code), kind);
        self.repo.save_subject(&subject).await?;
        info!(code = %subject.code, kind = %subject.kind, "registered subject");
        Ok(subject)
    }

    pub async fn get_subject(&self, code: &str) -> Result<Subject, AppError> {
        let code = normalize_code(code);
        self.repo
            .get_subject_by_code(&code)
            .await?
            .ok_or_else(|| AppError::SubjectNotFound(code.clone()))
    }

    pub async fn list_subjects(&self) -> Result<Vec<Subject>, AppError> {
        Ok(self.repo.list_subjects().await?)
    }

    /// Register a material or tool under a unique code.
    pub async fn register_material(
        &self,
        code: &str,
        name: Option<String>,
        unit: Option<String>,
    ) -> Result<Material, AppError> {
        let code = checked_code(code)?;
        if self.repo.get_material_by_code(&code).await?.is_some() {
            return Err(AppError::MaterialAlreadyExists(code));
        }

        let mut material = Material::new(code.clone(), name.unwrap_or(code));
        if let Some(unit) = unit {
            material = material.with_unit(unit);
        }
        self.repo.save_material(&material).await?;
        info!(code = %material.code, "registered material");
        Ok(material)
    }

    pub async fn get_material(&self, code: &str) -> Result<Material, AppError> {
        let code = normalize_code(code);
        self.repo
            .get_material_by_code(&code)
            .await?
            .ok_or_else(|| AppError::MaterialNotFound(code.clone()))
    }

    pub async fn list_materials(&self) -> Result<Vec<Material>, AppError> {
        Ok(self.repo.list_materials().await?)
    }

    // ========================
    // Balance operations
    // ========================

    /// Balance of one key; zero when nothing was ever recorded for it.
    pub async fn current_balance(&self, subject: &str, material: &str) -> Result<Quantity, AppError> {
        Ok(self
            .repo
            .compute_balance(&normalize_code(subject), &normalize_code(material))
            .await?)
    }

    /// Balances of every key that has movements, ordered by subject then material.
    pub async fn current_balances(&self) -> Result<Vec<BalanceEntry>, AppError> {
        let balances = self.repo.compute_all_balances().await?;
        Ok(balances
            .into_iter()
            .map(|(StockKey { subject, material }, quantity)| BalanceEntry {
                subject,
                material,
                quantity,
            })
            .collect())
    }

    /// Everything a holder currently carries, skipping exhausted materials.
    pub async fn subject_holdings(&self, subject: &str) -> Result<Vec<BalanceEntry>, AppError> {
        let subject = normalize_code(subject);
        Ok(self
            .current_balances()
            .await?
            .into_iter()
            .filter(|entry| entry.subject == subject && entry.quantity != 0)
            .collect())
    }

    // ========================
    // Movement operations
    // ========================

    /// Validate and append one movement.
    pub async fn record_movement(&self, request: NewMovement) -> Result<Movement, AppError> {
        validate_quantity(request.quantity)
            .inspect_err(|e| warn!(error = %e, "rejected movement"))?;
        let mut movement = request.into_movement();

        let _guard = self.write_lock.lock().await;
        let mut tx = self.repo.begin().await?;

        let balance =
            Repository::balance_on(&mut tx, &movement.subject, &movement.material).await?;
        validate_against_balance(
            movement.kind,
            &movement.subject,
            &movement.material,
            movement.quantity,
            balance,
        )
        .inspect_err(|e| warn!(error = %e, "rejected movement"))?;

        Repository::insert_movement(&mut tx, &mut movement).await?;
        tx.commit().await?;

        info!(
            sequence = movement.sequence,
            kind = %movement.kind,
            subject = %movement.subject,
            material = %movement.material,
            quantity = movement.quantity,
            "recorded movement"
        );
        Ok(movement)
    }

    /// Move stock between holders: both records are committed or neither.
    pub async fn transfer(&self, request: NewTransfer) -> Result<TransferResult, AppError> {
        validate_quantity(request.quantity)?;
        let material = normalize_code(&request.material);
        let from = normalize_code(&request.from_subject);
        let to = normalize_code(&request.to_subject);

        let _guard = self.write_lock.lock().await;
        let mut tx = self.repo.begin().await?;

        let available = Repository::balance_on(&mut tx, &from, &material).await?;
        validate_withdrawal(&from, &material, request.quantity, available)
            .inspect_err(|e| warn!(error = %e, "rejected transfer"))?;
        if from != to {
            let current = Repository::balance_on(&mut tx, &to, &material).await?;
            validate_deposit(&to, &material, request.quantity, current)
                .inspect_err(|e| warn!(error = %e, "rejected transfer"))?;
        }

        let mut debit = Movement::new(
            MovementKind::TransferOut,
            from,
            material.clone(),
            request.quantity,
            request.timestamp,
        );
        let mut credit = Movement::new(
            MovementKind::TransferIn,
            to,
            material,
            request.quantity,
            request.timestamp,
        );
        let transfer_id = Uuid::new_v4();
        debit = debit.with_transfer(transfer_id);
        credit = credit.with_transfer(transfer_id);
        if let Some(reference) = request.reference {
            debit = debit.with_reference(reference.clone());
            credit = credit.with_reference(reference);
        }

        Repository::insert_movement(&mut tx, &mut debit).await?;
        Repository::insert_movement(&mut tx, &mut credit).await?;
        tx.commit().await?;

        info!(
            material = %debit.material,
            quantity = debit.quantity,
            from = %debit.subject,
            to = %credit.subject,
            "recorded transfer"
        );
        Ok(TransferResult { debit, credit })
    }

    /// Append a bulk import in one transaction. Rows are applied in order,
    /// so a consumption row may draw on stock credited earlier in the batch.
    /// Any rejected row rolls back the whole batch.
    pub async fn import_rows(
        &self,
        rows: Vec<ImportRow>,
        auto_register: bool,
    ) -> Result<ImportSummary, AppError> {
        let mut summary = ImportSummary::default();

        let _guard = self.write_lock.lock().await;
        let mut tx = self.repo.begin().await?;

        for row in rows {
            let line = row.line;
            validate_quantity(row.movement.quantity)
                .map_err(|source| AppError::ImportRejected { line, source })?;
            let mut movement = row.movement.into_movement();

            if auto_register {
                if Repository::find_subject(&mut tx, &movement.subject).await?.is_none() {
                    let subject = Subject::new(
                        movement.subject.clone(),
                        movement.subject.clone(),
                        SubjectKind::Technician,
                    );
                    Repository::insert_subject(&mut tx, &subject).await?;
                    summary.registered_subjects.push(subject.code);
                }
                if Repository::find_material(&mut tx, &movement.material).await?.is_none() {
                    let material =
                        Material::new(movement.material.clone(), movement.material.clone());
                    Repository::insert_material(&mut tx, &material).await?;
                    summary.registered_materials.push(material.code);
                }
            }

            let balance =
                Repository::balance_on(&mut tx, &movement.subject, &movement.material).await?;
            validate_against_balance(
                movement.kind,
                &movement.subject,
                &movement.material,
                movement.quantity,
                balance,
            )
            .map_err(|source| {
                warn!(line, error = %source, "import rejected");
                AppError::ImportRejected { line, source }
            })?;

            Repository::insert_movement(&mut tx, &mut movement).await?;
            debug!(line, sequence = movement.sequence, "imported row");
            summary.imported += 1;
        }

        tx.commit().await?;
        info!(
            imported = summary.imported,
            subjects = summary.registered_subjects.len(),
            materials = summary.registered_materials.len(),
            "import committed"
        );
        Ok(summary)
    }

    /// List movements, optionally filtered.
    pub async fn list_movements(&self, filter: &MovementFilter) -> Result<Vec<Movement>, AppError> {
        Ok(self.repo.list_movements_filtered(&filter.as_query()).await?)
    }

    /// List all movements, ordered by sequence.
    pub async fn list_all_movements(&self) -> Result<Vec<Movement>, AppError> {
        Ok(self.repo.list_movements().await?)
    }

    pub async fn count_movements(&self) -> Result<i64, AppError> {
        Ok(self.repo.count_movements().await?)
    }

    /// Rebuild an in-memory ledger from the persisted sequence.
    pub async fn load_ledger(&self) -> Result<Ledger, AppError> {
        Ok(Ledger::from_records(self.repo.list_movements().await?))
    }

    // ========================
    // Reports
    // ========================

    /// Rank materials by consumed quantity over the filtered movements.
    pub async fn consumption_report(
        &self,
        filter: &MovementFilter,
        top: Option<usize>,
    ) -> Result<ConsumptionReport, AppError> {
        let query = MovementQuery {
            kind: Some(MovementKind::Consumption),
            limit: None,
            ..filter.as_query()
        };
        let movements = self.repo.list_movements_filtered(&query).await?;
        Ok(build_consumption_report(
            &movements,
            filter.from_date,
            filter.to_date,
            filter.subject.clone(),
            top,
        ))
    }
}

fn checked_code(code: &str) -> Result<String, AppError> {
    let code = normalize_code(code);
    if code.is_empty() {
        return Err(AppError::EmptyCode);
    }
    Ok(code)
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(err.into())
    }
}
