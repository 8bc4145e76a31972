use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use super::{Movement, MovementKind, Quantity, StockKey, MAX_QUANTITY};

/// Rejections raised before anything is appended to a ledger.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error(
        "Invalid quantity {quantity}: quantities must be whole numbers between 1 and {}",
        MAX_QUANTITY
    )]
    InvalidQuantity { quantity: Quantity },

    #[error(
        "Insufficient stock of {material} held by {subject}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        subject: String,
        material: String,
        requested: Quantity,
        available: Quantity,
    },

    #[error(
        "Balance of {material} held by {subject} would exceed {}: current {current}, adding {requested}",
        MAX_QUANTITY
    )]
    BalanceOverflow {
        subject: String,
        material: String,
        requested: Quantity,
        current: Quantity,
    },
}

/// Compute the balance of one `(subject, material)` key from a list of movements.
/// Balance = sum of credits - sum of debits. Unknown keys yield zero.
pub fn compute_balance(subject: &str, material: &str, movements: &[Movement]) -> Quantity {
    movements
        .iter()
        .filter(|m| m.subject == subject && m.material == material)
        .map(Movement::signed_quantity)
        .fold(0, Quantity::saturating_add)
}

/// Compute balances for every key that appears in the movements.
pub fn compute_all_balances(movements: &[Movement]) -> BTreeMap<StockKey, Quantity> {
    let mut balances: BTreeMap<StockKey, Quantity> = BTreeMap::new();

    for movement in movements {
        let balance = balances.entry(movement.key()).or_insert(0);
        *balance = balance.saturating_add(movement.signed_quantity());
    }

    balances
}

pub fn validate_quantity(quantity: Quantity) -> Result<(), LedgerError> {
    if !(1..=MAX_QUANTITY).contains(&quantity) {
        return Err(LedgerError::InvalidQuantity { quantity });
    }
    Ok(())
}

/// Validate that a debit of `requested` fits in the `available` balance.
pub fn validate_withdrawal(
    subject: &str,
    material: &str,
    requested: Quantity,
    available: Quantity,
) -> Result<(), LedgerError> {
    if requested > available {
        return Err(LedgerError::InsufficientStock {
            subject: subject.to_string(),
            material: material.to_string(),
            requested,
            available,
        });
    }
    Ok(())
}

/// Validate that a credit of `requested` keeps the `current` balance within
/// `MAX_QUANTITY`.
pub fn validate_deposit(
    subject: &str,
    material: &str,
    requested: Quantity,
    current: Quantity,
) -> Result<(), LedgerError> {
    match current.checked_add(requested) {
        Some(balance) if balance <= MAX_QUANTITY => Ok(()),
        _ => Err(LedgerError::BalanceOverflow {
            subject: subject.to_string(),
            material: material.to_string(),
            requested,
            current,
        }),
    }
}

/// Check a movement of `kind` against the balance it would change.
pub fn validate_against_balance(
    kind: MovementKind,
    subject: &str,
    material: &str,
    quantity: Quantity,
    balance: Quantity,
) -> Result<(), LedgerError> {
    if kind.is_debit() {
        validate_withdrawal(subject, material, quantity, balance)
    } else {
        validate_deposit(subject, material, quantity, balance)
    }
}

/// In-memory append-only ledger owned by one session.
///
/// Balances are never stored: every query folds over the records. Writes
/// take `&mut self`, so a ledger has a single writer at a time; share one
/// behind [`crate::application::LedgerService`] when several callers need it.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    records: Vec<Movement>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore a ledger from persisted history. Records are trusted as-is;
    /// they were validated when first appended.
    pub fn from_records(records: Vec<Movement>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[Movement] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn current_balance(&self, subject: &str, material: &str) -> Quantity {
        compute_balance(subject, material, &self.records)
    }

    pub fn current_balances(&self) -> BTreeMap<StockKey, Quantity> {
        compute_all_balances(&self.records)
    }

    /// Validate and append one movement. On error the ledger is untouched.
    pub fn record_movement(
        &mut self,
        kind: MovementKind,
        subject: &str,
        material: &str,
        quantity: Quantity,
        reference: Option<&str>,
        timestamp: DateTime<Utc>,
    ) -> Result<&Movement, LedgerError> {
        validate_quantity(quantity)?;
        let balance = self.current_balance(subject, material);
        validate_against_balance(kind, subject, material, quantity, balance)?;

        let movement = self.build(kind, subject, material, quantity, reference, timestamp);
        self.records.push(movement);
        Ok(&self.records[self.records.len() - 1])
    }

    /// Move stock between two holders. Appends a transfer-out against
    /// `from` and a transfer-in for `to`, or nothing at all.
    pub fn transfer(
        &mut self,
        material: &str,
        quantity: Quantity,
        from: &str,
        to: &str,
        reference: Option<&str>,
        timestamp: DateTime<Utc>,
    ) -> Result<(Movement, Movement), LedgerError> {
        validate_quantity(quantity)?;
        let available = self.current_balance(from, material);
        validate_withdrawal(from, material, quantity, available)?;
        if from != to {
            let current = self.current_balance(to, material);
            validate_deposit(to, material, quantity, current)?;
        }

        let transfer_id = Uuid::new_v4();
        let debit = self
            .build(MovementKind::TransferOut, from, material, quantity, reference, timestamp)
            .with_transfer(transfer_id);
        self.records.push(debit.clone());

        let credit = self
            .build(MovementKind::TransferIn, to, material, quantity, reference, timestamp)
            .with_transfer(transfer_id);

        self.records.push(credit.clone());
        Ok((debit, credit))
    }

    fn build(
        &self,
        kind: MovementKind,
        subject: &str,
        material: &str,
        quantity: Quantity,
        reference: Option<&str>,
        timestamp: DateTime<Utc>,
    ) -> Movement {
        let mut movement = Movement::new(kind, subject, material, quantity, timestamp);
        if let Some(reference) = reference {
            movement = movement.with_reference(reference);
        }
        movement.sequence = self.records.len() as i64 + 1;
        movement
    }
}
