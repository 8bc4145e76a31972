use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Quantity;

pub type MovementId = Uuid;

/// Direction of a manual stock correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdjustmentDirection {
    Credit,
    Debit,
}

/// What kind of change a movement represents. The kind alone decides the
/// sign of the movement's contribution to a balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    /// Opening stock when a holder is first loaded
    Initial,
    /// Material handed to the holder (purchase, dispatch from a warehouse)
    TransferIn,
    /// Material used up in the field
    Consumption,
    /// Material handed from this holder to another one
    TransferOut,
    /// Manual correction after a count
    Adjustment(AdjustmentDirection),
}

impl MovementKind {
    pub const ALL: [MovementKind; 6] = [
        MovementKind::Initial,
        MovementKind::TransferIn,
        MovementKind::Consumption,
        MovementKind::TransferOut,
        MovementKind::Adjustment(AdjustmentDirection::Credit),
        MovementKind::Adjustment(AdjustmentDirection::Debit),
    ];

    /// Canonical label, used both in the database and in the CSV contract.
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementKind::Initial => "INITIAL",
            MovementKind::TransferIn => "TRANSFER_IN",
            MovementKind::Consumption => "CONSUMPTION",
            MovementKind::TransferOut => "TRANSFER_OUT",
            MovementKind::Adjustment(AdjustmentDirection::Credit) => "ADJUSTMENT_CREDIT",
            MovementKind::Adjustment(AdjustmentDirection::Debit) => "ADJUSTMENT_DEBIT",
        }
    }

    /// Parse a canonical label or one of the legacy spreadsheet labels.
    pub fn from_label(label: &str) -> Option<Self> {
        let normalized = label.trim().to_uppercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "INITIAL" | "INICIAL" | "STOCK_INICIAL" => Some(MovementKind::Initial),
            "TRANSFER_IN" | "ENTRADA" | "INGRESO" | "ASIGNACION" | "ASIGNACIÓN" => {
                Some(MovementKind::TransferIn)
            }
            "CONSUMPTION" | "SALIDA" | "CONSUMO" => Some(MovementKind::Consumption),
            "TRANSFER_OUT" | "TRASLADO" => Some(MovementKind::TransferOut),
            "ADJUSTMENT_CREDIT" | "AJUSTE+" | "AJUSTE_+" | "AJUSTE_POSITIVO" => {
                Some(MovementKind::Adjustment(AdjustmentDirection::Credit))
            }
            "ADJUSTMENT_DEBIT" | "AJUSTE_" | "AJUSTE__" | "AJUSTE_NEGATIVO" => {
                Some(MovementKind::Adjustment(AdjustmentDirection::Debit))
            }
            _ => None,
        }
    }

    /// Returns true for kinds that take stock away from the holder.
    /// Only these are checked against the available balance.
    pub fn is_debit(&self) -> bool {
        matches!(
            self,
            MovementKind::Consumption
                | MovementKind::TransferOut
                | MovementKind::Adjustment(AdjustmentDirection::Debit)
        )
    }
}

impl std::fmt::Display for MovementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// One signed change to a subject's holding of a material.
/// Movements are immutable - mistakes are fixed with counter-movements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    pub id: MovementId,
    /// Position in the persisted ledger, assigned by the repository
    pub sequence: i64,
    pub kind: MovementKind,
    /// Code of the holder (technician, warehouse, system)
    pub subject: String,
    /// Code of the material or tool
    pub material: String,
    /// Magnitude, always positive; the sign comes from `kind`
    pub quantity: Quantity,
    /// Invoice, work order or acta number
    pub reference: Option<String>,
    /// When the movement happened in the field
    pub timestamp: DateTime<Utc>,
    /// When it was written to the ledger
    pub recorded_at: DateTime<Utc>,
    /// Shared by the two legs of a transfer between holders
    pub transfer_id: Option<Uuid>,
}

impl Movement {
    /// Build a movement. Callers validate the quantity first; see
    /// [`super::validate_quantity`].
    pub fn new(
        kind: MovementKind,
        subject: impl Into<String>,
        material: impl Into<String>,
        quantity: Quantity,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence: 0,
            kind,
            subject: subject.into(),
            material: material.into(),
            quantity,
            reference: None,
            timestamp,
            recorded_at: Utc::now(),
            transfer_id: None,
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        let reference = reference.into();
        self.reference = if reference.trim().is_empty() {
            None
        } else {
            Some(reference)
        };
        self
    }

    pub fn with_transfer(mut self, transfer_id: Uuid) -> Self {
        self.transfer_id = Some(transfer_id);
        self
    }

    /// Returns true if this movement is one side of a holder-to-holder transfer
    pub fn is_transfer_leg(&self) -> bool {
        self.transfer_id.is_some()
    }

    /// Contribution of this movement to its `(subject, material)` balance.
    pub fn signed_quantity(&self) -> Quantity {
        if self.kind.is_debit() {
            -self.quantity
        } else {
            self.quantity
        }
    }

    pub fn key(&self) -> StockKey {
        StockKey::new(&self.subject, &self.material)
    }
}

/// Grouping key of a balance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StockKey {
    pub subject: String,
    pub material: String,
}

impl StockKey {
    pub fn new(subject: impl Into<String>, material: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            material: material.into(),
        }
    }
}
