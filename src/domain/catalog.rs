use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type SubjectId = Uuid;
pub type MaterialId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectKind {
    /// Field technician or operator carrying stock
    Technician,
    /// Storage location that dispatches to technicians
    Warehouse,
    /// Bookkeeping holder for opening balances and corrections
    System,
}

impl SubjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectKind::Technician => "technician",
            SubjectKind::Warehouse => "warehouse",
            SubjectKind::System => "system",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "technician" | "tecnico" | "operario" => Some(SubjectKind::Technician),
            "warehouse" | "bodega" | "almacen" => Some(SubjectKind::Warehouse),
            "system" | "sistema" => Some(SubjectKind::System),
            _ => None,
        }
    }
}

impl std::fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// A holder of inventory, identified by a unique code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: SubjectId,
    pub code: String,
    pub name: String,
    pub kind: SubjectKind,
    pub created_at: DateTime<Utc>,
}

impl Subject {
    pub fn new(code: impl Into<String>, name: impl Into<String>, kind: SubjectKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            code: normalize_code(&code.into()),
            name: name.into(),
            kind,
            created_at: Utc::now(),
        }
    }
}

/// A tracked material or tool, identified by a unique code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Material {
    pub id: MaterialId,
    pub code: String,
    pub name: String,
    /// Unit of measure shown next to quantities ("m", "unit", "box")
    pub unit: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Material {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            code: normalize_code(&code.into()),
            name: name.into(),
            unit: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }
}

/// Catalog codes are compared exactly, so strip the whitespace that
/// spreadsheet cells tend to carry.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_string()
}
