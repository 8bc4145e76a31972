use std::io::Read;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use csv::StringRecord;
use thiserror::Error;
use tracing::{debug, info};

use crate::application::{ImportRow, ImportSummary, LedgerService, NewMovement};
use crate::domain::{parse_quantity, Ledger, Movement, MovementKind, MAX_QUANTITY};

/// Bulk data that cannot be turned into movements. The whole batch is
/// rejected; nothing is written.
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Malformed import: missing required column '{0}'")]
    MissingColumn(&'static str),

    #[error("Malformed import at line {line}, column '{column}': {reason}")]
    Malformed {
        line: usize,
        column: &'static str,
        reason: String,
    },

    #[error("CSV parse error: {0}")]
    Csv(#[from] csv::Error),
}

/// Layout of the uploaded sheet, detected from its header row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaVersion {
    /// Early stock books: `Fecha,Tipo,Material,Cantidad,Responsable`
    V1StockBook,
    /// `Fecha,Tipo_Movimiento,Operario,Material,Cantidad,Referencia` and aliases
    V2Canonical,
}

/// Options for import operations
#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub dry_run: bool,
    /// Add unknown subject and material codes to the catalogs
    pub auto_register: bool,
    /// Kind used for rows without a `Tipo_Movimiento` column or value
    pub default_kind: MovementKind,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            auto_register: true,
            default_kind: MovementKind::TransferIn,
        }
    }
}

/// Rows parsed from a sheet, ready to be applied.
#[derive(Debug, Clone)]
pub struct ParsedSheet {
    pub schema: SchemaVersion,
    pub rows: Vec<ImportRow>,
}

/// Result of an import operation
#[derive(Debug, Clone)]
pub struct ImportResult {
    pub schema: SchemaVersion,
    pub rows: usize,
    /// `None` on a dry run
    pub summary: Option<ImportSummary>,
}

#[derive(Debug, Clone, Copy)]
struct ColumnMap {
    timestamp: Option<usize>,
    kind: Option<usize>,
    subject: usize,
    material: usize,
    quantity: usize,
    reference: Option<usize>,
    schema: SchemaVersion,
}

impl ColumnMap {
    fn from_headers(headers: &StringRecord) -> Result<Self, ImportError> {
        let normalized: Vec<String> = headers.iter().map(normalize_header).collect();
        let find = |aliases: &[&str]| normalized.iter().position(|h| aliases.contains(&h.as_str()));

        let subject_v2 = find(&["operario", "subject", "tecnico", "técnico", "technician"]);
        let responsable = find(&["responsable"]);
        let schema = if subject_v2.is_none() && responsable.is_some() {
            SchemaVersion::V1StockBook
        } else {
            SchemaVersion::V2Canonical
        };

        Ok(Self {
            timestamp: find(&["fecha", "date", "timestamp"]),
            kind: find(&["tipo_movimiento", "tipo", "kind", "type"]),
            subject: subject_v2
                .or(responsable)
                .ok_or(ImportError::MissingColumn("Operario"))?,
            material: find(&["material", "nombre", "item"])
                .ok_or(ImportError::MissingColumn("Material"))?,
            quantity: find(&["cantidad", "quantity", "qty"])
                .ok_or(ImportError::MissingColumn("Cantidad"))?,
            reference: find(&["referencia", "acta", "reference"]),
            schema,
        })
    }
}

fn normalize_header(header: &str) -> String {
    header
        .trim()
        .trim_start_matches('\u{feff}')
        .to_lowercase()
        .replace([' ', '-'], "_")
}

/// Parse a movement sheet. Every row is validated before anything is
/// returned; the first bad cell fails the whole sheet.
pub fn parse_movements_csv<R: Read>(
    reader: R,
    default_kind: MovementKind,
) -> Result<ParsedSheet, ImportError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let columns = ColumnMap::from_headers(csv_reader.headers()?)?;
    debug!(schema = ?columns.schema, "detected sheet layout");

    let now = Utc::now();
    let mut rows = Vec::new();

    for (index, result) in csv_reader.records().enumerate() {
        let record = result?;
        let line = record
            .position()
            .map(|p| p.line() as usize)
            .unwrap_or(index + 2);

        if record.iter().all(str::is_empty) {
            continue;
        }

        let cell = |i: Option<usize>| i.and_then(|i| record.get(i)).unwrap_or("");
        let malformed = |column: &'static str, reason: String| ImportError::Malformed {
            line,
            column,
            reason,
        };

        let subject = cell(Some(columns.subject));
        if subject.is_empty() {
            return Err(malformed("Operario", "empty subject".to_string()));
        }
        let material = cell(Some(columns.material));
        if material.is_empty() {
            return Err(malformed("Material", "empty material".to_string()));
        }

        let quantity = parse_quantity(cell(Some(columns.quantity)))
            .map_err(|e| malformed("Cantidad", e.to_string()))?;
        if !(1..=MAX_QUANTITY).contains(&quantity) {
            return Err(malformed(
                "Cantidad",
                format!(
                    "quantity must be between 1 and {}, got {}",
                    MAX_QUANTITY, quantity
                ),
            ));
        }

        let kind = match cell(columns.kind) {
            "" => default_kind,
            label => MovementKind::from_label(label)
                .ok_or_else(|| malformed("Tipo_Movimiento", format!("unknown kind '{}'", label)))?,
        };

        let timestamp = match cell(columns.timestamp) {
            "" => now,
            value => parse_timestamp(value).map_err(|e| malformed("Fecha", e.to_string()))?,
        };

        let mut movement = NewMovement::new(kind, subject, material, quantity).at(timestamp);
        let reference = cell(columns.reference);
        if !reference.is_empty() {
            movement = movement.with_reference(reference);
        }

        rows.push(ImportRow { line, movement });
    }

    Ok(ParsedSheet {
        schema: columns.schema,
        rows,
    })
}

/// Rebuild an in-memory ledger from an exported sheet. The history is
/// trusted: balances are not re-checked row by row.
pub fn load_ledger_csv<R: Read>(reader: R) -> Result<Ledger, ImportError> {
    let sheet = parse_movements_csv(reader, MovementKind::TransferIn)?;
    let records = sheet
        .rows
        .into_iter()
        .enumerate()
        .map(|(i, row)| {
            let draft = row.movement;
            let mut movement = Movement::new(
                draft.kind,
                draft.subject,
                draft.material,
                draft.quantity,
                draft.timestamp,
            );
            if let Some(reference) = draft.reference {
                movement = movement.with_reference(reference);
            }
            movement.sequence = i as i64 + 1;
            movement
        })
        .collect();
    Ok(Ledger::from_records(records))
}

/// Importer for loading bulk sheets into the persisted ledger
pub struct Importer<'a> {
    service: &'a LedgerService,
}

impl<'a> Importer<'a> {
    pub fn new(service: &'a LedgerService) -> Self {
        Self { service }
    }

    /// Import movements from CSV, all or nothing.
    pub async fn import_movements_csv<R: Read>(
        &self,
        reader: R,
        options: ImportOptions,
    ) -> Result<ImportResult> {
        let sheet = parse_movements_csv(reader, options.default_kind)?;
        let rows = sheet.rows.len();
        info!(rows, schema = ?sheet.schema, dry_run = options.dry_run, "parsed import sheet");

        if options.dry_run {
            return Ok(ImportResult {
                schema: sheet.schema,
                rows,
                summary: None,
            });
        }

        let summary = self
            .service
            .import_rows(sheet.rows, options.auto_register)
            .await?;

        Ok(ImportResult {
            schema: sheet.schema,
            rows,
            summary: Some(summary),
        })
    }
}

/// Parse the date formats found in exported and hand-made sheets.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(naive.and_utc());
        }
    }

    for format in ["%Y-%m-%d", "%d/%m/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(s, format) {
            return Ok(date.and_time(chrono::NaiveTime::MIN).and_utc());
        }
    }

    anyhow::bail!("Invalid timestamp format: {}", s)
}
