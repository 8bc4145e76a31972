use std::collections::BTreeMap;
use std::io::Write;

use anyhow::Result;
use chrono::SecondsFormat;

use crate::application::{BalanceEntry, LedgerService};
use crate::domain::{Movement, Quantity, StockKey};

/// Column order of the durable ledger sheet.
pub const LEDGER_HEADERS: [&str; 6] = [
    "Fecha",
    "Tipo_Movimiento",
    "Operario",
    "Material",
    "Cantidad",
    "Referencia",
];

/// Column order of the balances summary sheet.
pub const BALANCE_HEADERS: [&str; 3] = ["Operario", "Material", "Saldo"];

/// Write movements in the ledger sheet layout.
pub fn write_movements_csv<W: Write>(writer: W, movements: &[Movement]) -> Result<usize> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record(LEDGER_HEADERS)?;

    for movement in movements {
        csv_writer.write_record([
            movement
                .timestamp
                .to_rfc3339_opts(SecondsFormat::AutoSi, true)
                .as_str(),
            movement.kind.as_str(),
            movement.subject.as_str(),
            movement.material.as_str(),
            movement.quantity.to_string().as_str(),
            movement.reference.as_deref().unwrap_or_default(),
        ])?;
    }

    csv_writer.flush()?;
    Ok(movements.len())
}

/// Write computed balances, one row per `(subject, material)` key.
pub fn write_balances_csv<W: Write>(writer: W, balances: &[BalanceEntry]) -> Result<usize> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record(BALANCE_HEADERS)?;

    for entry in balances {
        csv_writer.write_record([
            entry.subject.as_str(),
            entry.material.as_str(),
            entry.quantity.to_string().as_str(),
        ])?;
    }

    csv_writer.flush()?;
    Ok(balances.len())
}

/// Flatten an in-memory balance map into summary rows.
pub fn balance_entries(balances: &BTreeMap<StockKey, Quantity>) -> Vec<BalanceEntry> {
    balances
        .iter()
        .map(|(key, quantity)| BalanceEntry {
            subject: key.subject.clone(),
            material: key.material.clone(),
            quantity: *quantity,
        })
        .collect()
}

/// Exporter for writing the persisted ledger to sheets
pub struct Exporter<'a> {
    service: &'a LedgerService,
}

impl<'a> Exporter<'a> {
    pub fn new(service: &'a LedgerService) -> Self {
        Self { service }
    }

    /// Export every movement in sequence order
    pub async fn export_movements_csv<W: Write>(&self, writer: W) -> Result<usize> {
        let movements = self.service.list_all_movements().await?;
        write_movements_csv(writer, &movements)
    }

    /// Export the computed balances summary
    pub async fn export_balances_csv<W: Write>(&self, writer: W) -> Result<usize> {
        let balances = self.service.current_balances().await?;
        write_balances_csv(writer, &balances)
    }
}
