use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Movement, MovementKind, Quantity};

/// Materials ranked by how much was consumed in the field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumptionReport {
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub subject: Option<String>,
    pub materials: Vec<MaterialConsumption>,
    /// Total over every material, including those cut by `top`
    pub total: Quantity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaterialConsumption {
    pub material: String,
    pub total: Quantity,
    pub count: i64,
    pub percentage: f64,
}

/// Build a consumption ranking from already-filtered movements.
///
/// Only consumption movements count. Transfers debit the sender with
/// `TRANSFER_OUT`, so a warehouse dispatch is never usage.
pub fn build_consumption_report(
    movements: &[Movement],
    from_date: Option<DateTime<Utc>>,
    to_date: Option<DateTime<Utc>>,
    subject: Option<String>,
    top: Option<usize>,
) -> ConsumptionReport {
    let mut aggregates: HashMap<&str, (Quantity, i64)> = HashMap::new();

    for movement in movements
        .iter()
        .filter(|m| m.kind == MovementKind::Consumption)
    {
        let entry = aggregates.entry(movement.material.as_str()).or_insert((0, 0));
        entry.0 += movement.quantity;
        entry.1 += 1;
    }

    let total: Quantity = aggregates.values().map(|(qty, _)| qty).sum();

    let mut materials: Vec<MaterialConsumption> = aggregates
        .into_iter()
        .map(|(material, (qty, count))| MaterialConsumption {
            material: material.to_string(),
            total: qty,
            count,
            percentage: if total > 0 {
                (qty as f64 / total as f64) * 100.0
            } else {
                0.0
            },
        })
        .collect();

    // Highest consumption first; ties broken by code for stable output
    materials.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.material.cmp(&b.material)));

    if let Some(top) = top {
        materials.truncate(top);
    }

    ConsumptionReport {
        from_date,
        to_date,
        subject,
        materials,
        total,
    }
}
