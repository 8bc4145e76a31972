// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use inventario::application::{LedgerService, NewMovement};
use inventario::domain::{MovementKind, Quantity, SubjectKind};
use tempfile::TempDir;

/// Helper to create a test service with a temporary database
pub async fn test_service() -> Result<(LedgerService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let service = LedgerService::init(db_path.to_str().unwrap()).await?;
    Ok((service, temp_dir))
}

/// Helper to parse a date string into DateTime<Utc>
pub fn parse_date(date_str: &str) -> DateTime<Utc> {
    NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        .and_utc()
}

/// Record a movement dated now
pub async fn record(
    service: &LedgerService,
    kind: MovementKind,
    subject: &str,
    material: &str,
    quantity: Quantity,
) -> Result<()> {
    service
        .record_movement(NewMovement::new(kind, subject, material, quantity))
        .await?;
    Ok(())
}

/// Test fixture: a warehouse dispatching to two technicians
pub struct StandardCrew;

impl StandardCrew {
    /// Register BODEGA, TECH1, TECH2 and the CABLE and ROUTER materials
    pub async fn register(service: &LedgerService) -> Result<()> {
        service
            .register_subject("BODEGA", Some("Bodega central".into()), SubjectKind::Warehouse)
            .await?;
        service
            .register_subject("TECH1", Some("Ana".into()), SubjectKind::Technician)
            .await?;
        service
            .register_subject("TECH2", Some("Luis".into()), SubjectKind::Technician)
            .await?;
        service
            .register_material("CABLE", Some("Cable UTP".into()), Some("m".into()))
            .await?;
        service
            .register_material("ROUTER", Some("Router ONT".into()), Some("unit".into()))
            .await?;
        Ok(())
    }

    /// Register the crew and give the warehouse opening stock
    pub async fn stocked(service: &LedgerService, cable: Quantity, routers: Quantity) -> Result<()> {
        Self::register(service).await?;
        record(service, MovementKind::Initial, "BODEGA", "CABLE", cable).await?;
        record(service, MovementKind::Initial, "BODEGA", "ROUTER", routers).await?;
        Ok(())
    }
}
