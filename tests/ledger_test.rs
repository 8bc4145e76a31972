mod common;

use std::sync::Arc;

use anyhow::Result;
use common::{parse_date, record, test_service, StandardCrew};
use inventario::application::{AppError, LedgerService, MovementFilter, NewMovement, NewTransfer};
use inventario::domain::{AdjustmentDirection, LedgerError, MovementKind, MAX_QUANTITY};
use tempfile::TempDir;

#[tokio::test]
async fn test_initial_then_consumption() -> Result<()> {
    let (service, _temp) = test_service().await?;

    record(&service, MovementKind::Initial, "TECH1", "CABLE", 100).await?;
    let movement = service
        .record_movement(
            NewMovement::new(MovementKind::Consumption, "TECH1", "CABLE", 30)
                .with_reference("ACTA-0001"),
        )
        .await?;

    assert_eq!(movement.sequence, 2);
    assert_eq!(movement.reference.as_deref(), Some("ACTA-0001"));
    assert_eq!(service.current_balance("TECH1", "CABLE").await?, 70);

    Ok(())
}

#[tokio::test]
async fn test_overdraw_is_rejected_and_nothing_is_written() -> Result<()> {
    let (service, _temp) = test_service().await?;

    record(&service, MovementKind::Initial, "TECH1", "CABLE", 100).await?;
    record(&service, MovementKind::Consumption, "TECH1", "CABLE", 30).await?;

    let err = service
        .record_movement(NewMovement::new(MovementKind::Consumption, "TECH1", "CABLE", 1000))
        .await
        .unwrap_err();

    match err {
        AppError::Ledger(LedgerError::InsufficientStock {
            requested,
            available,
            ..
        }) => {
            assert_eq!(requested, 1000);
            assert_eq!(available, 70);
        }
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(service.count_movements().await?, 2);
    assert_eq!(service.current_balance("TECH1", "CABLE").await?, 70);

    Ok(())
}

#[tokio::test]
async fn test_non_positive_quantity_is_rejected() -> Result<()> {
    let (service, _temp) = test_service().await?;

    for quantity in [0, -5] {
        let err = service
            .record_movement(NewMovement::new(MovementKind::Initial, "TECH1", "CABLE", quantity))
            .await
            .unwrap_err();
        assert!(matches!(
            err.ledger_error(),
            Some(LedgerError::InvalidQuantity { .. })
        ));
    }

    assert_eq!(service.count_movements().await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_withdrawing_exact_balance_leaves_zero() -> Result<()> {
    let (service, _temp) = test_service().await?;

    record(&service, MovementKind::Initial, "TECH1", "ROUTER", 3).await?;
    record(&service, MovementKind::Consumption, "TECH1", "ROUTER", 3).await?;

    assert_eq!(service.current_balance("TECH1", "ROUTER").await?, 0);

    let err = service
        .record_movement(NewMovement::new(MovementKind::Consumption, "TECH1", "ROUTER", 1))
        .await
        .unwrap_err();
    assert!(err.ledger_error().is_some());

    Ok(())
}

#[tokio::test]
async fn test_adjustments() -> Result<()> {
    let (service, _temp) = test_service().await?;

    record(&service, MovementKind::Initial, "TECH1", "CABLE", 10).await?;
    record(
        &service,
        MovementKind::Adjustment(AdjustmentDirection::Credit),
        "TECH1",
        "CABLE",
        5,
    )
    .await?;
    record(
        &service,
        MovementKind::Adjustment(AdjustmentDirection::Debit),
        "TECH1",
        "CABLE",
        12,
    )
    .await?;

    assert_eq!(service.current_balance("TECH1", "CABLE").await?, 3);

    let err = service
        .record_movement(NewMovement::new(
            MovementKind::Adjustment(AdjustmentDirection::Debit),
            "TECH1",
            "CABLE",
            4,
        ))
        .await
        .unwrap_err();
    assert!(matches!(
        err.ledger_error(),
        Some(LedgerError::InsufficientStock { available: 3, .. })
    ));

    Ok(())
}

#[tokio::test]
async fn test_unknown_key_has_zero_balance() -> Result<()> {
    let (service, _temp) = test_service().await?;

    assert_eq!(service.current_balance("NOBODY", "NOTHING").await?, 0);
    assert!(service.current_balances().await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_codes_are_trimmed() -> Result<()> {
    let (service, _temp) = test_service().await?;

    record(&service, MovementKind::Initial, "  TECH1 ", " CABLE", 4).await?;
    assert_eq!(service.current_balance("TECH1", "CABLE").await?, 4);
    assert_eq!(service.current_balance(" TECH1", "CABLE ").await?, 4);

    let holdings = service.subject_holdings(" TECH1 ").await?;
    assert_eq!(holdings.len(), 1);
    assert_eq!(holdings[0].quantity, 4);

    let listed = service
        .list_movements(&MovementFilter {
            subject: Some(" TECH1".into()),
            ..Default::default()
        })
        .await?;
    assert_eq!(listed.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_oversized_quantity_is_rejected() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let err = service
        .record_movement(NewMovement::new(MovementKind::Initial, "TECH1", "CABLE", i64::MAX))
        .await
        .unwrap_err();
    assert!(matches!(
        err.ledger_error(),
        Some(LedgerError::InvalidQuantity { quantity: i64::MAX })
    ));
    assert_eq!(service.count_movements().await?, 0);

    Ok(())
}

#[tokio::test]
async fn test_credit_past_ceiling_keeps_ledger_readable() -> Result<()> {
    let (service, _temp) = test_service().await?;
    record(&service, MovementKind::Initial, "TECH1", "CABLE", MAX_QUANTITY).await?;

    let err = service
        .record_movement(NewMovement::new(MovementKind::Initial, "TECH1", "CABLE", 1))
        .await
        .unwrap_err();
    match err {
        AppError::Ledger(LedgerError::BalanceOverflow {
            requested, current, ..
        }) => {
            assert_eq!(requested, 1);
            assert_eq!(current, MAX_QUANTITY);
        }
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(service.count_movements().await?, 1);
    assert_eq!(service.current_balance("TECH1", "CABLE").await?, MAX_QUANTITY);
    assert_eq!(service.current_balances().await?.len(), 1);

    // Spending some stock makes room again
    record(&service, MovementKind::Consumption, "TECH1", "CABLE", 10).await?;
    record(&service, MovementKind::TransferIn, "TECH1", "CABLE", 10).await?;
    assert_eq!(service.current_balance("TECH1", "CABLE").await?, MAX_QUANTITY);

    Ok(())
}

#[tokio::test]
async fn test_transfer_into_full_holder_writes_nothing() -> Result<()> {
    let (service, _temp) = test_service().await?;
    record(&service, MovementKind::Initial, "BODEGA", "CABLE", 100).await?;
    record(&service, MovementKind::Initial, "TECH1", "CABLE", MAX_QUANTITY).await?;

    let err = service
        .transfer(NewTransfer {
            material: "CABLE".into(),
            quantity: 1,
            from_subject: "BODEGA".into(),
            to_subject: "TECH1".into(),
            reference: None,
            timestamp: parse_date("2024-03-01"),
        })
        .await
        .unwrap_err();

    assert!(matches!(
        err.ledger_error(),
        Some(LedgerError::BalanceOverflow { .. })
    ));
    assert_eq!(service.count_movements().await?, 2);
    assert_eq!(service.current_balance("BODEGA", "CABLE").await?, 100);

    Ok(())
}

#[tokio::test]
async fn test_transfer_moves_stock() -> Result<()> {
    let (service, _temp) = test_service().await?;
    StandardCrew::stocked(&service, 500, 10).await?;

    let result = service
        .transfer(NewTransfer {
            material: "ROUTER".into(),
            quantity: 4,
            from_subject: "BODEGA".into(),
            to_subject: "TECH1".into(),
            reference: Some("GUIA-77".into()),
            timestamp: parse_date("2024-03-01"),
        })
        .await?;

    assert_eq!(result.debit.kind, MovementKind::TransferOut);
    assert_eq!(result.credit.kind, MovementKind::TransferIn);
    assert_eq!(result.debit.transfer_id, result.credit.transfer_id);
    assert!(result.debit.is_transfer_leg());
    assert_eq!(result.credit.sequence, result.debit.sequence + 1);
    assert_eq!(result.credit.reference.as_deref(), Some("GUIA-77"));

    assert_eq!(service.current_balance("BODEGA", "ROUTER").await?, 6);
    assert_eq!(service.current_balance("TECH1", "ROUTER").await?, 4);

    Ok(())
}

#[tokio::test]
async fn test_failed_transfer_writes_neither_leg() -> Result<()> {
    let (service, _temp) = test_service().await?;
    StandardCrew::stocked(&service, 500, 10).await?;
    let before = service.count_movements().await?;

    let err = service
        .transfer(NewTransfer {
            material: "ROUTER".into(),
            quantity: 11,
            from_subject: "BODEGA".into(),
            to_subject: "TECH1".into(),
            reference: None,
            timestamp: parse_date("2024-03-01"),
        })
        .await
        .unwrap_err();

    assert!(matches!(
        err.ledger_error(),
        Some(LedgerError::InsufficientStock { available: 10, .. })
    ));
    assert_eq!(service.count_movements().await?, before);
    assert_eq!(service.current_balance("TECH1", "ROUTER").await?, 0);

    Ok(())
}

#[tokio::test]
async fn test_concurrent_withdrawals_cannot_both_pass() -> Result<()> {
    let (service, _temp) = test_service().await?;
    record(&service, MovementKind::Initial, "TECH1", "CABLE", 100).await?;

    let service = Arc::new(service);
    let withdraw = |service: Arc<LedgerService>| async move {
        service
            .record_movement(NewMovement::new(MovementKind::Consumption, "TECH1", "CABLE", 70))
            .await
    };

    let (first, second) = tokio::join!(
        tokio::spawn(withdraw(Arc::clone(&service))),
        tokio::spawn(withdraw(Arc::clone(&service)))
    );
    let outcomes = [first?, second?];

    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(service.current_balance("TECH1", "CABLE").await?, 30);

    Ok(())
}

#[tokio::test]
async fn test_persisted_ledger_matches_in_memory_replay() -> Result<()> {
    let (service, _temp) = test_service().await?;
    StandardCrew::stocked(&service, 500, 10).await?;
    record(&service, MovementKind::TransferIn, "TECH2", "CABLE", 40).await?;
    record(&service, MovementKind::Consumption, "TECH2", "CABLE", 15).await?;

    let ledger = service.load_ledger().await?;
    let sequences: Vec<i64> = ledger.records().iter().map(|m| m.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3, 4]);

    let persisted = service.current_balances().await?;
    let replayed = ledger.current_balances();
    assert_eq!(persisted.len(), replayed.len());
    for entry in persisted {
        assert_eq!(
            replayed.get(&inventario::StockKey::new(&entry.subject, &entry.material)),
            Some(&entry.quantity)
        );
    }

    Ok(())
}

#[tokio::test]
async fn test_filter_movements() -> Result<()> {
    let (service, _temp) = test_service().await?;

    service
        .record_movement(
            NewMovement::new(MovementKind::Initial, "TECH1", "CABLE", 100).at(parse_date("2024-01-10")),
        )
        .await?;
    service
        .record_movement(
            NewMovement::new(MovementKind::Consumption, "TECH1", "CABLE", 20)
                .at(parse_date("2024-02-10")),
        )
        .await?;
    service
        .record_movement(
            NewMovement::new(MovementKind::Initial, "TECH2", "ROUTER", 2).at(parse_date("2024-02-15")),
        )
        .await?;

    let by_subject = service
        .list_movements(&MovementFilter {
            subject: Some("TECH1".into()),
            ..Default::default()
        })
        .await?;
    assert_eq!(by_subject.len(), 2);

    let february = service
        .list_movements(&MovementFilter {
            from_date: Some(parse_date("2024-02-01")),
            to_date: Some(parse_date("2024-02-28")),
            ..Default::default()
        })
        .await?;
    assert_eq!(february.len(), 2);

    let consumption = service
        .list_movements(&MovementFilter {
            kind: Some(MovementKind::Consumption),
            ..Default::default()
        })
        .await?;
    assert_eq!(consumption.len(), 1);
    assert_eq!(consumption[0].quantity, 20);

    Ok(())
}

#[tokio::test]
async fn test_ledger_survives_reopen() -> Result<()> {
    let temp = TempDir::new()?;
    let path = temp.path().join("stock.db");
    let path = path.to_str().unwrap();

    {
        let service = LedgerService::init(path).await?;
        record(&service, MovementKind::Initial, "TECH1", "CABLE", 100).await?;
        record(&service, MovementKind::Consumption, "TECH1", "CABLE", 25).await?;
    }

    let service = LedgerService::connect(path).await?;
    assert_eq!(service.current_balance("TECH1", "CABLE").await?, 75);

    let next = service
        .record_movement(NewMovement::new(MovementKind::Initial, "TECH1", "CABLE", 1))
        .await?;
    assert_eq!(next.sequence, 3);

    Ok(())
}
