use anyhow::Context;
use kasbon::activity::{ActivityLog, ActivitySink, ActivityType};
use kasbon::approval::StepStatus;
use kasbon::config::{DepartmentConfig, KasbonConfig};
use kasbon::kasbon::{KasbonDraft, KasbonItem, KasbonStatus, KasbonType};
use kasbon::matrix::MatrixConfig;
use kasbon::resolver::RequesterContext;
use kasbon::slot_request::SlotStatus;
use kasbon::types::TimeStamp;
use kasbon::{KasbonError, KasbonService, ValidationError};
use sled::open;
use std::sync::Arc;
use tempfile::{TempDir, tempdir};

// Sled holds a file lock per database, so every test opens its own under a
// temp dir. The TempDir is returned so it outlives the service.
fn open_service(name: &str) -> anyhow::Result<(TempDir, Arc<sled::Db>, KasbonService)> {
    let temp_dir = tempdir()?;
    let db = Arc::new(open(temp_dir.path().join(name))?);
    let service = KasbonService::new(db.clone(), &config())?;
    Ok((temp_dir, db, service))
}

fn config() -> KasbonConfig {
    let mut config = KasbonConfig::default();
    config.departments.push(DepartmentConfig {
        dept_id: "IT".into(),
        dept_name: "IT Operation".into(),
        max_slots: 2,
        outstanding_limit: 0,
    });
    config
}

fn requester() -> RequesterContext {
    RequesterContext::new("Fahmi Ilmawan", "IT Operation")
        .with_superior("Raymond Tjahja", true)
        .with_division_head("Hendra")
}

fn draft(amount: u64) -> KasbonDraft {
    KasbonDraft::new()
        .set_purpose("Perbaikan jaringan kantor")
        .set_bank("BCA", "1234567890")
        .set_date_needed(TimeStamp::new())
        .add_item("Kabel dan konektor", amount)
}

fn domain_error(err: &anyhow::Error) -> &KasbonError {
    err.downcast_ref::<KasbonError>()
        .expect("expected a domain error")
}

struct BrokenSink;

impl ActivitySink for BrokenSink {
    fn append(&self, _: &ActivityLog) -> anyhow::Result<()> {
        anyhow::bail!("audit store unavailable")
    }
}

#[test]
fn amount_at_tier_max_gets_two_step_chain() -> anyhow::Result<()> {
    let (_dir, _db, service) = open_service("scenario_a.db")?;

    let submission = service
        .submit_kasbon(&draft(2_000_000), &requester())
        .context("submit failed")?;
    let request = submission.request;
    let steps = request.approval_path.steps();

    assert_eq!(request.status, KasbonStatus::Pending);
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[0].role, "Requestor");
    assert_eq!(steps[0].approver_name, "Fahmi Ilmawan");
    assert_eq!(steps[0].status, StepStatus::Approved);
    assert!(steps[0].approved_at.is_some());
    assert_eq!(steps[1].role, "Dept. Head");
    assert_eq!(steps[1].approver_name, "Raymond Tjahja");
    assert_eq!(steps[1].status, StepStatus::Pending);
    assert_eq!(request.current_step_index(), 1);
    assert_eq!(request.matrix_digest, Some(service.matrix()?.digest()?));

    assert_eq!(service.get_kasbon(&request.id)?, request);
    Ok(())
}

#[test]
fn third_request_is_over_slot_and_needs_justification() -> anyhow::Result<()> {
    let (_dir, _db, service) = open_service("scenario_b.db")?;

    service.submit_kasbon(&draft(500_000), &requester())?;
    service.submit_kasbon(&draft(750_000), &requester())?;
    assert!(service.slot_exception_required("IT Operation")?);

    let err = service
        .submit_kasbon(&draft(1_000_000), &requester())
        .unwrap_err();
    assert_eq!(
        domain_error(&err),
        &KasbonError::Validation(ValidationError::MissingSlotJustification {
            slot: 3,
            max_slots: 2
        })
    );
    assert_eq!(service.kasbons()?.len(), 2);

    let submission = service.submit_kasbon(
        &draft(1_000_000).set_slot_justification("Kebutuhan proyek mendesak"),
        &requester(),
    )?;
    assert_eq!(submission.request.kasbon_type, KasbonType::OverSlot);
    assert_eq!(submission.request.slot, 3);
    assert_eq!(
        submission.request.slot_justification.as_deref(),
        Some("Kebutuhan proyek mendesak")
    );
    assert_eq!(
        submission.request.approval_path.steps()[1].role,
        "Dept. Head (Slot Approval)"
    );
    Ok(())
}

#[test]
fn approved_slot_request_raises_quota_and_logs_once() -> anyhow::Result<()> {
    let (_dir, _db, service) = open_service("scenario_c.db")?;

    let request = service.request_slot(&requester(), "Tim lapangan bertambah", 3)?;
    assert_eq!(request.current_slots, 2);
    assert_eq!(request.requested_slots, 3);
    assert_eq!(
        request.approval_path.steps()[0].approver_name,
        "Raymond Tjahja"
    );

    let approved = service.approve_slot_request(&request.id, 0, "Raymond Tjahja")?;
    assert_eq!(approved.status, SlotStatus::Approved);
    assert_eq!(service.get_slot_request(&request.id)?, approved);

    let policies = service.department_policies()?;
    assert_eq!(policies.by_name("IT Operation").unwrap().max_slots, 3);

    let slot_logs: Vec<_> = service
        .activity_log(50)?
        .into_iter()
        .filter(|l| l.activity_type == ActivityType::Slot)
        .collect();
    assert_eq!(slot_logs.len(), 1);
    assert_eq!(slot_logs[0].details, "Dept: IT Operation | 2 -> 3 Slots");

    // the third request now fits the raised quota
    service.submit_kasbon(&draft(500_000), &requester())?;
    service.submit_kasbon(&draft(500_000), &requester())?;
    let third = service.submit_kasbon(&draft(500_000), &requester())?;
    assert_eq!(third.request.kasbon_type, KasbonType::Regular);
    Ok(())
}

#[test]
fn slot_request_with_wrong_delta_is_refused() -> anyhow::Result<()> {
    let (_dir, _db, service) = open_service("slot_delta.db")?;

    let err = service
        .request_slot(&requester(), "Butuh dua slot", 4)
        .unwrap_err();
    assert_eq!(
        domain_error(&err),
        &KasbonError::Validation(ValidationError::InvalidSlotDelta {
            current: 2,
            requested: 4
        })
    );
    assert!(service.slot_requests()?.is_empty());
    Ok(())
}

#[test]
fn rejected_slot_request_only_logs() -> anyhow::Result<()> {
    let (_dir, _db, service) = open_service("slot_reject.db")?;

    let request = service.request_slot(&requester(), "Tim lapangan bertambah", 3)?;
    let rejected = service.reject_slot_request(&request.id, 0, "Raymond Tjahja")?;

    assert_eq!(rejected.status, SlotStatus::Rejected);
    assert_eq!(
        service
            .department_policies()?
            .by_name("IT Operation")
            .unwrap()
            .max_slots,
        2
    );
    let logs = service.activity_log(10)?;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].action, "Rejected Slot Exception");
    assert!(service.pending_slot_requests()?.is_empty());
    Ok(())
}

#[test]
fn second_slot_request_waits_for_the_first() -> anyhow::Result<()> {
    let (_dir, _db, service) = open_service("slot_duplicate.db")?;

    let first = service.request_slot(&requester(), "Tim lapangan bertambah", 3)?;
    let err = service
        .request_slot(&requester(), "Tim lapangan bertambah", 3)
        .unwrap_err();
    assert!(matches!(
        domain_error(&err),
        KasbonError::InvalidStateTransition { .. }
    ));
    assert_eq!(service.slot_requests()?.len(), 1);

    service.approve_slot_request(&first.id, 0, "Raymond Tjahja")?;
    let slot_logs = service
        .activity_log(50)?
        .into_iter()
        .filter(|l| l.activity_type == ActivityType::Slot)
        .count();
    assert_eq!(slot_logs, 1);
    Ok(())
}

#[test]
fn slot_request_overtaken_by_admin_edit_is_refused() -> anyhow::Result<()> {
    let (_dir, _db, service) = open_service("slot_stale.db")?;

    let request = service.request_slot(&requester(), "Tim lapangan bertambah", 3)?;
    service.upsert_dept_setting(
        kasbon::policy::DeptSetting::new("IT", "IT Operation", 5, 0),
        "Admin",
    )?;

    let err = service
        .approve_slot_request(&request.id, 0, "Raymond Tjahja")
        .unwrap_err();
    assert!(domain_error(&err).is_invalid_transition());
    assert_eq!(
        service
            .department_policies()?
            .by_name("IT Operation")
            .unwrap()
            .max_slots,
        5
    );
    assert_eq!(service.get_slot_request(&request.id)?.status, SlotStatus::Pending);

    // the approver can still turn the stale request down
    service.reject_slot_request(&request.id, 0, "Raymond Tjahja")?;
    assert!(service.pending_slot_requests()?.is_empty());
    Ok(())
}

#[test]
fn finance_step_is_appended_when_matrix_omits_it() -> anyhow::Result<()> {
    let (_dir, _db, service) = open_service("scenario_d.db")?;

    service.update_matrix_tier(
        MatrixConfig::new(
            "4",
            10_000_001,
            None,
            &["Requestor", "Dept. Head", "Div. Head", "COO"],
        ),
        "Admin",
    )?;

    let request = service
        .submit_kasbon(&draft(15_000_000), &requester())?
        .request;
    let steps = request.approval_path.steps();

    assert_eq!(steps.len(), 5);
    let last = steps.last().unwrap();
    assert_eq!(last.role, "Finance");
    assert_eq!(last.approver_name, "Admin Finance");
    assert_eq!(last.step_order, 5);

    let policy_logs: Vec<_> = service
        .activity_log(10)?
        .into_iter()
        .filter(|l| l.activity_type == ActivityType::Policy)
        .collect();
    assert_eq!(policy_logs.len(), 1);
    assert_eq!(policy_logs[0].action, "Updated Approval Matrix");
    Ok(())
}

#[test]
fn revoked_request_cannot_be_approved() -> anyhow::Result<()> {
    let (_dir, _db, service) = open_service("scenario_e.db")?;

    let id = service
        .submit_kasbon(&draft(1_000_000), &requester())?
        .request
        .id;
    let revoked = service.revoke_kasbon(&id, "duplicate", "Admin")?;
    assert_eq!(revoked.status, KasbonStatus::Revoked);
    assert_eq!(revoked.revoke_reason.as_deref(), Some("duplicate"));

    let kasbon_logs: Vec<_> = service
        .activity_log(10)?
        .into_iter()
        .filter(|l| l.activity_type == ActivityType::Kasbon)
        .collect();
    assert_eq!(kasbon_logs.len(), 1);
    assert!(kasbon_logs[0].details.contains("duplicate"));

    let err = service.approve_kasbon(&id, 1, "Raymond Tjahja").unwrap_err();
    assert!(domain_error(&err).is_invalid_transition());
    Ok(())
}

#[test]
fn full_lifecycle_through_settlement() -> anyhow::Result<()> {
    let (_dir, _db, service) = open_service("lifecycle.db")?;

    let id = service
        .submit_kasbon(&draft(3_000_000), &requester())?
        .request
        .id;

    let waiting = service.pending_for_approver("Raymond Tjahja")?;
    assert_eq!(waiting.len(), 1);
    assert!(service.pending_for_approver("Hendra")?.is_empty());

    let request = service.approve_kasbon(&id, 1, "Raymond Tjahja")?;
    assert_eq!(request.status, KasbonStatus::Pending);
    assert_eq!(service.pending_for_approver("Hendra")?.len(), 1);

    let request = service.approve_kasbon(&id, 2, "Hendra")?;
    assert_eq!(request.status, KasbonStatus::Approved);
    assert!(
        request
            .approval_path
            .steps()
            .iter()
            .all(|s| s.status == StepStatus::Approved)
    );

    service.disburse_kasbon(&id, "Admin Finance")?;
    let settled = service.realize_kasbon(
        &id,
        vec![
            KasbonItem {
                description: "Kabel".into(),
                amount: 2_500_000,
            },
            KasbonItem {
                description: "Konektor".into(),
                amount: 300_000,
            },
        ],
    )?;
    assert_eq!(settled.status, KasbonStatus::Settled);
    assert!(settled.is_realized());
    assert_eq!(settled.realization_total(), Some(2_800_000));
    assert_eq!(settled.settlement_balance(), Some(200_000));

    // settled requests no longer hold a slot
    assert_eq!(service.assess_slots(&requester(), 1_000)?.slot, 1);
    Ok(())
}

#[test]
fn racing_approvals_apply_once() -> anyhow::Result<()> {
    let (_dir, _db, service) = open_service("race.db")?;

    let id = service
        .submit_kasbon(&draft(3_000_000), &requester())?
        .request
        .id;

    let results: Vec<anyhow::Result<_>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..2)
            .map(|_| scope.spawn(|| service.approve_kasbon(&id, 1, "Raymond Tjahja")))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let loser = results.into_iter().find_map(Result::err).unwrap();
    assert_eq!(
        domain_error(&loser),
        &KasbonError::NotCurrentStep {
            requested: 1,
            current: 2
        }
    );
    assert_eq!(service.get_kasbon(&id)?.current_step_index(), 2);
    Ok(())
}

#[test]
fn audit_failure_keeps_the_decision() -> anyhow::Result<()> {
    let (_dir, _db, service) = open_service("audit_failure.db")?;
    let service = service.with_activity_sink(Arc::new(BrokenSink));

    let id = service
        .submit_kasbon(&draft(1_000_000), &requester())?
        .request
        .id;
    service.revoke_kasbon(&id, "duplicate", "Admin")?;

    assert_eq!(service.get_kasbon(&id)?.status, KasbonStatus::Revoked);
    assert!(service.activity_log(10)?.is_empty());
    Ok(())
}

#[test]
fn missing_records_are_not_found() -> anyhow::Result<()> {
    let (_dir, _db, service) = open_service("not_found.db")?;

    let err = service.get_kasbon("kasbon1missing").unwrap_err();
    assert!(matches!(
        domain_error(&err),
        KasbonError::NotFound { kind: "kasbon", .. }
    ));

    let err = service
        .approve_slot_request("slot1missing", 0, "Admin")
        .unwrap_err();
    assert!(matches!(
        domain_error(&err),
        KasbonError::NotFound {
            kind: "slot request",
            ..
        }
    ));
    Ok(())
}

#[test]
fn stored_settings_survive_a_new_config() -> anyhow::Result<()> {
    let (_dir, db, service) = open_service("reseed.db")?;
    service.upsert_dept_setting(
        kasbon::policy::DeptSetting::new("IT", "IT Operation", 5, 0),
        "Admin",
    )?;
    let digest = service.matrix()?.digest()?;

    let mut other = config();
    other.matrix.truncate(1);
    let reopened = KasbonService::new(db, &other)?;

    assert_eq!(reopened.matrix()?.digest()?, digest);
    assert_eq!(
        reopened
            .department_policies()?
            .by_name("IT Operation")
            .unwrap()
            .max_slots,
        5
    );
    Ok(())
}

#[test]
fn matrix_edit_with_hole_is_reported() -> anyhow::Result<()> {
    let (_dir, _db, service) = open_service("coverage.db")?;
    assert!(service.matrix_coverage()?.is_empty());

    service.update_matrix_tier(
        MatrixConfig::new("2", 3_000_000, Some(5_000_000), &["Requestor", "Div. Head"]),
        "Admin",
    )?;
    assert!(!service.matrix_coverage()?.is_empty());

    // 2,500,000 now falls in the hole
    let err = service
        .submit_kasbon(&draft(2_500_000), &requester())
        .unwrap_err();
    assert_eq!(
        domain_error(&err),
        &KasbonError::ConfigurationGap { amount: 2_500_000 }
    );
    Ok(())
}

#[test]
fn preview_of_unfinished_draft_is_a_validation_error() -> anyhow::Result<()> {
    let (_dir, _db, service) = open_service("preview_empty.db")?;
    assert!(service.matrix_coverage()?.is_empty());

    let err = service
        .preview_path(&KasbonDraft::new(), &requester())
        .unwrap_err();
    assert_eq!(
        domain_error(&err),
        &KasbonError::Validation(ValidationError::EmptyItems)
    );

    let zero = KasbonDraft::new().add_item("Belum diisi", 0);
    let err = service.preview_path(&zero, &requester()).unwrap_err();
    assert_eq!(
        domain_error(&err),
        &KasbonError::Validation(ValidationError::ZeroAmount)
    );

    let path = service.preview_path(&draft(1_500_000), &requester())?;
    assert_eq!(path.len(), 2);
    Ok(())
}

#[test]
fn slot_layers_and_overdue_flags_are_stored() -> anyhow::Result<()> {
    let (_dir, _db, service) = open_service("admin_edits.db")?;

    service.update_slot_layers(vec!["Dept. Head".into(), "Div. Head".into()], "Admin")?;
    let request = service.request_slot(&requester(), "Tim lapangan bertambah", 3)?;
    assert_eq!(request.approval_path.len(), 2);

    // a first approval leaves the quota untouched
    let request = service.approve_slot_request(&request.id, 0, "Raymond Tjahja")?;
    assert_eq!(request.status, SlotStatus::Pending);
    assert_eq!(service.pending_slot_requests()?.len(), 1);
    assert_eq!(
        service
            .department_policies()?
            .by_name("IT Operation")
            .unwrap()
            .max_slots,
        2
    );

    let err = service
        .update_slot_layers(vec!["Requestor".into()], "Admin")
        .unwrap_err();
    assert_eq!(
        domain_error(&err),
        &KasbonError::Validation(ValidationError::EmptyLayerList)
    );

    let id = service
        .submit_kasbon(&draft(1_000_000), &requester())?
        .request
        .id;
    assert!(service.flag_overdue(&id, true)?.is_overdue);
    assert_eq!(service.kasbons_by_requester("Fahmi Ilmawan")?.len(), 1);
    assert!(service.kasbons_by_requester("Andi Suherman")?.is_empty());
    Ok(())
}
