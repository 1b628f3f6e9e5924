//! End-to-end walk through the kasbon workflow against a scratch database.
//!
//! Run with `KASBON_LOG_FORMAT=pretty` to see the structured events.

use kasbon::config::LoadOptions;
use kasbon::kasbon::{KasbonDraft, KasbonItem};
use kasbon::resolver::RequesterContext;
use kasbon::telemetry::init_tracing;
use kasbon::types::TimeStamp;
use kasbon::{KasbonConfig, KasbonService};

fn main() -> anyhow::Result<()> {
    let mut config = KasbonConfig::load(LoadOptions::default())?;
    init_tracing(&config.logging)?;

    let scratch = tempfile::tempdir()?;
    config.storage.path = scratch.path().join("walkthrough.db");
    let service = KasbonService::open(&config)?;

    let fahmi = RequesterContext::new("Fahmi Ilmawan", "IT Operation")
        .with_superior("Raymond Tjahja", true)
        .with_division_head("Hendra");

    let draft = KasbonDraft::new()
        .set_purpose("Upgrade switch lantai 3")
        .set_bank("BCA", "1234567890")
        .set_date_needed(TimeStamp::new())
        .add_item("Managed switch 24 port", 3_200_000)
        .add_item("Kabel UTP 1 roll", 900_000);

    let preview = service.preview_path(&draft, &fahmi)?;
    println!("preview:");
    for step in preview.steps() {
        println!("  {}. {} ({:?}) {}", step.step_order, step.role, step.status, step.approver_name);
    }

    let id = service.submit_kasbon(&draft, &fahmi)?.request.id;
    service.approve_kasbon(&id, 1, "Raymond Tjahja")?;
    service.approve_kasbon(&id, 2, "Hendra")?;
    service.disburse_kasbon(&id, "Admin Finance")?;
    let settled = service.realize_kasbon(
        &id,
        vec![
            KasbonItem {
                description: "Managed switch 24 port".into(),
                amount: 3_150_000,
            },
            KasbonItem {
                description: "Kabel UTP 1 roll".into(),
                amount: 900_000,
            },
        ],
    )?;
    println!(
        "{} settled on {}, balance {:?}",
        settled.id,
        TimeStamp::new(),
        settled.settlement_balance()
    );

    let slot = service.request_slot(&fahmi, "Proyek migrasi data center", 3)?;
    service.approve_slot_request(&slot.id, 0, "Raymond Tjahja")?;

    for log in service.activity_log(10)? {
        println!("[{}] {:?} {}: {}", log.timestamp, log.activity_type, log.action, log.details);
    }
    Ok(())
}
