//! Integration tests for dashboard aggregation.
//!
//! Rows are created through the services or seeded with fixed timestamps,
//! then aggregated against a fixed clock: Wednesday 2026-10-21 15:00 UTC.

use chrono::{DateTime, TimeZone, Utc};
use pipecrm_client::models::{AuthUser, DealWithRelations, NewDeal, Stage};
use pipecrm_client::services::activities::ACTIVITIES_TABLE;
use pipecrm_client::services::companies::COMPANIES_TABLE;
use pipecrm_client::services::contacts::CONTACTS_TABLE;
use pipecrm_client::services::dashboard::UNSEGMENTED;
use pipecrm_client::services::deals::DEALS_TABLE;
use pipecrm_client::supabase::RemoteError;
use pipecrm_core::{ActivityType, AppErrorCode, DealId, DealStatus};
use pipecrm_integration_tests::TestContext;
use rust_decimal::Decimal;
use serde_json::json;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 21, 15, 0, 0).single().expect("valid time")
}

/// Sign in, create the default pipeline and return its stages.
async fn pipeline_stages(ctx: &TestContext) -> (AuthUser, Vec<Stage>) {
    let owner = ctx.signed_in("carla@pipecrm.dev").await;
    let pipeline = ctx
        .app
        .pipelines()
        .get_or_create_default(&owner)
        .await
        .expect("pipeline");
    let stages = ctx.app.deals().stages(pipeline.id).await.expect("stages");
    (owner, stages)
}

async fn create_deals(ctx: &TestContext) {
    let (owner, stages) = pipeline_stages(ctx).await;
    let first = &stages[0];
    let third = &stages[2];

    for (title, amount, stage, status) in [
        ("Acme", 1000, first, DealStatus::Open),
        ("Globex", 3000, first, DealStatus::Won),
        ("Initech", 500, third, DealStatus::Lost),
        ("Umbrella", 1500, third, DealStatus::Won),
    ] {
        ctx.app
            .deals()
            .create(&NewDeal {
                title: title.into(),
                amount: Decimal::from(amount),
                stage_id: stage.id,
                pipeline_id: stage.pipeline_id,
                company_id: None,
                contact_id: None,
                owner_id: owner.id,
                status,
            })
            .await
            .expect("deal");
    }
}

// ============================================================================
// Deals
// ============================================================================

#[tokio::test]
async fn test_empty_dashboard() {
    let ctx = TestContext::new();

    let metrics = ctx
        .app
        .dashboard()
        .fetch_metrics_at(&now())
        .await
        .expect("metrics");

    assert_eq!(metrics.deals.total, 0);
    assert_eq!(metrics.deals.average_value, Decimal::ZERO);
    assert!(metrics.deals.conversion_rate.abs() < f64::EPSILON);
    assert!(metrics.deals.by_stage.is_empty());
    assert_eq!(metrics.contacts.total, 0);
    assert!(metrics.companies.by_segment.is_empty());
    assert!(metrics.activities.by_type.is_empty());
}

#[tokio::test]
async fn test_deal_metrics_by_stage() {
    let ctx = TestContext::new();
    create_deals(&ctx).await;

    let deals = ctx
        .app
        .dashboard()
        .fetch_metrics_at(&now())
        .await
        .expect("metrics")
        .deals;

    assert_eq!(deals.total, 4);
    assert_eq!((deals.open, deals.won, deals.lost), (1, 2, 1));
    assert_eq!(deals.total_value, Decimal::from(6000));
    assert_eq!(deals.average_value, Decimal::from(1500));
    assert!((deals.conversion_rate - 50.0).abs() < f64::EPSILON);

    let stages: Vec<_> = deals
        .by_stage
        .iter()
        .map(|s| (s.stage_name.as_str(), s.count, s.total_value))
        .collect();
    assert_eq!(
        stages,
        vec![
            ("Prospecção", 2, Decimal::from(4000)),
            ("Proposta", 2, Decimal::from(2000)),
        ]
    );
}

#[tokio::test]
async fn test_deal_with_missing_stage_counts_only_in_totals() {
    let ctx = TestContext::new();
    create_deals(&ctx).await;
    let orphan: DealWithRelations = serde_json::from_value(ctx.backend.seed(
        DEALS_TABLE,
        json!({
            "title": "Orphan",
            "amount": 400,
            "stage_id": DealId::random().to_string(),
            "pipeline_id": DealId::random().to_string(),
            "owner_id": DealId::random().to_string(),
            "status": "open",
        }),
    ))
    .expect("orphan row");
    assert!(orphan.stage.is_none());

    let deals = ctx
        .app
        .dashboard()
        .fetch_metrics_at(&now())
        .await
        .expect("metrics")
        .deals;

    assert_eq!(deals.total, 5);
    assert_eq!(deals.total_value, Decimal::from(6400));
    let staged: usize = deals.by_stage.iter().map(|s| s.count).sum();
    assert_eq!(staged, 4);
}

// ============================================================================
// Contacts, Companies and Activities
// ============================================================================

#[tokio::test]
async fn test_contact_and_company_metrics() {
    let ctx = TestContext::new();

    for (name, email, phone, created_at) in [
        ("Davi", Some("davi@acme.com"), Some("+55 11 9999-0000"), "2026-10-20T10:00:00Z"),
        ("Eva", Some("eva@globex.com"), None, "2026-09-01T10:00:00Z"),
        // Exactly 30 days before the clock.
        ("Fabio", None, Some("  "), "2026-09-21T15:00:00Z"),
    ] {
        ctx.backend.seed(
            CONTACTS_TABLE,
            json!({ "name": name, "email": email, "phone": phone, "created_at": created_at }),
        );
    }

    for (name, segment, created_at) in [
        ("Acme", Some("SaaS"), "2026-10-01T00:00:00Z"),
        ("Globex", None, "2026-10-02T00:00:00Z"),
        ("Initech", Some("SaaS"), "2026-01-15T00:00:00Z"),
        ("Hooli", Some("Varejo"), "2026-10-20T00:00:00Z"),
    ] {
        ctx.backend.seed(
            COMPANIES_TABLE,
            json!({ "name": name, "segment": segment, "created_at": created_at }),
        );
    }

    let metrics = ctx
        .app
        .dashboard()
        .fetch_metrics_at(&now())
        .await
        .expect("metrics");

    assert_eq!(metrics.contacts.total, 3);
    assert_eq!(metrics.contacts.recently_added, 2);
    assert_eq!(metrics.contacts.with_email, 2);
    assert_eq!(metrics.contacts.with_phone, 1);

    assert_eq!(metrics.companies.total, 4);
    assert_eq!(metrics.companies.recently_added, 3);
    let segments: Vec<_> = metrics
        .companies
        .by_segment
        .iter()
        .map(|s| (s.segment.as_str(), s.count))
        .collect();
    assert_eq!(segments, vec![("SaaS", 2), (UNSEGMENTED, 1), ("Varejo", 1)]);
}

#[tokio::test]
async fn test_activity_windows() {
    let ctx = TestContext::new();
    let deal_id = DealId::random().to_string();

    for (kind, created_at) in [
        ("call", "2026-10-21T09:00:00Z"),
        ("email", "2026-10-19T12:00:00Z"),
        // Saturday, before this week's Sunday.
        ("call", "2026-10-17T12:00:00Z"),
        // Sunday midnight opens the week.
        ("meeting", "2026-10-18T00:00:00Z"),
    ] {
        ctx.backend.seed(
            ACTIVITIES_TABLE,
            json!({ "deal_id": deal_id, "type": kind, "created_at": created_at }),
        );
    }

    let activities = ctx
        .app
        .dashboard()
        .fetch_metrics_at(&now())
        .await
        .expect("metrics")
        .activities;

    assert_eq!(activities.total, 4);
    assert_eq!(activities.today, 1);
    assert_eq!(activities.this_week, 3);
    let by_type: Vec<_> = activities
        .by_type
        .iter()
        .map(|t| (t.kind, t.count))
        .collect();
    assert_eq!(
        by_type,
        vec![
            (ActivityType::Call, 2),
            (ActivityType::Email, 1),
            (ActivityType::Meeting, 1),
        ]
    );
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_failed_fetch_is_tracked_by_view_state() {
    let ctx = TestContext::new();
    ctx.backend.fail_table(
        CONTACTS_TABLE,
        RemoteError::api(401, "PGRST301", "permission denied for table contacts"),
    );

    let mut view = ctx.app.resource("dashboard.fetchMetrics");
    let error = view
        .load(ctx.app.dashboard().fetch_metrics_at(&now()))
        .await
        .expect_err("denied");

    assert_eq!(error.code(), AppErrorCode::Forbidden);
    assert!(view.data().is_none());
    assert!(!view.loading());
    assert_eq!(
        ctx.sink.captured(),
        vec![(AppErrorCode::Forbidden, "dashboard.fetchMetrics".to_string())]
    );
}
