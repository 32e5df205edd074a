//! CRM data commands: dashboard, board and resource lists.

use std::io::{self, Write};

use pipecrm_client::models::{AuthUser, Pipeline};
use pipecrm_client::supabase::{AuthApi, DataApi};
use pipecrm_client::{AppContext, PipelineBoard};
use pipecrm_core::{AppError, AppErrorCode, DealId, ErrorOrigin, StageId};

use super::{CliError, enter};
use crate::output::Output;

pub async fn dashboard<B>(ctx: &AppContext<B>, out: &Output) -> Result<(), CliError>
where
    B: AuthApi + DataApi + Clone,
{
    enter(ctx, "/dashboard").await?;

    let mut state = ctx.resource("dashboard.fetchMetrics");
    let metrics = state.load(ctx.dashboard().fetch_metrics()).await?;

    out.show(metrics, |w, m| {
        writeln!(w, "Deals")?;
        writeln!(
            w,
            "  total {}  open {}  won {}  lost {}",
            m.deals.total, m.deals.open, m.deals.won, m.deals.lost
        )?;
        writeln!(
            w,
            "  value {}  average {}  conversion {:.1}%",
            m.deals.total_value, m.deals.average_value, m.deals.conversion_rate
        )?;
        for stage in &m.deals.by_stage {
            writeln!(
                w,
                "  {:<16} {:>4}  {}",
                stage.stage_name, stage.count, stage.total_value
            )?;
        }

        writeln!(w, "Contacts")?;
        writeln!(
            w,
            "  total {}  last 30 days {}  with email {}  with phone {}",
            m.contacts.total, m.contacts.recently_added, m.contacts.with_email, m.contacts.with_phone
        )?;

        writeln!(w, "Companies")?;
        writeln!(
            w,
            "  total {}  last 30 days {}",
            m.companies.total, m.companies.recently_added
        )?;
        for segment in &m.companies.by_segment {
            writeln!(w, "  {:<16} {:>4}", segment.segment, segment.count)?;
        }

        writeln!(w, "Activities")?;
        writeln!(
            w,
            "  total {}  today {}  this week {}",
            m.activities.total, m.activities.today, m.activities.this_week
        )?;
        for kind in &m.activities.by_type {
            writeln!(w, "  {:<16} {:>4}", kind.kind, kind.count)?;
        }
        Ok(())
    })
}

/// Show the default pipeline as columns.
pub async fn pipeline<B>(ctx: &AppContext<B>, out: &Output) -> Result<(), CliError>
where
    B: AuthApi + DataApi + Clone,
{
    enter(ctx, "/pipeline").await?;

    let board = open_board(ctx).await?;
    render_board(out, &board)
}

/// Move a deal to another stage of the default pipeline.
pub async fn move_deal<B>(
    ctx: &AppContext<B>,
    out: &Output,
    deal_id: DealId,
    stage_id: StageId,
) -> Result<(), CliError>
where
    B: AuthApi + DataApi + Clone,
{
    enter(ctx, "/pipeline").await?;

    let mut board = open_board(ctx).await?;
    if !board.start_dragging(deal_id) {
        return Err(CliError::App(AppError::new(
            AppErrorCode::NotFound,
            ErrorOrigin::Ui,
            format!("Deal {deal_id} is not on this board"),
        )));
    }

    let pipeline_id = board
        .stages()
        .iter()
        .find(|s| s.id == stage_id)
        .map(|s| s.pipeline_id);
    let Some(pipeline_id) = pipeline_id else {
        board.stop_dragging();
        return Err(CliError::App(AppError::new(
            AppErrorCode::NotFound,
            ErrorOrigin::Ui,
            format!("Stage {stage_id} is not on this board"),
        )));
    };

    board.move_deal_to_stage(deal_id, pipeline_id, stage_id).await;
    board.stop_dragging();

    if let Some(error) = board.error() {
        return Err(CliError::App(error.clone()));
    }
    render_board(out, &board)
}

/// List deals, or show one with `id`.
pub async fn deals<B>(ctx: &AppContext<B>, out: &Output, id: Option<DealId>) -> Result<(), CliError>
where
    B: AuthApi + DataApi + Clone,
{
    if let Some(id) = id {
        enter(ctx, &format!("/deals/{id}")).await?;

        let mut state = ctx.resource("deals.getById");
        let deal = state.load(ctx.deals().get_by_id(id)).await?;
        return out.show(deal, |w, d| {
            writeln!(w, "{}", d.deal.title)?;
            writeln!(w, "  id       {}", d.deal.id)?;
            writeln!(w, "  amount   {}", d.deal.amount)?;
            writeln!(w, "  status   {}", d.deal.status)?;
            let stage = d.stage.as_ref().map_or("-", |s| s.name.as_str());
            writeln!(w, "  stage    {stage}")?;
            let pipeline = d.pipeline.as_ref().map_or("-", |p| p.name.as_str());
            writeln!(w, "  pipeline {pipeline}")?;
            writeln!(w, "  created  {}", d.deal.created_at.to_rfc3339())
        });
    }

    enter(ctx, "/deals").await?;

    let mut state = ctx.resource("deals.list");
    let deals = state.load(ctx.deals().list(None)).await?;
    out.show(deals.as_slice(), |w, deals| {
        for d in deals {
            let stage = d.stage.as_ref().map_or("-", |s| s.name.as_str());
            writeln!(
                w,
                "{}  {:<24} {:>12}  {:<6} {stage}",
                d.deal.id, d.deal.title, d.deal.amount, d.deal.status
            )?;
        }
        Ok(())
    })
}

pub async fn contacts<B>(ctx: &AppContext<B>, out: &Output) -> Result<(), CliError>
where
    B: AuthApi + DataApi + Clone,
{
    enter(ctx, "/contacts").await?;

    let mut state = ctx.resource("contacts.list");
    let contacts = state.load(ctx.contacts().list()).await?;
    out.show(contacts.as_slice(), |w, contacts| {
        for c in contacts {
            writeln!(
                w,
                "{}  {:<24} {:<28} {}",
                c.id,
                c.name,
                c.email.as_deref().unwrap_or("-"),
                c.phone.as_deref().unwrap_or("-")
            )?;
        }
        Ok(())
    })
}

pub async fn companies<B>(ctx: &AppContext<B>, out: &Output) -> Result<(), CliError>
where
    B: AuthApi + DataApi + Clone,
{
    enter(ctx, "/companies").await?;

    let mut state = ctx.resource("companies.list");
    let companies = state.load(ctx.companies().list()).await?;
    out.show(companies.as_slice(), |w, companies| {
        for c in companies {
            writeln!(
                w,
                "{}  {:<24} {:<16} {}",
                c.id,
                c.name,
                c.segment.as_deref().unwrap_or("-"),
                c.city.as_deref().unwrap_or("-")
            )?;
        }
        Ok(())
    })
}

/// List activities: all of them, one deal's, or the latest `recent`.
pub async fn activities<B>(
    ctx: &AppContext<B>,
    out: &Output,
    deal: Option<DealId>,
    recent: Option<usize>,
) -> Result<(), CliError>
where
    B: AuthApi + DataApi + Clone,
{
    enter(ctx, "/activities").await?;

    if let (None, Some(limit)) = (deal, recent) {
        let mut state = ctx.resource("activities.recent");
        let activities = state.load(ctx.activities().recent(limit)).await?;
        return out.show(activities.as_slice(), |w, activities| {
            for a in activities {
                let title = a.deals.as_ref().map_or("-", |d| d.title.as_str());
                writeln!(
                    w,
                    "{}  {:<10} {:<24} {}",
                    a.activity.created_at.format("%Y-%m-%d %H:%M"),
                    a.activity.kind,
                    title,
                    a.activity.content.as_deref().unwrap_or("")
                )?;
            }
            Ok(())
        });
    }

    let mut state = ctx.resource("activities.list");
    let activities = match deal {
        Some(deal_id) => state.load(ctx.activities().list_by_deal(deal_id)).await?,
        None => state.load(ctx.activities().list()).await?,
    };
    out.show(activities.as_slice(), |w, activities| {
        for a in activities {
            writeln!(
                w,
                "{}  {:<10} {}",
                a.created_at.format("%Y-%m-%d %H:%M"),
                a.kind,
                a.content.as_deref().unwrap_or("")
            )?;
        }
        Ok(())
    })
}

async fn open_board<B>(ctx: &AppContext<B>) -> Result<PipelineBoard<B>, CliError>
where
    B: AuthApi + DataApi + Clone,
{
    let owner = current_user(ctx)?;

    let mut state = ctx.resource::<Pipeline>("pipelines.getOrCreateDefault");
    let pipeline_id = state
        .load(ctx.pipelines().get_or_create_default(&owner))
        .await?
        .id;

    let mut board = ctx.board(Some(pipeline_id));
    board.load_stages(pipeline_id).await?;
    board.load_deals().await?;
    Ok(board)
}

fn current_user<B>(ctx: &AppContext<B>) -> Result<AuthUser, CliError>
where
    B: AuthApi + DataApi + Clone,
{
    ctx.store()
        .user()
        .ok_or_else(|| CliError::Redirected(pipecrm_client::router::LOGIN_PATH.to_string()))
}

fn render_board<B>(out: &Output, board: &PipelineBoard<B>) -> Result<(), CliError>
where
    B: DataApi,
{
    let columns: Vec<_> = board
        .deals_by_stage()
        .into_iter()
        .map(|(stage, deals)| {
            serde_json::json!({
                "stage": stage,
                "deals": deals,
            })
        })
        .collect();

    out.show(&columns, |w, _| write_columns(w, board))
}

fn write_columns<B: DataApi>(w: &mut dyn Write, board: &PipelineBoard<B>) -> io::Result<()> {
    for (stage, deals) in board.deals_by_stage() {
        writeln!(w, "{} ({})", stage.name, deals.len())?;
        for d in deals {
            writeln!(w, "  {}  {:<24} {:>12}", d.deal.id, d.deal.title, d.deal.amount)?;
        }
    }
    Ok(())
}
