//! Dashboard metrics.
//!
//! Metrics are aggregated client-side from the full, unpaginated row sets.
//! The aggregation functions are pure and take the reference time
//! explicitly; [`DashboardService`] fetches the rows and supplies the local
//! wall clock.

use std::collections::HashMap;
use std::hash::Hash;

use chrono::{DateTime, Datelike, Days, Local, NaiveTime, TimeDelta, TimeZone, Utc};
use pipecrm_core::{ActivityType, DealStatus, StageId};
use rust_decimal::Decimal;
use tracing::{debug, instrument};

use crate::models::{
    Activity, ActivityMetrics, ActivityTypeMetric, Company, CompanyMetrics, Contact,
    ContactMetrics, DashboardMetrics, DealMetrics, DealWithRelations, SegmentMetric, StageMetric,
};
use crate::services::activities::ACTIVITIES_TABLE;
use crate::services::companies::COMPANIES_TABLE;
use crate::services::contacts::CONTACTS_TABLE;
use crate::services::deals::DEALS_TABLE;
use crate::supabase::{DataApi, Query, RemoteError};

/// Segment bucket for companies without one.
pub const UNSEGMENTED: &str = "Outros";

/// How far back "recently added" reaches.
pub const RECENT_DAYS: i64 = 30;

/// Lower bounds of the time-based counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Windows {
    /// `now` minus [`RECENT_DAYS`].
    pub recent_since: DateTime<Utc>,
    /// Midnight of the current local day.
    pub today_since: DateTime<Utc>,
    /// Midnight of the most recent local Sunday.
    pub week_since: DateTime<Utc>,
}

impl Windows {
    /// Windows as seen from `now`, in `now`'s time zone.
    #[must_use]
    pub fn at<Tz: TimeZone>(now: &DateTime<Tz>) -> Self {
        let today = now.date_naive();
        let week_start = today
            .checked_sub_days(Days::new(u64::from(today.weekday().num_days_from_sunday())))
            .unwrap_or(today);

        Self {
            recent_since: now.to_utc() - TimeDelta::days(RECENT_DAYS),
            today_since: local_midnight(now, today),
            week_since: local_midnight(now, week_start),
        }
    }
}

/// Start of `day` in `now`'s zone. A midnight skipped by a DST change falls
/// back to the day's first valid instant, then to `now`.
fn local_midnight<Tz: TimeZone>(now: &DateTime<Tz>, day: chrono::NaiveDate) -> DateTime<Utc> {
    let naive = day.and_time(NaiveTime::MIN);
    now.timezone()
        .from_local_datetime(&naive)
        .earliest()
        .or_else(|| {
            now.timezone()
                .from_local_datetime(&(naive + TimeDelta::hours(1)))
                .earliest()
        })
        .map_or_else(|| now.to_utc(), |t| t.to_utc())
}

/// Count occurrences of `key`, keeping first-seen order.
fn tally<K: Eq + Hash + Clone>(keys: impl IntoIterator<Item = K>) -> Vec<(K, usize)> {
    let mut order = Vec::new();
    let mut counts: HashMap<K, usize> = HashMap::new();
    for key in keys {
        let count = counts.entry(key.clone()).or_insert_with(|| {
            order.push(key);
            0
        });
        *count += 1;
    }
    order
        .into_iter()
        .map(|k| {
            let count = counts.get(&k).copied().unwrap_or_default();
            (k, count)
        })
        .collect()
}

/// Deal counts, values and per-stage breakdown.
///
/// Deals without an embedded stage count towards the totals but not
/// towards `by_stage`.
#[must_use]
pub fn deal_metrics(deals: &[DealWithRelations]) -> DealMetrics {
    let total = deals.len();
    let with_status = |status: DealStatus| deals.iter().filter(|d| d.deal.status == status).count();
    let won = with_status(DealStatus::Won);

    let total_value: Decimal = deals.iter().map(|d| d.deal.amount).sum();
    let (average_value, conversion_rate) = if total > 0 {
        #[allow(clippy::cast_precision_loss)]
        let rate = won as f64 / total as f64 * 100.0;
        (total_value / Decimal::from(total), rate)
    } else {
        (Decimal::ZERO, 0.0)
    };

    let mut by_stage: Vec<StageMetric> = Vec::new();
    let mut index: HashMap<StageId, usize> = HashMap::new();
    for (deal, stage) in deals.iter().filter_map(|d| Some((&d.deal, d.stage.as_ref()?))) {
        let at = *index.entry(stage.id).or_insert_with(|| {
            by_stage.push(StageMetric {
                stage_id: stage.id,
                stage_name: stage.name.clone(),
                count: 0,
                total_value: Decimal::ZERO,
            });
            by_stage.len() - 1
        });
        if let Some(metric) = by_stage.get_mut(at) {
            metric.count += 1;
            metric.total_value += deal.amount;
        }
    }

    DealMetrics {
        total,
        open: with_status(DealStatus::Open),
        won,
        lost: with_status(DealStatus::Lost),
        total_value,
        average_value,
        conversion_rate,
        by_stage,
    }
}

#[must_use]
pub fn contact_metrics(contacts: &[Contact], windows: &Windows) -> ContactMetrics {
    ContactMetrics {
        total: contacts.len(),
        recently_added: contacts
            .iter()
            .filter(|c| c.created_at >= windows.recent_since)
            .count(),
        with_email: contacts.iter().filter(|c| c.has_email()).count(),
        with_phone: contacts.iter().filter(|c| c.has_phone()).count(),
    }
}

/// Company counts. Companies without a segment are grouped under
/// [`UNSEGMENTED`].
#[must_use]
pub fn company_metrics(companies: &[Company], windows: &Windows) -> CompanyMetrics {
    let segments = companies.iter().map(|c| {
        c.segment
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(UNSEGMENTED)
    });

    CompanyMetrics {
        total: companies.len(),
        recently_added: companies
            .iter()
            .filter(|c| c.created_at >= windows.recent_since)
            .count(),
        by_segment: tally(segments)
            .into_iter()
            .map(|(segment, count)| SegmentMetric {
                segment: segment.to_string(),
                count,
            })
            .collect(),
    }
}

#[must_use]
pub fn activity_metrics(activities: &[Activity], windows: &Windows) -> ActivityMetrics {
    let since = |bound: DateTime<Utc>| activities.iter().filter(|a| a.created_at >= bound).count();

    ActivityMetrics {
        total: activities.len(),
        today: since(windows.today_since),
        this_week: since(windows.week_since),
        by_type: tally(activities.iter().map(|a| a.kind))
            .into_iter()
            .map(|(kind, count): (ActivityType, usize)| ActivityTypeMetric { kind, count })
            .collect(),
    }
}

/// Every dashboard metric as seen from `now`.
#[must_use]
pub fn aggregate<Tz: TimeZone>(
    deals: &[DealWithRelations],
    contacts: &[Contact],
    companies: &[Company],
    activities: &[Activity],
    now: &DateTime<Tz>,
) -> DashboardMetrics {
    let windows = Windows::at(now);
    DashboardMetrics {
        deals: deal_metrics(deals),
        contacts: contact_metrics(contacts, &windows),
        companies: company_metrics(companies, &windows),
        activities: activity_metrics(activities, &windows),
    }
}

/// Fetches the row sets behind the dashboard.
#[derive(Debug, Clone)]
pub struct DashboardService<D> {
    api: D,
}

impl<D: DataApi> DashboardService<D> {
    #[must_use]
    pub const fn new(api: D) -> Self {
        Self { api }
    }

    /// Fetch the four row sets concurrently and aggregate them against the
    /// local wall clock.
    ///
    /// # Errors
    ///
    /// Returns the first backend error.
    pub async fn fetch_metrics(&self) -> Result<DashboardMetrics, RemoteError> {
        self.fetch_metrics_at(&Local::now()).await
    }

    /// [`DashboardService::fetch_metrics`] against an explicit clock.
    ///
    /// # Errors
    ///
    /// Returns the first backend error.
    #[instrument(skip_all)]
    pub async fn fetch_metrics_at<Tz>(
        &self,
        now: &DateTime<Tz>,
    ) -> Result<DashboardMetrics, RemoteError>
    where
        Tz: TimeZone + Sync,
        Tz::Offset: Sync,
    {
        let deals_query = Query::table(DEALS_TABLE).select("*, stage:pipeline_stages(*)");
        let contacts_query = Query::table(CONTACTS_TABLE);
        let companies_query = Query::table(COMPANIES_TABLE);
        let activities_query = Query::table(ACTIVITIES_TABLE);

        let (deals, contacts, companies, activities) = futures::try_join!(
            self.api.select::<DealWithRelations>(&deals_query),
            self.api.select::<Contact>(&contacts_query),
            self.api.select::<Company>(&companies_query),
            self.api.select::<Activity>(&activities_query),
        )?;

        debug!(
            deals = deals.len(),
            contacts = contacts.len(),
            companies = companies.len(),
            activities = activities.len(),
            "Dashboard rows fetched"
        );

        Ok(aggregate(&deals, &contacts, &companies, &activities, now))
    }
}
