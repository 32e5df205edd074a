//! Activities logged against deals.

use pipecrm_core::{ActivityId, DealId};
use tracing::instrument;

use crate::models::{Activity, ActivityPatch, ActivityWithDeal, NewActivity};
use crate::supabase::{DataApi, Query, RemoteError};

pub const ACTIVITIES_TABLE: &str = "deal_activities";

/// Default size of the recent activity feed.
pub const RECENT_LIMIT: usize = 10;

/// Activity operations.
#[derive(Debug, Clone)]
pub struct ActivitiesService<D> {
    api: D,
}

impl<D: DataApi> ActivitiesService<D> {
    #[must_use]
    pub const fn new(api: D) -> Self {
        Self { api }
    }

    /// Every activity, newest first.
    ///
    /// # Errors
    ///
    /// Returns the backend error unchanged.
    #[instrument(skip(self))]
    pub async fn list(&self) -> Result<Vec<Activity>, RemoteError> {
        let query = Query::table(ACTIVITIES_TABLE).order("created_at", false);
        self.api.select(&query).await
    }

    /// Activities of one deal, newest first.
    ///
    /// # Errors
    ///
    /// Returns the backend error unchanged.
    #[instrument(skip(self))]
    pub async fn list_by_deal(&self, deal_id: DealId) -> Result<Vec<Activity>, RemoteError> {
        let query = Query::table(ACTIVITIES_TABLE)
            .eq("deal_id", deal_id)
            .order("created_at", false);
        self.api.select(&query).await
    }

    /// The latest `limit` activities with their deal's title.
    ///
    /// # Errors
    ///
    /// Returns the backend error unchanged.
    #[instrument(skip(self))]
    pub async fn recent(&self, limit: usize) -> Result<Vec<ActivityWithDeal>, RemoteError> {
        let query = Query::table(ACTIVITIES_TABLE)
            .select("*, deals(title)")
            .order("created_at", false)
            .limit(limit);
        self.api.select(&query).await
    }

    /// # Errors
    ///
    /// `PGRST116` when no such activity is visible; otherwise the backend error.
    #[instrument(skip(self))]
    pub async fn get_by_id(&self, id: ActivityId) -> Result<Activity, RemoteError> {
        self.api
            .select_single(&Query::table(ACTIVITIES_TABLE).eq("id", id))
            .await
    }

    /// # Errors
    ///
    /// Returns the backend error unchanged.
    #[instrument(skip_all, fields(deal_id = %activity.deal_id, kind = %activity.kind))]
    pub async fn create(&self, activity: &NewActivity) -> Result<Activity, RemoteError> {
        self.api.insert(ACTIVITIES_TABLE, activity).await
    }

    /// # Errors
    ///
    /// Returns the backend error unchanged.
    #[instrument(skip(self, patch))]
    pub async fn update(
        &self,
        id: ActivityId,
        patch: &ActivityPatch,
    ) -> Result<Activity, RemoteError> {
        self.api
            .update(&Query::table(ACTIVITIES_TABLE).eq("id", id), patch)
            .await
    }

    /// # Errors
    ///
    /// Returns the backend error unchanged.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: ActivityId) -> Result<(), RemoteError> {
        self.api
            .delete(&Query::table(ACTIVITIES_TABLE).eq("id", id))
            .await
    }
}
