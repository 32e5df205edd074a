//! PostgREST endpoints.

use reqwest::header::ACCEPT;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};
use url::Url;

use super::error::ApiErrorBody;
use super::{DataApi, Query, RemoteError, SupabaseClient};

/// Ask PostgREST for a single JSON object instead of an array.
const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";

impl SupabaseClient {
    fn table_url(&self, table: &str) -> Result<Url, RemoteError> {
        self.endpoint("rest", &format!("/{table}"))
    }

    fn query_url(&self, query: &Query) -> Result<Url, RemoteError> {
        let mut url = self.table_url(query.table_name())?;
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query.to_params() {
                pairs.append_pair(&key, &value);
            }
        }
        Ok(url)
    }

    /// Filter-only URL for updates and deletes.
    fn filter_url(&self, query: &Query) -> Result<Url, RemoteError> {
        let mut url = self.table_url(query.table_name())?;
        {
            let mut pairs = url.query_pairs_mut();
            for (column, value) in query.filters() {
                pairs.append_pair(column, &format!("eq.{value}"));
            }
        }
        Ok(url)
    }
}

impl DataApi for SupabaseClient {
    #[instrument(skip(self), fields(table = query.table_name()))]
    async fn select<T: DeserializeOwned + Send>(&self, query: &Query) -> Result<Vec<T>, RemoteError> {
        let url = self.query_url(query)?;
        let bearer = self.bearer().await?;
        let response = self.inner.http.get(url).bearer_auth(bearer).send().await?;
        let rows: Vec<T> = handle_api_response(response).await?;
        debug!(rows = rows.len(), "Selected rows");
        Ok(rows)
    }

    #[instrument(skip(self), fields(table = query.table_name()))]
    async fn select_single<T: DeserializeOwned + Send>(&self, query: &Query) -> Result<T, RemoteError> {
        let url = self.query_url(query)?;
        let bearer = self.bearer().await?;
        let response = self
            .inner
            .http
            .get(url)
            .bearer_auth(bearer)
            .header(ACCEPT, SINGLE_OBJECT)
            .send()
            .await?;
        handle_api_response(response).await
    }

    #[instrument(skip(self, row))]
    async fn insert<B: Serialize + Sync, T: DeserializeOwned + Send>(
        &self,
        table: &str,
        row: &B,
    ) -> Result<T, RemoteError> {
        let url = self.table_url(table)?;
        let bearer = self.bearer().await?;
        let response = self
            .inner
            .http
            .post(url)
            .bearer_auth(bearer)
            .header("Prefer", "return=representation")
            .header(ACCEPT, SINGLE_OBJECT)
            .json(row)
            .send()
            .await?;
        handle_api_response(response).await
    }

    #[instrument(skip(self, rows), fields(count = rows.len()))]
    async fn insert_many<B: Serialize + Sync>(&self, table: &str, rows: &[B]) -> Result<(), RemoteError> {
        let url = self.table_url(table)?;
        let bearer = self.bearer().await?;
        let response = self
            .inner
            .http
            .post(url)
            .bearer_auth(bearer)
            .header("Prefer", "return=minimal")
            .json(rows)
            .send()
            .await?;

        if response.status().is_success() {
            return Ok(());
        }
        Err(parse_api_error(response).await)
    }

    #[instrument(skip(self, patch), fields(table = query.table_name()))]
    async fn update<B: Serialize + Sync, T: DeserializeOwned + Send>(
        &self,
        query: &Query,
        patch: &B,
    ) -> Result<T, RemoteError> {
        let url = self.filter_url(query)?;
        let bearer = self.bearer().await?;
        let response = self
            .inner
            .http
            .patch(url)
            .bearer_auth(bearer)
            .header("Prefer", "return=representation")
            .header(ACCEPT, SINGLE_OBJECT)
            .json(patch)
            .send()
            .await?;
        handle_api_response(response).await
    }

    #[instrument(skip(self), fields(table = query.table_name()))]
    async fn delete(&self, query: &Query) -> Result<(), RemoteError> {
        let url = self.filter_url(query)?;
        let bearer = self.bearer().await?;
        let response = self.inner.http.delete(url).bearer_auth(bearer).send().await?;

        if response.status().is_success() {
            return Ok(());
        }
        Err(parse_api_error(response).await)
    }

    #[instrument(skip(self, row))]
    async fn upsert<B: Serialize + Sync>(
        &self,
        table: &str,
        row: &B,
        on_conflict: &str,
    ) -> Result<(), RemoteError> {
        let mut url = self.table_url(table)?;
        url.query_pairs_mut().append_pair("on_conflict", on_conflict);
        let bearer = self.bearer().await?;
        let response = self
            .inner
            .http
            .post(url)
            .bearer_auth(bearer)
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(row)
            .send()
            .await?;

        if response.status().is_success() {
            return Ok(());
        }
        Err(parse_api_error(response).await)
    }
}

/// Handle a data API response and parse JSON.
async fn handle_api_response<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, RemoteError> {
    if response.status().is_success() {
        return response
            .json()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()));
    }

    Err(parse_api_error(response).await)
}

/// Parse an error response from the data API.
async fn parse_api_error(response: reqwest::Response) -> RemoteError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    serde_json::from_str::<ApiErrorBody>(&body)
        .unwrap_or_default()
        .into_error(status)
}
