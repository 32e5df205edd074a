//! Contacts.

use pipecrm_core::ContactId;
use tracing::instrument;

use crate::models::{Contact, ContactPatch, NewContact};
use crate::supabase::{DataApi, Query, RemoteError};

pub const CONTACTS_TABLE: &str = "contacts";

/// Contact operations.
#[derive(Debug, Clone)]
pub struct ContactsService<D> {
    api: D,
}

impl<D: DataApi> ContactsService<D> {
    #[must_use]
    pub const fn new(api: D) -> Self {
        Self { api }
    }

    /// Contacts newest first.
    ///
    /// # Errors
    ///
    /// Returns the backend error unchanged.
    #[instrument(skip(self))]
    pub async fn list(&self) -> Result<Vec<Contact>, RemoteError> {
        let query = Query::table(CONTACTS_TABLE).order("created_at", false);
        self.api.select(&query).await
    }

    /// # Errors
    ///
    /// `PGRST116` when no such contact is visible; otherwise the backend error.
    #[instrument(skip(self))]
    pub async fn get_by_id(&self, id: ContactId) -> Result<Contact, RemoteError> {
        self.api
            .select_single(&Query::table(CONTACTS_TABLE).eq("id", id))
            .await
    }

    /// # Errors
    ///
    /// Returns the backend error unchanged.
    #[instrument(skip_all, fields(name = %contact.name))]
    pub async fn create(&self, contact: &NewContact) -> Result<Contact, RemoteError> {
        self.api.insert(CONTACTS_TABLE, contact).await
    }

    /// # Errors
    ///
    /// Returns the backend error unchanged.
    #[instrument(skip(self, patch))]
    pub async fn update(&self, id: ContactId, patch: &ContactPatch) -> Result<Contact, RemoteError> {
        self.api
            .update(&Query::table(CONTACTS_TABLE).eq("id", id), patch)
            .await
    }

    /// # Errors
    ///
    /// Returns the backend error unchanged.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: ContactId) -> Result<(), RemoteError> {
        self.api
            .delete(&Query::table(CONTACTS_TABLE).eq("id", id))
            .await
    }
}
