//! PostgREST remote backed by a Supabase project.

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;

use crate::auth::{parse_api_error, AuthState};
use crate::config::SupabaseEndpoint;
use crate::models::Table;

use super::remote::{RemoteError, RemoteResult, RemoteStore};

/// Remote store speaking to `/rest/v1` with the signed-in user's token
#[derive(Clone)]
pub struct SupabaseRemote {
    rest_url: String,
    anon_key: String,
    client: Client,
    auth: AuthState,
}

impl SupabaseRemote {
    pub fn new(endpoint: &SupabaseEndpoint, auth: AuthState) -> RemoteResult<Self> {
        let base = endpoint.url.trim().trim_end_matches('/');
        let rest_url = if base.ends_with("/rest/v1") {
            base.to_string()
        } else {
            format!("{base}/rest/v1")
        };

        Ok(Self {
            rest_url,
            anon_key: endpoint.anon_key.clone(),
            client: Client::builder().build()?,
            auth,
        })
    }

    fn collection_url(&self, collection: Table) -> String {
        format!("{}/{}", self.rest_url, collection.as_str())
    }

    /// Attach the project key and the user's bearer token
    ///
    /// Row-level security scopes every request to the signed-in user.
    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let token = self
            .auth
            .access_token()
            .unwrap_or_else(|| self.anon_key.clone());
        request
            .header("apikey", &self.anon_key)
            .bearer_auth(token)
            .header("Accept", "application/json")
    }

    async fn rows(response: Response) -> RemoteResult<Vec<Value>> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Api {
                status: status.as_u16(),
                message: parse_api_error(status, &body),
            });
        }
        Ok(response.json::<Vec<Value>>().await?)
    }
}

impl RemoteStore for SupabaseRemote {
    async fn insert(&self, collection: Table, row: Value) -> RemoteResult<Value> {
        let request = self.authorized(
            self.client
                .post(self.collection_url(collection))
                .header("Prefer", "return=representation")
                .json(&row),
        );
        Self::rows(request.send().await?)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                RemoteError::InvalidPayload(format!("insert into {collection} returned no row"))
            })
    }

    async fn update(&self, collection: Table, id: &str, patch: Value) -> RemoteResult<Value> {
        let request = self.authorized(
            self.client
                .patch(self.collection_url(collection))
                .query(&[("id", format!("eq.{id}"))])
                .header("Prefer", "return=representation")
                .json(&patch),
        );
        Self::rows(request.send().await?)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RemoteError::NotFound(format!("{collection}/{id}")))
    }

    async fn select_changed(
        &self,
        collection: Table,
        since: Option<DateTime<Utc>>,
    ) -> RemoteResult<Vec<Value>> {
        let mut query = vec![
            ("select", "*".to_string()),
            ("deleted_at", "is.null".to_string()),
            ("order", "updated_at.asc".to_string()),
        ];
        if let Some(since) = since {
            query.push((
                "updated_at",
                format!("gte.{}", since.to_rfc3339_opts(SecondsFormat::Millis, true)),
            ));
        }

        let request = self.authorized(
            self.client
                .get(self.collection_url(collection))
                .query(&query),
        );
        Self::rows(request.send().await?).await
    }
}
