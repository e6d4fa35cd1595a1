//! Backend endpoint shapes
//!
//! Maps a [`RequestTask`] to the URL it is fetched from. With a web
//! `client_id` the JSON API is used (`/users/{id}`, `/resolve`,
//! `/search/users`); without one, profile URLs and keyword searches fall
//! back to the public HTML pages whose hydration block carries the same data.

use url::Url;

use crate::domain::{HarvestError, RequestTask, TaskTarget};
use crate::infrastructure::config::{BackendConfig, CursorMode};

#[derive(Debug, Clone)]
pub struct BackendEndpoints {
    config: BackendConfig,
}

impl BackendEndpoints {
    #[must_use]
    pub fn new(config: BackendConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn page_size(&self) -> u32 {
        self.config.page_size
    }

    #[must_use]
    pub const fn cursor_mode(&self) -> CursorMode {
        self.config.cursor_mode
    }

    /// URL for one request task
    pub fn url_for(&self, task: &RequestTask) -> Result<String, HarvestError> {
        match &task.target {
            TaskTarget::ProfileId(id) => {
                let client_id = self.require_client_id("profile lookup by id")?;
                let url = self.api_url(&format!("users/{id}"), &[("client_id", client_id)])?;
                Ok(url.into())
            }
            TaskTarget::ProfileUrl(raw) => {
                let profile = self.normalize_profile_url(raw)?;
                match self.config.client_id.as_deref() {
                    Some(client_id) => {
                        let url = self.api_url(
                            "resolve",
                            &[("url", profile.as_str()), ("client_id", client_id)],
                        )?;
                        Ok(url.into())
                    }
                    None => Ok(profile),
                }
            }
            TaskTarget::Keyword { query, offset } => {
                let query = query.trim();
                if query.is_empty() {
                    return Err(HarvestError::fatal(None, "keyword cannot be empty"));
                }
                match self.config.client_id.as_deref() {
                    Some(client_id) => {
                        let limit = self.config.page_size.to_string();
                        let offset = offset.to_string();
                        let url = self.api_url(
                            "search/users",
                            &[
                                ("q", query),
                                ("limit", limit.as_str()),
                                ("offset", offset.as_str()),
                                ("linked_partitioning", "1"),
                                ("client_id", client_id),
                            ],
                        )?;
                        Ok(url.into())
                    }
                    None => {
                        let url = self.site_url("search/people", &[("q", query)])?;
                        Ok(url.into())
                    }
                }
            }
            TaskTarget::Cursor(token) => self.cursor_url(token),
        }
    }

    /// Trim and absolutize a profile URL against the site base
    pub fn normalize_profile_url(&self, raw: &str) -> Result<String, HarvestError> {
        let trimmed = raw.trim();
        if trimmed.starts_with("http") {
            return Url::parse(trimmed)
                .map(String::from)
                .map_err(|e| HarvestError::fatal(None, format!("invalid profile URL '{trimmed}': {e}")));
        }
        let path = trimmed.trim_start_matches('/');
        if path.is_empty() {
            return Err(HarvestError::fatal(None, "profile URL cannot be empty"));
        }
        self.site_url(path, &[]).map(String::from)
    }

    /// Continuation tokens are `next_href` URLs; relative ones are joined to
    /// the API base and the client id is re-attached when missing
    fn cursor_url(&self, token: &str) -> Result<String, HarvestError> {
        let mut url = if token.starts_with("http") {
            Url::parse(token)
        } else {
            self.base(&self.config.api_base_url)?.join(token.trim_start_matches('/'))
        }
        .map_err(|e| HarvestError::fatal(None, format!("invalid cursor '{token}': {e}")))?;

        if let Some(client_id) = self.config.client_id.as_deref() {
            if !url.query_pairs().any(|(k, _)| k == "client_id") {
                url.query_pairs_mut().append_pair("client_id", client_id);
            }
        }
        Ok(url.into())
    }

    fn require_client_id(&self, what: &str) -> Result<&str, HarvestError> {
        self.config.client_id.as_deref().ok_or_else(|| {
            HarvestError::Configuration(format!("{what} requires backend.client_id"))
        })
    }

    fn base(&self, raw: &str) -> Result<Url, HarvestError> {
        Url::parse(&format!("{}/", raw.trim_end_matches('/')))
            .map_err(|e| HarvestError::Configuration(format!("invalid base URL '{raw}': {e}")))
    }

    fn api_url(&self, path: &str, query: &[(&str, &str)]) -> Result<Url, HarvestError> {
        self.join(&self.config.api_base_url, path, query)
    }

    fn site_url(&self, path: &str, query: &[(&str, &str)]) -> Result<Url, HarvestError> {
        self.join(&self.config.site_base_url, path, query)
    }

    fn join(&self, base: &str, path: &str, query: &[(&str, &str)]) -> Result<Url, HarvestError> {
        let mut url = self
            .base(base)?
            .join(path)
            .map_err(|e| HarvestError::Configuration(format!("invalid path '{path}': {e}")))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }
}
