//! Read-only client for the external profile directory. Only decorates read
//! responses; never sits on the send path. Every failure mode degrades to
//! "Unknown User" placeholders.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileKind {
    User,
    Business,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: String,
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    pub kind: ProfileKind,
    #[serde(default)]
    pub is_online: bool,
    #[serde(default)]
    pub business_hours: Option<String>,
}

impl Profile {
    pub fn unknown(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            display_name: "Unknown User".to_string(),
            avatar_url: None,
            kind: ProfileKind::User,
            is_online: false,
            business_hours: None,
        }
    }
}

#[derive(Clone)]
pub struct ProfileDirectoryClient {
    http: reqwest::Client,
    base_url: Option<String>,
}

impl ProfileDirectoryClient {
    /// `base_url` unset means the directory is not deployed; lookups then
    /// resolve to placeholders without any network traffic.
    pub fn new(base_url: Option<String>) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AppError::Config(format!("profile client: {e}")))?;
        Ok(Self { http, base_url })
    }

    /// Batch lookup. The result always contains an entry for every requested
    /// id; ids the directory does not know come back as placeholders.
    pub async fn get_profiles(&self, ids: &[String]) -> HashMap<String, Profile> {
        let mut result: HashMap<String, Profile> =
            ids.iter().map(|id| (id.clone(), Profile::unknown(id))).collect();

        let Some(base) = &self.base_url else {
            return result;
        };
        if ids.is_empty() {
            return result;
        }

        let url = format!("{base}/profiles");
        let response = self
            .http
            .get(&url)
            .query(&[("ids", ids.join(","))])
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => match resp.json::<Vec<Profile>>().await {
                Ok(profiles) => {
                    for profile in profiles {
                        if result.contains_key(&profile.user_id) {
                            result.insert(profile.user_id.clone(), profile);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "profile directory returned malformed payload");
                }
            },
            Ok(resp) => {
                tracing::warn!(status = %resp.status(), "profile directory lookup failed");
            }
            Err(e) => {
                tracing::warn!(error = %e, "profile directory unreachable");
            }
        }

        result
    }

    /// Full directory listing for `GET /api/users`. Unconfigured or failing
    /// directories yield an empty listing.
    pub async fn list_all(&self) -> Vec<Profile> {
        let Some(base) = &self.base_url else {
            return Vec::new();
        };
        match self.http.get(format!("{base}/profiles")).send().await {
            Ok(resp) if resp.status().is_success() => {
                resp.json::<Vec<Profile>>().await.unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "profile directory returned malformed listing");
                    Vec::new()
                })
            }
            Ok(resp) => {
                tracing::warn!(status = %resp.status(), "profile directory listing failed");
                Vec::new()
            }
            Err(e) => {
                tracing::warn!(error = %e, "profile directory unreachable");
                Vec::new()
            }
        }
    }

    /// Dependency probe for the detailed health endpoint.
    pub async fn status(&self) -> &'static str {
        let Some(base) = &self.base_url else {
            return "unconfigured";
        };
        match self.http.get(format!("{base}/health")).send().await {
            Ok(resp) if resp.status().is_success() => "ok",
            Ok(_) | Err(_) => "unreachable",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_directory_yields_placeholders() {
        let client = ProfileDirectoryClient::new(None).unwrap();
        let profiles = client.get_profiles(&["u1".to_string(), "u2".to_string()]).await;

        assert_eq!(profiles.len(), 2);
        let u1 = &profiles["u1"];
        assert_eq!(u1.display_name, "Unknown User");
        assert!(u1.avatar_url.is_none());
        assert!(!u1.is_online);
    }

    #[tokio::test]
    async fn unconfigured_directory_lists_nothing_and_reports_it() {
        let client = ProfileDirectoryClient::new(None).unwrap();
        assert!(client.list_all().await.is_empty());
        assert_eq!(client.status().await, "unconfigured");
    }

    #[tokio::test]
    async fn empty_request_is_empty_result() {
        let client = ProfileDirectoryClient::new(None).unwrap();
        assert!(client.get_profiles(&[]).await.is_empty());
    }
}
