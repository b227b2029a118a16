//! The resource manager collaborator: four read endpoints and the
//! configuration update.

use queues::labels::parse_nodes;
use queues::{ApplyResponse, ClusterNode, NodeLabelCatalog, QueueTree, RuntimeOverlay, UpdateRequest};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tracing::{debug, info};

use crate::error::{ConsoleError, Result};

pub const SCHEDULER_PATH: &str = "/ws/v1/cluster/scheduler";
pub const SCHEDULER_CONF_PATH: &str = "/ws/v1/cluster/scheduler-conf";
pub const NODE_LABELS_PATH: &str = "/ws/v1/cluster/get-node-labels";
pub const NODES_PATH: &str = "/ws/v1/cluster/nodes";

/// Single-shot calls with no retry. Retrying is up to the caller.
#[allow(async_fn_in_trait)]
pub trait SchedulerApi {
    async fn fetch_configuration(&self) -> Result<QueueTree>;
    async fn fetch_scheduler_info(&self) -> Result<RuntimeOverlay>;
    async fn fetch_node_labels(&self) -> Result<NodeLabelCatalog>;
    async fn fetch_nodes(&self) -> Result<Vec<ClusterNode>>;
    /// Send the update. Any HTTP answer is a response; only a failure to
    /// get one is an error.
    async fn apply(&self, request: &UpdateRequest) -> Result<ApplyResponse>;
}

fn url_fixup(base: &str) -> String {
    base.trim().trim_end_matches('/').to_string()
}

pub struct RestClient {
    base_url: String,
    user: Option<String>,
    client: reqwest::Client,
}

impl RestClient {
    pub fn new(base_url: &str, user: Option<String>) -> Result<Self> {
        let base_url = url_fixup(base_url);
        let client = reqwest::Client::builder()
            .build()
            .map_err(|source| ConsoleError::Http {
                url: base_url.clone(),
                source,
            })?;
        Ok(Self {
            base_url,
            user,
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        match &self.user {
            Some(user) => format!("{}{path}?user.name={user}", self.base_url),
            None => format!("{}{path}", self.base_url),
        }
    }

    async fn get_text(&self, path: &str) -> Result<String> {
        let url = self.url(path);
        debug!(url = %url, "GET");
        let http_error = |source| ConsoleError::Http {
            url: url.clone(),
            source,
        };
        let response = self
            .client
            .get(&url)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(http_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(ConsoleError::Status {
                url: url.clone(),
                status: status.as_u16(),
            });
        }
        response.text().await.map_err(http_error)
    }
}

impl SchedulerApi for RestClient {
    async fn fetch_configuration(&self) -> Result<QueueTree> {
        let body = self.get_text(SCHEDULER_CONF_PATH).await?;
        QueueTree::from_json(&body).map_err(|source| ConsoleError::Decode {
            what: "scheduler configuration",
            source,
        })
    }

    async fn fetch_scheduler_info(&self) -> Result<RuntimeOverlay> {
        let body = self.get_text(SCHEDULER_PATH).await?;
        RuntimeOverlay::from_json(&body).map_err(|source| ConsoleError::Decode {
            what: "scheduler info",
            source,
        })
    }

    async fn fetch_node_labels(&self) -> Result<NodeLabelCatalog> {
        let body = self.get_text(NODE_LABELS_PATH).await?;
        NodeLabelCatalog::from_json(&body).map_err(|source| ConsoleError::Decode {
            what: "node labels",
            source,
        })
    }

    async fn fetch_nodes(&self) -> Result<Vec<ClusterNode>> {
        let body = self.get_text(NODES_PATH).await?;
        parse_nodes(&body).map_err(|source| ConsoleError::Decode {
            what: "cluster nodes",
            source,
        })
    }

    async fn apply(&self, request: &UpdateRequest) -> Result<ApplyResponse> {
        let url = self.url(SCHEDULER_CONF_PATH);
        let body = request.to_json().map_err(|source| ConsoleError::Decode {
            what: "update request",
            source,
        })?;
        info!(url = %url, "PUT configuration update");
        let http_error = |source| ConsoleError::Http {
            url: url.clone(),
            source,
        };
        let response = self
            .client
            .put(&url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(http_error)?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(http_error)?;
        Ok(ApplyResponse::new(status, text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_fixup_removes_trailing_slashes() {
        assert_eq!(url_fixup(" http://rm:8088// "), "http://rm:8088");
    }

    #[test]
    fn test_user_name_is_appended() {
        let client = RestClient::new("http://rm:8088/", Some("yarn".into())).unwrap();
        assert_eq!(
            client.url(SCHEDULER_CONF_PATH),
            "http://rm:8088/ws/v1/cluster/scheduler-conf?user.name=yarn"
        );
        let anonymous = RestClient::new("http://rm:8088", None).unwrap();
        assert_eq!(anonymous.url(NODES_PATH), "http://rm:8088/ws/v1/cluster/nodes");
    }
}
