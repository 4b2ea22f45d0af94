//! Escalation collaborator: once the automatic recovery budget is spent,
//! the boundary files a high-priority task through the workflow API and
//! fires a follow-up notification referencing the created task.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::SentinelError;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalationTask {
    pub task_type: String,
    pub title: String,
    /// Embeds the error message, stack and component stack.
    pub description: String,
    pub priority: String,
    pub assignee: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct NotifyRequest<'a> {
    task_id: &'a str,
    message: &'a str,
}

#[async_trait]
pub trait EscalationChannel: Send + Sync {
    /// Create the workflow task; returns the created task id.
    async fn create_task(&self, task: &EscalationTask) -> Result<String, SentinelError>;
    /// Follow-up human/agent notification referencing the created task.
    async fn notify(&self, task_id: &str, message: &str) -> Result<(), SentinelError>;
}

pub struct HttpEscalationChannel {
    client: reqwest::Client,
    task_endpoint: url::Url,
    notify_endpoint: url::Url,
}

impl HttpEscalationChannel {
    pub fn new(client: reqwest::Client, task_endpoint: url::Url, notify_endpoint: url::Url) -> Self {
        Self {
            client,
            task_endpoint,
            notify_endpoint,
        }
    }
}

#[async_trait]
impl EscalationChannel for HttpEscalationChannel {
    async fn create_task(&self, task: &EscalationTask) -> Result<String, SentinelError> {
        let response = self
            .client
            .post(self.task_endpoint.clone())
            .json(task)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SentinelError::Endpoint {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let body: serde_json::Value = response.json().await?;
        body.get("id")
            .or_else(|| body.get("taskId"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| SentinelError::Internal("Task response missing id".into()))
    }

    async fn notify(&self, task_id: &str, message: &str) -> Result<(), SentinelError> {
        let response = self
            .client
            .post(self.notify_endpoint.clone())
            .json(&NotifyRequest { task_id, message })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SentinelError::Endpoint {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }
}
