//! Outbound A2A client
//!
//! The single façade agents and the scheduler use to talk to other
//! agents. Consults the routing fabric per message, then either
//! dispatches in-process to the local A2A server or POSTs JSON-RPC to the
//! resolved endpoint. Remote responses are parsed into the same
//! task/artifact shape as local ones, so callers are topology-agnostic.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument};

use crate::a2a::rpc::{JsonRpcRequest, JsonRpcResponse, TaskView};
use crate::a2a::server::A2aServer;
use crate::domain::{A2aMessage, FlockMeta};
use crate::domain_types::AgentId;
use crate::error::{FlockError, Result};
use crate::routing::{Resolution, RoutingFabric};

const HTTP_TIMEOUT: Duration = Duration::from_secs(180);

/// Topology-agnostic outbound message façade
#[derive(Clone)]
pub struct A2aClient {
    local: Arc<A2aServer>,
    fabric: RoutingFabric,
    http: reqwest::Client,
}

impl A2aClient {
    /// Creates a client over the local server and routing fabric
    pub fn new(local: Arc<A2aServer>, fabric: RoutingFabric) -> Self {
        Self {
            local,
            fabric,
            http: reqwest::Client::builder()
                .timeout(HTTP_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    /// Sends a text message (plus optional metadata) from one agent to
    /// another and returns the resulting task.
    #[instrument(skip(self, text, meta), fields(from = %from, to = %to))]
    pub async fn send_message(
        &self,
        from: &AgentId,
        to: &AgentId,
        text: &str,
        meta: Option<&FlockMeta>,
    ) -> Result<TaskView> {
        let message = A2aMessage::build(text, meta, None);
        let request = JsonRpcRequest::new(
            "message/send",
            serde_json::json!({
                "message": message,
                "from": from.to_string(),
            }),
        );
        self.dispatch(from, to, request).await
    }

    /// Fetches a task by id from wherever the agent lives
    pub async fn get_task(&self, from: &AgentId, to: &AgentId, task_id: &str) -> Result<TaskView> {
        let request = JsonRpcRequest::new("tasks/get", serde_json::json!({ "id": task_id }));
        self.dispatch(from, to, request).await
    }

    /// Cancels a task by id
    pub async fn cancel_task(&self, from: &AgentId, to: &AgentId, task_id: &str) -> Result<TaskView> {
        let request = JsonRpcRequest::new("tasks/cancel", serde_json::json!({ "id": task_id }));
        self.dispatch(from, to, request).await
    }

    async fn dispatch(
        &self,
        from: &AgentId,
        to: &AgentId,
        request: JsonRpcRequest,
    ) -> Result<TaskView> {
        let response = match self.fabric.resolve(from, to) {
            Resolution::Local => {
                debug!("dispatching locally");
                self.local.handle_rpc(to.as_str(), request).await
            }
            Resolution::Remote { endpoint, node_id } => {
                debug!(endpoint = %endpoint, node = %node_id, "dispatching over HTTP");
                let url = format!("{endpoint}/a2a/{to}");
                self.http
                    .post(&url)
                    .json(&request)
                    .send()
                    .await?
                    .json::<JsonRpcResponse>()
                    .await?
            }
        };
        Self::into_task_view(response)
    }

    fn into_task_view(response: JsonRpcResponse) -> Result<TaskView> {
        if let Some(error) = response.error {
            let code = error
                .data
                .as_ref()
                .and_then(|data| data.get("code"))
                .and_then(|code| code.as_str())
                .unwrap_or("PEER_ERROR")
                .to_string();
            return Err(FlockError::PeerRejected {
                code,
                message: error.message,
            });
        }
        let result = response
            .result
            .ok_or_else(|| FlockError::internal("peer returned neither result nor error"))?;
        Ok(serde_json::from_value(result)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::a2a::rpc::JsonRpcError;
    use crate::domain::TaskState;

    #[test]
    fn test_should_parse_task_view_when_response_carries_result() {
        let view = TaskView::new("task-1", "ctx-1", TaskState::Completed);
        let response = JsonRpcResponse::ok(
            serde_json::json!(1),
            serde_json::to_value(&view).unwrap(),
        );
        let parsed = A2aClient::into_task_view(response).unwrap();
        assert_eq!(parsed, view);
    }

    #[test]
    fn test_should_surface_peer_code_when_response_is_error() {
        let response = JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            id: serde_json::json!(1),
            result: None,
            error: Some(JsonRpcError {
                code: -32001,
                message: "agent worker-1 already has an active migration (mig-1)".to_string(),
                data: Some(serde_json::json!({ "code": "DUPLICATE_MIGRATION" })),
            }),
        };
        let err = A2aClient::into_task_view(response).unwrap_err();
        match err {
            FlockError::PeerRejected { code, message } => {
                assert_eq!(code, "DUPLICATE_MIGRATION");
                assert!(message.contains("already has an active migration"));
            }
            other => panic!("expected PeerRejected, got {other}"),
        }
    }
}
