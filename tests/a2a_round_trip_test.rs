//! Cross-node A2A round-trip over real HTTP: two booted nodes on
//! ephemeral ports, each registered in the other's node registry.

use flock::boot::FlockNode;
use flock::config::{FlockConfig, GatewayAgentConfig, RemoteNodeConfig};
use flock::domain::TaskState;
use flock::domain_types::{AgentId, NodeId};
use tempfile::TempDir;
use tokio::net::TcpListener;

fn agent(name: &str) -> AgentId {
    AgentId::try_new(name.to_string()).unwrap()
}

fn worker_config(agent_id: &str) -> GatewayAgentConfig {
    GatewayAgentConfig {
        id: agent_id.to_string(),
        role: None,
        archetype: None,
        model: None,
        system_prompt: None,
    }
}

struct LiveNode {
    node: FlockNode,
    endpoint: String,
    #[allow(dead_code)]
    data_dir: TempDir,
}

/// Binds an ephemeral port first so peers can know the endpoint before
/// the node boots.
async fn launch(
    node_id: &str,
    agents: &[&str],
    listener: TcpListener,
    peers: Vec<RemoteNodeConfig>,
) -> LiveNode {
    let addr = listener.local_addr().unwrap();
    let endpoint = format!("http://{addr}/flock");
    let data_dir = TempDir::new().unwrap();
    let config = FlockConfig {
        data_dir: data_dir.path().to_string_lossy().to_string(),
        node_id: node_id.to_string(),
        remote_nodes: peers,
        gateway_agents: agents.iter().map(|id| worker_config(id)).collect(),
        ..FlockConfig::default()
    };
    let node = FlockNode::boot(config).await.unwrap();
    let router = node.server.router();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    LiveNode {
        node,
        endpoint,
        data_dir,
    }
}

#[tokio::test]
async fn test_should_round_trip_message_when_target_lives_on_other_node() {
    let listener1 = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let listener2 = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint1 = format!("http://{}/flock", listener1.local_addr().unwrap());
    let endpoint2 = format!("http://{}/flock", listener2.local_addr().unwrap());

    let node1 = launch(
        "node-1",
        &["worker-alpha"],
        listener1,
        vec![RemoteNodeConfig {
            node_id: "node-2".to_string(),
            a2a_endpoint: endpoint2.clone(),
        }],
    )
    .await;
    let node2 = launch(
        "node-2",
        &["worker-beta"],
        listener2,
        vec![RemoteNodeConfig {
            node_id: "node-1".to_string(),
            a2a_endpoint: endpoint1,
        }],
    )
    .await;

    // Each registry learns which agents the peer hosts.
    node1
        .node
        .registry
        .update_agents(
            &NodeId::try_new("node-2".to_string()).unwrap(),
            vec![agent("worker-beta")],
        )
        .unwrap();
    node2
        .node
        .registry
        .update_agents(
            &NodeId::try_new("node-1".to_string()).unwrap(),
            vec![agent("worker-alpha")],
        )
        .unwrap();

    let view = node1
        .node
        .client
        .send_message(&agent("worker-alpha"), &agent("worker-beta"), "hello from 1", None)
        .await
        .unwrap();
    assert_eq!(view.status.state, TaskState::Completed);
    let response = view.response_text().unwrap();
    assert!(response.contains("hello from 1"), "got: {response}");
    // Answered by node-2's session.
    assert!(response.contains("node-2"), "got: {response}");

    node1.node.shutdown().await;
    node2.node.shutdown().await;
}

#[tokio::test]
async fn test_should_list_exactly_hosted_agents_when_discovering_peer() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let node2 = launch("node-2", &["worker-beta"], listener, Vec::new()).await;

    let directory: serde_json::Value = reqwest::get(format!(
        "{}/.well-known/agent-card.json",
        node2.endpoint
    ))
    .await
    .unwrap()
    .json()
    .await
    .unwrap();

    let agents = directory["agents"].as_array().unwrap();
    assert_eq!(agents.len(), 1);
    assert_eq!(agents[0]["id"], "worker-beta");
    assert_eq!(agents[0]["flockMeta"]["nodeId"], "node-2");

    let card: serde_json::Value = reqwest::get(format!(
        "{}/a2a/worker-beta/agent-card.json",
        node2.endpoint
    ))
    .await
    .unwrap()
    .json()
    .await
    .unwrap();
    assert_eq!(card["name"], "worker-beta");

    node2.node.shutdown().await;
}

#[tokio::test]
async fn test_should_report_health_when_node_is_serving() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let node = launch("node-9", &[], listener, Vec::new()).await;

    let health: serde_json::Value = reqwest::get(format!("{}/health", node.endpoint))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["nodeId"], "node-9");

    node.node.shutdown().await;
}
