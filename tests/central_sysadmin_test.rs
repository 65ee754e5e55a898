//! Central-topology sysadmin routing: a worker's sysadmin requests
//! follow the assignment store, and a reassignment re-routes the very
//! next call.

use flock::boot::FlockNode;
use flock::config::{FlockConfig, GatewayAgentConfig, RemoteNodeConfig, Topology};
use flock::domain::{AgentRole, TaskState};
use flock::domain_types::{AgentId, NodeId};
use tempfile::TempDir;
use tokio::net::TcpListener;

fn agent(name: &str) -> AgentId {
    AgentId::try_new(name.to_string()).unwrap()
}

fn node_id(name: &str) -> NodeId {
    NodeId::try_new(name.to_string()).unwrap()
}

async fn launch_worker_node(name: &str, listener: TcpListener) -> (FlockNode, TempDir) {
    let data_dir = TempDir::new().unwrap();
    let config = FlockConfig {
        data_dir: data_dir.path().to_string_lossy().to_string(),
        node_id: name.to_string(),
        gateway_agents: vec![GatewayAgentConfig {
            id: "sysadmin".to_string(),
            role: Some(AgentRole::Sysadmin),
            archetype: None,
            model: None,
            system_prompt: None,
        }],
        ..FlockConfig::default()
    };
    let node = FlockNode::boot(config).await.unwrap();
    let router = node.server.router();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (node, data_dir)
}

#[tokio::test]
async fn test_should_reroute_sysadmin_requests_when_assignment_changes() {
    let listener1 = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let listener2 = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint1 = format!("http://{}/flock", listener1.local_addr().unwrap());
    let endpoint2 = format!("http://{}/flock", listener2.local_addr().unwrap());

    let (worker_node_1, _dir1) = launch_worker_node("worker-node-1", listener1).await;
    let (worker_node_2, _dir2) = launch_worker_node("worker-node-2", listener2).await;

    // Central node: hosts the worker session, routes sysadmin traffic by
    // assignment.
    let central_dir = TempDir::new().unwrap();
    let central_config = FlockConfig {
        data_dir: central_dir.path().to_string_lossy().to_string(),
        node_id: "central".to_string(),
        topology: Topology::Central,
        remote_nodes: vec![
            RemoteNodeConfig {
                node_id: "worker-node-1".to_string(),
                a2a_endpoint: endpoint1,
            },
            RemoteNodeConfig {
                node_id: "worker-node-2".to_string(),
                a2a_endpoint: endpoint2,
            },
        ],
        gateway_agents: vec![GatewayAgentConfig {
            id: "worker-alpha".to_string(),
            role: None,
            archetype: None,
            model: None,
            system_prompt: None,
        }],
        ..FlockConfig::default()
    };
    let central = FlockNode::boot(central_config).await.unwrap();
    let assignments = central.assignments.clone().expect("central topology has assignments");

    // Initially assigned to worker-node-1.
    assignments
        .reassign(&agent("worker-alpha"), node_id("worker-node-1"))
        .unwrap();

    let first = central
        .client
        .send_message(&agent("worker-alpha"), &agent("sysadmin"), "check the disk", None)
        .await
        .unwrap();
    assert_eq!(first.status.state, TaskState::Completed);
    let first_text = first.response_text().unwrap();
    assert!(first_text.contains("worker-node-1"), "got: {first_text}");

    // Reassignment re-routes the very next identical request.
    assignments
        .reassign(&agent("worker-alpha"), node_id("worker-node-2"))
        .unwrap();

    let second = central
        .client
        .send_message(&agent("worker-alpha"), &agent("sysadmin"), "check the disk", None)
        .await
        .unwrap();
    let second_text = second.response_text().unwrap();
    assert!(second_text.contains("worker-node-2"), "got: {second_text}");
    assert!(
        !second_text.contains("worker-node-1"),
        "got: {second_text}"
    );

    central.shutdown().await;
    worker_node_1.shutdown().await;
    worker_node_2.shutdown().await;
}

#[tokio::test]
async fn test_should_keep_worker_traffic_local_when_topology_is_central() {
    let central_dir = TempDir::new().unwrap();
    let config = FlockConfig {
        data_dir: central_dir.path().to_string_lossy().to_string(),
        node_id: "central".to_string(),
        topology: Topology::Central,
        gateway_agents: vec![
            GatewayAgentConfig {
                id: "worker-alpha".to_string(),
                role: None,
                archetype: None,
                model: None,
                system_prompt: None,
            },
            GatewayAgentConfig {
                id: "worker-beta".to_string(),
                role: None,
                archetype: None,
                model: None,
                system_prompt: None,
            },
        ],
        ..FlockConfig::default()
    };
    let central = FlockNode::boot(config).await.unwrap();

    // No HTTP server is running at all; worker-to-worker still works
    // because central mode dispatches in-process.
    let view = central
        .client
        .send_message(&agent("worker-alpha"), &agent("worker-beta"), "ping", None)
        .await
        .unwrap();
    assert_eq!(view.status.state, TaskState::Completed);
    assert!(view.response_text().unwrap().contains("ping"));

    central.shutdown().await;
}
