use std::sync::Arc;

use serde_json::json;
use warp::Filter;
use zk_discovery::session::MemoryStore;
use zk_discovery::AddressConfig;
use zk_discovery::DiscoveryClient;
use zk_discovery::DiscoveryConfig;
use zk_discovery::RegistrationConfig;
use zk_discovery::ServiceDiscovery;

use crate::common::client_config;
use crate::common::enable_logger;
use crate::common::strings;

/// Fake ECS + EC2 metadata services sharing one listener
fn metadata_server(network_mode: &'static str) -> String {
    let task = warp::path!("v4" / "task").map(move || {
        warp::reply::json(&json!({
            "Cluster": "default",
            "TaskARN": "arn:aws:ecs:us-east-1:123456789012:task/default/abc",
            "Networks": [{
                "NetworkMode": network_mode,
                "IPv4Addresses": ["10.0.2.100"],
            }],
        }))
    });
    let instance = warp::path!("latest" / "meta-data" / "local-ipv4").map(|| "10.0.3.7");

    let (addr, server) = warp::serve(task.or(instance)).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);
    format!("http://{addr}")
}

async fn register_with_metadata(network_mode: &'static str) -> (MemoryStore, String) {
    let base = metadata_server(network_mode);
    let config = DiscoveryConfig {
        registration: RegistrationConfig {
            base_path: "/nodes".to_string(),
            ..Default::default()
        },
        address: AddressConfig {
            ecs_metadata_uri: Some(format!("{base}/v4/task")),
            ec2_metadata_endpoint: Some(base),
            ..Default::default()
        },
        ..Default::default()
    };

    let store = MemoryStore::new();
    let client = DiscoveryClient::new(Arc::new(store.connect()), client_config());
    let discovery = ServiceDiscovery::new(client, &config).unwrap();
    let registration = discovery.register_service(41500, None).await.unwrap();
    (store, registration.path().to_string())
}

#[tokio::test]
async fn awsvpc_task_registers_its_own_ip() {
    enable_logger();
    let (store, path) = register_with_metadata("awsvpc").await;

    assert_eq!(store.data(&path), Some(b"10.0.2.100:41500".to_vec()));
}

#[tokio::test]
async fn bridge_task_registers_the_instance_ip() {
    enable_logger();
    let (store, path) = register_with_metadata("bridge").await;

    assert_eq!(store.data(&path), Some(b"10.0.3.7:41500".to_vec()));

    let observer = DiscoveryClient::new(Arc::new(store.connect()), client_config());
    assert_eq!(
        observer.get_registered_addresses("/nodes").await.unwrap(),
        strings(&["10.0.3.7:41500"])
    );
}
