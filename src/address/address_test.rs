use serde_json::json;
use serial_test::serial;
use temp_env::with_vars;
use warp::Filter;

use super::*;

/// Serves fake ECS task metadata at `/v4/meta` and EC2 metadata at the
/// usual path; returns the base URL.
fn fake_metadata(
    network_mode: &'static str,
    task_ip: &'static str,
    host_ip: &'static str,
) -> String {
    let ecs = warp::path!("v4" / "meta").map(move || {
        warp::reply::json(&json!({
            "Cluster": "default",
            "Networks": [{
                "NetworkMode": network_mode,
                "IPv4Addresses": [task_ip],
            }],
        }))
    });
    let ec2 = warp::path!("latest" / "meta-data" / "local-ipv4").map(move || format!("{host_ip}\n"));

    let (addr, server) = warp::serve(ecs.or(ec2)).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);
    format!("http://{addr}")
}

fn source_for(base: &str) -> AddressSource {
    AddressSource::from_config(&AddressConfig {
        ecs_metadata_uri: Some(format!("{base}/v4/meta")),
        ec2_metadata_endpoint: Some(base.to_string()),
        ..AddressConfig::default()
    })
    .unwrap()
}

#[tokio::test]
async fn awsvpc_mode_uses_task_ip() {
    let base = fake_metadata("awsvpc", "10.0.2.100", "172.31.0.5");

    assert_eq!(source_for(&base).resolve_ip().await.unwrap(), "10.0.2.100");
}

#[tokio::test]
async fn bridge_mode_falls_back_to_instance_metadata() {
    let base = fake_metadata("bridge", "172.17.0.2", "10.0.2.100");

    assert_eq!(source_for(&base).resolve_ip().await.unwrap(), "10.0.2.100");
}

#[tokio::test]
async fn override_wins_over_metadata() {
    let base = fake_metadata("awsvpc", "10.0.2.100", "172.31.0.5");

    let source = source_for(&base).with_override("192.168.1.7");
    assert_eq!(source.resolve_ip().await.unwrap(), "192.168.1.7");
}

#[tokio::test]
async fn missing_networks_is_a_format_error() {
    let route = warp::path!("v4" / "meta").map(|| warp::reply::json(&json!({ "Networks": [] })));
    let (addr, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);

    let err = source_for(&format!("http://{addr}")).resolve_ip().await.unwrap_err();
    assert!(matches!(err, Error::MetadataFormat(_)));
}

#[tokio::test]
async fn http_errors_surface_as_metadata_request() {
    let route = warp::path!("v4" / "meta").map(|| warp::http::StatusCode::INTERNAL_SERVER_ERROR);
    let (addr, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);

    let err = source_for(&format!("http://{addr}")).resolve_ip().await.unwrap_err();
    match err {
        Error::MetadataRequest { endpoint, .. } => assert!(endpoint.ends_with("/v4/meta")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
#[serial]
fn endpoints_fall_back_to_environment() {
    with_vars(
        vec![
            ("ECS_CONTAINER_METADATA_URI_V4", Some("http://169.254.170.2/v4/abc")),
            ("EC2_METADATA_IP", Some("http://127.0.0.1:1338")),
        ],
        || {
            let source = AddressSource::from_config(&AddressConfig::default()).unwrap();
            assert_eq!(source.ecs_metadata_uri(), Some("http://169.254.170.2/v4/abc"));
            assert_eq!(source.ec2_metadata_endpoint(), "http://127.0.0.1:1338");
        },
    );
}

#[test]
#[serial]
fn ec2_endpoint_defaults_to_link_local_service() {
    with_vars(
        vec![
            ("ECS_CONTAINER_METADATA_URI_V4", None::<&str>),
            ("EC2_METADATA_IP", None),
        ],
        || {
            let source = AddressSource::from_config(&AddressConfig::default()).unwrap();
            assert_eq!(source.ecs_metadata_uri(), None);
            assert_eq!(source.ec2_metadata_endpoint(), "http://169.254.169.254");
        },
    );
}

#[test]
fn service_address_brackets_ipv6() {
    assert_eq!(service_address("10.0.2.100", 41500), "10.0.2.100:41500");
    assert_eq!(service_address("fd00::1", 41500), "[fd00::1]:41500");
}

#[test]
fn link_local_v6_is_detected() {
    assert!(is_link_local_v6(&"fe80::1".parse().unwrap()));
    assert!(!is_link_local_v6(&"fd00::1".parse().unwrap()));
    assert!(!is_link_local_v6(&"10.0.0.1".parse().unwrap()));
}
