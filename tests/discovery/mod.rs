use std::sync::Arc;
use std::time::Duration;

use zk_discovery::session::CoordinationSession;
use zk_discovery::session::MemoryStore;
use zk_discovery::AddressUpdate;
use zk_discovery::DiscoveryConfig;
use zk_discovery::ResolveTarget;
use zk_discovery::Resolver;
use zk_discovery::ResolverRegistry;
use zk_discovery::ServiceDiscovery;

use crate::common::connect;
use crate::common::enable_logger;
use crate::common::next_snapshot;
use crate::common::strings;
use crate::common::CollectingConsumer;
use crate::common::KEEPALIVE;

#[tokio::test]
async fn registration_is_visible_exactly_once_to_other_clients() {
    enable_logger();
    let store = MemoryStore::new();
    let (a, _) = connect(&store);
    let (b, _) = connect(&store);
    let mut watch = b.watch_registered_addresses("/_test/nodes").await.unwrap();
    assert!(next_snapshot(&mut watch).await.is_empty());

    a.register_node("/_test/nodes", "10.0.2.100:41500").await.unwrap();

    assert_eq!(next_snapshot(&mut watch).await, strings(&["10.0.2.100:41500"]));
    assert_eq!(
        b.get_registered_addresses("/_test/nodes").await.unwrap(),
        strings(&["10.0.2.100:41500"])
    );
}

#[tokio::test]
async fn a_client_never_resolves_itself() {
    enable_logger();
    let store = MemoryStore::new();
    let (client, _) = connect(&store);
    let (peer, _) = connect(&store);
    let registry = ResolverRegistry::new();
    registry.register(Arc::new(zk_discovery::DiscoveryResolverBuilder::new(client.clone())));
    let consumer = Arc::new(CollectingConsumer::default());

    client.register_node("/nodes", "10.0.0.1:80").await.unwrap();
    let resolver = registry.build("zk:///nodes:80", consumer.clone()).await.unwrap();
    consumer.wait_for(&[]).await;

    peer.register_node("/nodes", "10.0.0.2:80").await.unwrap();
    consumer.wait_for(&["10.0.0.2:80"]).await;
    resolver.resolve_now().await;

    assert!(consumer
        .updates
        .lock()
        .iter()
        .all(|update| !update.contains(&"10.0.0.1:80".to_string())));
    resolver.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_path_creation_from_two_clients() {
    enable_logger();
    let store = MemoryStore::new();
    let (a, _) = connect(&store);
    let (b, _) = connect(&store);

    let (left, right) = tokio::join!(
        tokio::spawn(async move { a.ensure_path("/deep/shared/path").await }),
        tokio::spawn(async move { b.ensure_path("deep//shared/path/").await }),
    );

    assert_eq!(left.unwrap().unwrap(), "/deep/shared/path");
    assert_eq!(right.unwrap().unwrap(), "/deep/shared/path");
}

#[tokio::test]
async fn closed_client_delivers_nothing_more() {
    enable_logger();
    let store = MemoryStore::new();
    let (watcher, _) = connect(&store);
    let (registrar, _) = connect(&store);
    let mut watch = watcher.watch_registered_addresses("/nodes").await.unwrap();
    assert!(next_snapshot(&mut watch).await.is_empty());

    watcher.close().await.unwrap();
    registrar.register_node("/nodes", "10.0.0.1:80").await.unwrap();
    registrar.register_node("/nodes", "10.0.0.2:80").await.unwrap();

    assert_eq!(watch.recv().await, Some(AddressUpdate::Ended));
    assert_eq!(watch.recv().await, None);
}

#[tokio::test]
async fn record_survives_expiry_and_disconnect() {
    enable_logger();
    let store = MemoryStore::new();
    let (registrar, session) = connect(&store);
    let (observer, _) = connect(&store);
    let registration = registrar.register_node("/nodes", "10.0.0.1:80").await.unwrap();

    session.disconnect();
    tokio::time::sleep(KEEPALIVE * 3).await;
    session.reconnect();
    tokio::time::sleep(KEEPALIVE * 2).await;
    assert_eq!(
        observer.get_registered_addresses("/nodes").await.unwrap(),
        strings(&["10.0.0.1:80"])
    );

    let expired_id = session.session_id();
    session.expire();
    assert!(observer.get_registered_addresses("/nodes").await.unwrap().is_empty());

    let mut repaired = false;
    for _ in 0..100 {
        if store.data(registration.path()).is_some() {
            repaired = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(repaired, "keepalive never re-created {}", registration.path());
    assert_ne!(session.session_id(), expired_id);
    assert_eq!(
        observer.get_registered_addresses("/nodes").await.unwrap(),
        strings(&["10.0.0.1:80"])
    );
}

#[tokio::test]
async fn end_to_end_register_resolve_unregister() {
    enable_logger();
    let store = MemoryStore::new();
    let config = DiscoveryConfig {
        registration: zk_discovery::RegistrationConfig {
            base_path: "/nodes".to_string(),
            ..Default::default()
        },
        address: zk_discovery::AddressConfig {
            override_ip: Some("10.0.2.100".to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    let (client_a, _) = connect(&store);
    let (client_b, _) = connect(&store);
    let a = ServiceDiscovery::new(client_a, &config).unwrap();
    let b = ServiceDiscovery::new(client_b, &config).unwrap();

    a.register_service(41500, None).await.unwrap();

    let consumer = Arc::new(CollectingConsumer::default());
    let target = ResolveTarget::parse(&b.target()).unwrap();
    let resolver = b.resolver_builder().build_resolver(&target, consumer.clone()).await.unwrap();
    resolver.resolve_now().await;
    consumer.wait_for(&["10.0.2.100:41500"]).await;

    a.unregister().await.unwrap();
    consumer.wait_for(&[]).await;
    resolver.resolve_now().await;
    assert_eq!(consumer.last(), Some(vec![]));

    resolver.close().await;
    let seen = consumer.count();
    resolver.resolve_now().await;
    assert_eq!(consumer.count(), seen);
}
