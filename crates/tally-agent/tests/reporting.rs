//! End-to-end reporting against a live server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tally_agent::{
    Agent, AgentConfig, HttpTransport, ReportError, Reporter, RpcTransport, Transport,
    TransportKind, POLL_COUNT, RANDOM_VALUE,
};
use tally_core::{Decrypter, Encrypter, MetricRecord, Store, TrustedSubnet};
use tally_rpc::RpcServer;
use tally_server::{build_router, RpcHandler, ServerState};
use tokio::net::TcpListener;
use tokio::time::timeout;

/// Serve the HTTP router on an ephemeral port
async fn spawn_http(state: ServerState, decrypter: Option<Arc<Decrypter>>) -> SocketAddr {
    let router = build_router(Arc::new(state), decrypter);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    addr
}

async fn spawn_rpc(state: ServerState) -> SocketAddr {
    let server = RpcServer::bind("127.0.0.1:0", Arc::new(RpcHandler::new(Arc::new(state))))
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    addr
}

fn sample_store() -> Arc<Store> {
    let store = Arc::new(Store::new());
    store.add_counter(POLL_COUNT, 4).unwrap();
    store.set_gauge(RANDOM_VALUE, 0.75).unwrap();
    store.set_gauge("TotalMemory", 8192.0).unwrap();
    store
}

#[tokio::test]
async fn test_http_report_with_signing_and_real_ip() {
    let server_store = Arc::new(Store::new());
    let addr = spawn_http(
        ServerState {
            key: "shared".to_string(),
            trusted: Some(TrustedSubnet::parse("127.0.0.0/8").unwrap()),
            ..ServerState::new(server_store.clone())
        },
        None,
    )
    .await;

    let transport = HttpTransport::new(&addr.to_string(), None).unwrap();
    let reporter = Reporter::new(sample_store(), "shared", Box::new(transport));
    assert_eq!(reporter.report().await.unwrap(), 3);

    assert_eq!(server_store.read_counter(POLL_COUNT).unwrap(), 4);
    assert_eq!(server_store.read_gauge(RANDOM_VALUE).unwrap(), 0.75);
    assert_eq!(server_store.read_gauge("TotalMemory").unwrap(), 8192.0);
}

#[tokio::test]
async fn test_http_report_rejected_without_key() {
    let server_store = Arc::new(Store::new());
    let addr = spawn_http(
        ServerState {
            key: "shared".to_string(),
            ..ServerState::new(server_store.clone())
        },
        None,
    )
    .await;

    let transport = HttpTransport::new(&addr.to_string(), None).unwrap();
    let reporter = Reporter::new(sample_store(), "", Box::new(transport));
    assert!(matches!(
        reporter.report().await,
        Err(ReportError::Rejected { status: 400, .. })
    ));
    assert!(server_store.is_empty());
}

#[tokio::test]
async fn test_http_report_encrypted() {
    let mut rng = rsa::rand_core::OsRng;
    let private = rsa::RsaPrivateKey::new(&mut rng, 1024).unwrap();
    let decrypter = Arc::new(Decrypter::new(private));
    let encrypter = Encrypter::new(decrypter.public_key());

    let server_store = Arc::new(Store::new());
    let addr = spawn_http(ServerState::new(server_store.clone()), Some(decrypter)).await;

    let transport = HttpTransport::new(&format!("http://{}", addr), Some(encrypter)).unwrap();
    let reporter = Reporter::new(sample_store(), "", Box::new(transport));
    assert_eq!(reporter.report().await.unwrap(), 3);
    assert_eq!(server_store.read_counter(POLL_COUNT).unwrap(), 4);
}

#[tokio::test]
async fn test_rpc_transport_reconnects() {
    let server_store = Arc::new(Store::new());
    let addr = spawn_rpc(ServerState::new(server_store.clone())).await;

    let transport = RpcTransport::new(addr.to_string());
    assert_eq!(transport.describe(), format!("rpc://{}", addr));

    let applied = transport
        .send(vec![MetricRecord::counter(POLL_COUNT, 1)])
        .await
        .unwrap();
    assert_eq!(applied, 1);

    // A rejected batch drops the connection; the next send reconnects
    let bad = MetricRecord {
        id: "x".to_string(),
        kind: "summary".to_string(),
        delta: Some(1),
        value: None,
        hash: None,
    };
    assert!(matches!(
        transport.send(vec![bad]).await,
        Err(ReportError::Rpc(_))
    ));

    transport
        .send(vec![MetricRecord::counter(POLL_COUNT, 2)])
        .await
        .unwrap();
    assert_eq!(server_store.read_counter(POLL_COUNT).unwrap(), 3);
}

#[tokio::test]
async fn test_agent_runs_until_shutdown() {
    let server_store = Arc::new(Store::new());
    let addr = spawn_rpc(ServerState::new(server_store.clone())).await;

    let config = AgentConfig {
        address: addr.to_string(),
        transport: TransportKind::Rpc,
        poll_interval: Duration::from_millis(20),
        report_interval: Duration::from_millis(100),
        ..Default::default()
    };
    let agent = Agent::new(config).unwrap();
    let lifecycle = agent.lifecycle();
    let collector = agent.collector();
    let handle = tokio::spawn(agent.run());

    tokio::time::sleep(Duration::from_millis(250)).await;
    lifecycle.trigger();
    timeout(Duration::from_secs(5), handle)
        .await
        .expect("agent did not stop")
        .unwrap()
        .unwrap();

    let polls = collector.store().read_counter(POLL_COUNT).unwrap();
    assert!(polls > 0);
    assert!(server_store.read_counter(POLL_COUNT).unwrap() >= polls);
    assert!(server_store.read_gauge(RANDOM_VALUE).is_ok());
    assert!(server_store.read_gauge("TotalMemory").is_ok());
}
