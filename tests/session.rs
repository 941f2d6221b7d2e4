//! End-to-end tests: a hand-rolled in-test server plays the other side of the protocol over a
//! real loopback TLS connection, exercising `Session` the way the real server would drive it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rcgen::{BasicConstraints, CertificateParams, IsCa, KeyPair};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;

use sentrynode::event::EventHandler;
use sentrynode::model::{Alert, AlertLevel, Manager, Node, Option_, Sensor, SensorAlert};
use sentrynode::session::{NodeIdentity, Session, SessionConfig};
use sentrynode::transport::TlsMaterial;

fn now() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as i64
}

/// Build a CA and a `localhost`-issued leaf cert/key signed by it, writing the CA to a temp PEM
/// file (for the client) and returning the server's cert chain and private key PEM strings.
fn generate_chain(tmp_dir: &std::path::Path) -> (PathBuf, String, String) {
    let ca_key = KeyPair::generate().unwrap();
    let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    let ca_cert = ca_params.self_signed(&ca_key).unwrap();

    let server_key = KeyPair::generate().unwrap();
    let server_params = CertificateParams::new(vec!["localhost".to_string()]).unwrap();
    let server_cert = server_params.signed_by(&server_key, &ca_cert, &ca_key).unwrap();

    let ca_path = tmp_dir.join("ca.pem");
    std::fs::write(&ca_path, ca_cert.pem()).unwrap();

    (ca_path, server_cert.pem(), server_key.serialize_pem())
}

/// Stand up a loopback TLS listener for one connection, returning the acceptor, the bound port,
/// and the CA path the client should trust.
async fn start_server() -> (TlsAcceptor, TcpListener, u16, PathBuf) {
    let tmp_dir = std::env::temp_dir().join(format!("sentrynode-test-{}-{}", now(), rand_suffix()));
    std::fs::create_dir_all(&tmp_dir).unwrap();
    let (ca_path, server_cert_pem, server_key_pem) = generate_chain(&tmp_dir);

    let server_certs = pem_certs(&server_cert_pem);
    let server_key = pem_key(&server_key_pem);
    let server_config = Arc::new(
        rustls::ServerConfig::builder_with_provider(rustls::crypto::ring::default_provider().into())
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_no_client_auth()
            .with_single_cert(server_certs, server_key)
            .unwrap(),
    );
    let acceptor = TlsAcceptor::from(server_config);

    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();

    (acceptor, listener, port, ca_path)
}

fn rand_suffix() -> u32 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    RandomState::new().build_hasher().finish() as u32
}

struct AcceptingEventHandler;

#[async_trait]
impl EventHandler for AcceptingEventHandler {
    async fn received_status_update(
        &self,
        _server_time: i64,
        _options: Vec<Option_>,
        _nodes: Vec<Node>,
        _sensors: Vec<Sensor>,
        _managers: Vec<Manager>,
        _alerts: Vec<Alert>,
        _alert_levels: Vec<AlertLevel>,
    ) -> bool {
        true
    }

    async fn received_sensor_alert(&self, _server_time: i64, _sensor_alert: SensorAlert) -> bool {
        true
    }

    async fn received_state_change(&self, _server_time: i64, _sensor_id: i64, _state: i64) -> bool {
        true
    }

    async fn handle_event(&self) {}
}

fn session_config(port: u16, ca_certificate_path: PathBuf) -> SessionConfig {
    SessionConfig {
        host: "localhost".to_string(),
        port,
        ca_certificate_path,
        client_identity: None,
        username: "node".to_string(),
        password: "secret".to_string(),
        identity: NodeIdentity {
            version: 0.4,
            rev: 2,
            node_type: "manager".to_string(),
            instance: "test".to_string(),
            description: "test manager".to_string(),
            persistent: 1,
        },
        handshake_timeout: std::time::Duration::from_secs(3),
        response_timeout: std::time::Duration::from_secs(3),
        idle_recv_timeout: std::time::Duration::from_millis(500),
    }
}

fn new_session(port: u16, ca_path: PathBuf) -> Session {
    let tls = TlsMaterial::load(&ca_path, None).unwrap();
    Session::new(session_config(port, ca_path), tls, Arc::new(AcceptingEventHandler))
}

/// Read one JSON object from the stream, assuming it fits in one chunk (true for every message
/// this harness sends).
async fn read_json(stream: &mut (impl AsyncReadExt + Unpin)) -> serde_json::Value {
    let mut buf = vec![0u8; 16384];
    let n = stream.read(&mut buf).await.unwrap();
    serde_json::from_slice(&buf[..n]).unwrap()
}

async fn write_json(stream: &mut (impl AsyncWriteExt + Unpin), value: &serde_json::Value) {
    stream.write_all(&serde_json::to_vec(value).unwrap()).await.unwrap();
    stream.flush().await.unwrap();
}

/// Drive the server side of a full handshake: authenticate, register, and push an empty initial
/// status. Leaves the stream ready for whatever the test wants to exchange next.
async fn run_handshake_server(stream: &mut TlsStream<TcpStream>) {
    let auth = read_json(stream).await;
    assert_eq!(auth["message"], "authentication");
    write_json(
        stream,
        &json!({
            "serverTime": now(),
            "message": "authentication",
            "payload": { "type": "response", "version": 0.4, "rev": 2, "result": "ok" }
        }),
    )
    .await;

    let reg = read_json(stream).await;
    assert_eq!(reg["message"], "registration");
    write_json(
        stream,
        &json!({
            "serverTime": now(),
            "message": "registration",
            "payload": { "type": "response", "result": "ok" }
        }),
    )
    .await;

    write_json(
        stream,
        &json!({
            "serverTime": now(),
            "message": "status",
            "payload": { "type": "rts", "id": 7 }
        }),
    )
    .await;
    let cts = read_json(stream).await;
    assert_eq!(cts["payload"]["type"], "cts");
    assert_eq!(cts["payload"]["id"], 7);

    write_json(
        stream,
        &json!({
            "serverTime": now(),
            "message": "status",
            "payload": {
                "type": "request",
                "options": [],
                "nodes": [],
                "sensors": [],
                "managers": [],
                "alerts": [],
                "alertLevels": []
            }
        }),
    )
    .await;
    let status_response = read_json(stream).await;
    assert_eq!(status_response["payload"]["result"], "ok");
}

#[tokio::test]
async fn successful_handshake_reaches_connected() {
    let (acceptor, listener, port, ca_path) = start_server().await;

    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut stream = acceptor.accept(tcp).await.unwrap();
        run_handshake_server(&mut stream).await;
    });

    let session = new_session(port, ca_path);
    session.initialize().await.expect("handshake should succeed");
    assert!(session.is_connected().await);
}

#[tokio::test]
async fn version_mismatch_is_reported_without_marking_connected() {
    let (acceptor, listener, port, ca_path) = start_server().await;

    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut stream = acceptor.accept(tcp).await.unwrap();

        let _auth = read_json(&mut stream).await;
        write_json(
            &mut stream,
            &json!({
                "serverTime": now(),
                "message": "authentication",
                "payload": { "type": "response", "version": 0.9, "rev": 2, "result": "ok" }
            }),
        )
        .await;

        // the client tears the connection down on its own after detecting the mismatch; give it
        // a moment to do so before the task (and its listener) drop.
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    });

    let session = new_session(port, ca_path);
    let result = session.initialize().await;
    assert!(result.is_err());
    assert!(!session.is_connected().await);
}

#[tokio::test]
async fn send_keepalive_completes_an_rts_cts_round() {
    let (acceptor, listener, port, ca_path) = start_server().await;

    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut stream = acceptor.accept(tcp).await.unwrap();
        run_handshake_server(&mut stream).await;

        let rts = read_json(&mut stream).await;
        assert_eq!(rts["message"], "ping");
        assert_eq!(rts["payload"]["type"], "rts");
        let id = rts["payload"]["id"].as_u64().unwrap();

        write_json(
            &mut stream,
            &json!({
                "serverTime": now(),
                "message": "ping",
                "payload": { "type": "cts", "id": id }
            }),
        )
        .await;

        let request = read_json(&mut stream).await;
        assert_eq!(request["message"], "ping");
        assert_eq!(request["payload"]["type"], "request");

        write_json(
            &mut stream,
            &json!({
                "serverTime": now(),
                "message": "ping",
                "payload": { "type": "response", "result": "ok" }
            }),
        )
        .await;
    });

    let session = new_session(port, ca_path);
    session.initialize().await.expect("handshake should succeed");
    session.send_keepalive().await.expect("keepalive should round-trip");

    server.await.unwrap();
}

#[tokio::test]
async fn cts_id_mismatch_retries_with_a_fresh_transaction_id() {
    let (acceptor, listener, port, ca_path) = start_server().await;

    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut stream = acceptor.accept(tcp).await.unwrap();
        run_handshake_server(&mut stream).await;

        // First round: deliberately echo back the wrong id. The client must treat this as a
        // mismatch, back off, and retry with a fresh transaction id rather than proceeding.
        let first_rts = read_json(&mut stream).await;
        assert_eq!(first_rts["payload"]["type"], "rts");
        let first_id = first_rts["payload"]["id"].as_u64().unwrap();
        write_json(
            &mut stream,
            &json!({
                "serverTime": now(),
                "message": "ping",
                "payload": { "type": "cts", "id": first_id.wrapping_add(1) }
            }),
        )
        .await;

        // Second round: the client retries with a fresh id. Echo it correctly this time.
        let second_rts = read_json(&mut stream).await;
        assert_eq!(second_rts["payload"]["type"], "rts");
        let second_id = second_rts["payload"]["id"].as_u64().unwrap();
        assert_ne!(
            second_id, first_id,
            "retry must use a fresh transaction id, not repeat the mismatched one"
        );
        write_json(
            &mut stream,
            &json!({
                "serverTime": now(),
                "message": "ping",
                "payload": { "type": "cts", "id": second_id }
            }),
        )
        .await;

        let request = read_json(&mut stream).await;
        assert_eq!(request["payload"]["type"], "request");
        write_json(
            &mut stream,
            &json!({
                "serverTime": now(),
                "message": "ping",
                "payload": { "type": "response", "result": "ok" }
            }),
        )
        .await;
    });

    let session = new_session(port, ca_path);
    session.initialize().await.expect("handshake should succeed");
    session
        .send_keepalive()
        .await
        .expect("keepalive should succeed after the retry");

    server.await.unwrap();
}

fn pem_certs(pem_str: &str) -> Vec<rustls::pki_types::CertificateDer<'static>> {
    pem::parse_many(pem_str)
        .unwrap()
        .into_iter()
        .filter(|p| p.tag == "CERTIFICATE")
        .map(|p| rustls::pki_types::CertificateDer::from(p.contents))
        .collect()
}

fn pem_key(pem_str: &str) -> rustls::pki_types::PrivateKeyDer<'static> {
    let parsed = pem::parse(pem_str).unwrap();
    rustls::pki_types::PrivateKeyDer::Pkcs8(parsed.contents.into())
}
