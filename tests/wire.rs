use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LinesCodec};
use ulid::Ulid;

use slotkeeper::directory::InMemoryDirectory;
use slotkeeper::lifecycle::BookingController;
use slotkeeper::limits::MAX_LINE_LEN;
use slotkeeper::model::Role;
use slotkeeper::notify::NotifyHub;
use slotkeeper::store::BookingStore;
use slotkeeper::wire;

// ── Test infrastructure ──────────────────────────────────────

struct Server {
    addr: SocketAddr,
    client: String,
    provider: String,
    stranger: String,
}

async fn start_test_server() -> Server {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("slotkeeper_wire_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();

    let directory = InMemoryDirectory::new();
    let client = directory.register("Ana", "ana@example.com", Role::Client).unwrap();
    let provider = directory.register("Bia", "bia@example.com", Role::Provider).unwrap();
    let stranger = directory.register("Edu", "edu@example.com", Role::Client).unwrap();

    let store = Arc::new(BookingStore::open(dir.join("bookings.wal")).await.unwrap());
    let controller = Arc::new(BookingController::new(
        store,
        Arc::new(directory),
        Arc::new(NotifyHub::new()),
    ));
    tokio::spawn(wire::serve(listener, controller, 16, std::future::pending()));

    Server {
        addr,
        client: client.id.to_string(),
        provider: provider.id.to_string(),
        stranger: stranger.id.to_string(),
    }
}

type Conn = Framed<TcpStream, LinesCodec>;

async fn connect(addr: SocketAddr) -> Conn {
    let socket = TcpStream::connect(addr).await.unwrap();
    Framed::new(socket, LinesCodec::new())
}

async fn call(conn: &mut Conn, request: Value) -> Value {
    conn.send(request.to_string()).await.unwrap();
    let line = conn.next().await.unwrap().unwrap();
    serde_json::from_str(&line).unwrap()
}

fn error_kind(reply: &Value) -> &str {
    assert_eq!(reply["ok"], false, "expected failure, got {reply}");
    reply["error"]["kind"].as_str().unwrap()
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn create_list_update_delete_over_the_wire() {
    let s = start_test_server().await;
    let mut conn = connect(s.addr).await;

    let reply = call(
        &mut conn,
        json!({
            "op": "create",
            "actor": s.client,
            "provider_id": s.provider,
            "instant": "2024-06-01T10:00:00Z",
            "service_label": "haircut",
        }),
    )
    .await;
    assert_eq!(reply["ok"], true, "{reply}");
    let id = reply["booking"]["id"].as_str().unwrap().to_string();

    let reply = call(
        &mut conn,
        json!({
            "op": "create",
            "actor": s.stranger,
            "provider_id": s.provider,
            "instant": "2024-06-01T07:00:00-03:00",
            "service_label": "massage",
        }),
    )
    .await;
    assert_eq!(error_kind(&reply), "slot_taken");

    let reply = call(&mut conn, json!({ "op": "list", "actor": s.provider })).await;
    assert_eq!(reply["bookings"].as_array().unwrap().len(), 1);
    let reply = call(&mut conn, json!({ "op": "list", "actor": s.stranger })).await;
    assert!(reply["bookings"].as_array().unwrap().is_empty());

    let reply = call(&mut conn, json!({ "op": "get", "actor": s.stranger, "booking_id": id })).await;
    assert_eq!(error_kind(&reply), "forbidden");
    assert!(reply.get("booking").is_none());

    let reply = call(
        &mut conn,
        json!({
            "op": "update",
            "actor": s.provider,
            "booking_id": id,
            "patch": { "instant": "2024-06-01T11:00:00Z" },
        }),
    )
    .await;
    assert_eq!(reply["ok"], true, "{reply}");
    assert_eq!(reply["booking"]["instant"], "2024-06-01T11:00:00Z");

    let reply = call(&mut conn, json!({ "op": "delete", "actor": s.client, "booking_id": id })).await;
    assert_eq!(reply["ok"], true);
    assert_eq!(reply["deleted"], id);

    let reply = call(&mut conn, json!({ "op": "delete", "actor": s.client, "booking_id": id })).await;
    assert_eq!(error_kind(&reply), "not_found");
}

#[tokio::test]
async fn providers_are_listed() {
    let s = start_test_server().await;
    let mut conn = connect(s.addr).await;
    let reply = call(&mut conn, json!({ "op": "providers" })).await;
    let providers = reply["providers"].as_array().unwrap();
    assert_eq!(providers.len(), 1);
    assert_eq!(providers[0]["id"], s.provider);
    assert_eq!(providers[0]["name"], "Bia");
}

#[tokio::test]
async fn malformed_lines_keep_the_connection_open() {
    let s = start_test_server().await;
    let mut conn = connect(s.addr).await;

    conn.send("this is not json").await.unwrap();
    let reply: Value = serde_json::from_str(&conn.next().await.unwrap().unwrap()).unwrap();
    assert_eq!(error_kind(&reply), "validation");

    let reply = call(&mut conn, json!({ "op": "drop_table" })).await;
    assert_eq!(error_kind(&reply), "validation");

    let reply = call(
        &mut conn,
        json!({
            "op": "create",
            "actor": s.client,
            "provider_id": s.provider,
            "instant": "tomorrow-ish",
            "service_label": "haircut",
        }),
    )
    .await;
    assert_eq!(error_kind(&reply), "validation");

    let reply = call(&mut conn, json!({ "op": "providers" })).await;
    assert_eq!(reply["ok"], true);
}

#[tokio::test]
async fn oversized_line_closes_the_connection() {
    let s = start_test_server().await;
    let mut conn = connect(s.addr).await;

    // The server may hang up before the write finishes.
    let _ = conn.send("x".repeat(MAX_LINE_LEN + 1)).await;
    assert!(matches!(conn.next().await, None | Some(Err(_))));
}
