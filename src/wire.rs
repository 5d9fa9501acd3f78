//! Newline-delimited JSON front end.
//!
//! One request object per line, one response object per line. The acting
//! identity travels in each request; verifying it is the job of whatever
//! sits in front of this socket.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::info;

use crate::input::{self, BookingPatch};
use crate::lifecycle::BookingController;
use crate::limits::MAX_LINE_LEN;
use crate::model::Role;
use crate::observability::{CONNECTIONS_ACTIVE, CONNECTIONS_REJECTED_TOTAL, CONNECTIONS_TOTAL};
use crate::store::BookingError;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Create {
        actor: String,
        provider_id: String,
        instant: String,
        service_label: String,
    },
    List {
        actor: String,
        #[serde(default)]
        role: Option<Role>,
    },
    Get {
        actor: String,
        booking_id: String,
    },
    Update {
        actor: String,
        booking_id: String,
        #[serde(default)]
        patch: BookingPatch,
    },
    Delete {
        actor: String,
        booking_id: String,
    },
    Providers,
}

fn failure(e: &BookingError) -> Value {
    json!({
        "ok": false,
        "error": { "kind": e.kind(), "message": e.to_string() },
    })
}

async fn execute(controller: &BookingController, request: Request) -> Result<Value, BookingError> {
    Ok(match request {
        Request::Create {
            actor,
            provider_id,
            instant,
            service_label,
        } => {
            let booking = controller
                .create_booking(&actor, &provider_id, &instant, &service_label)
                .await?;
            json!({ "ok": true, "booking": booking })
        }
        Request::List { actor, role } => {
            let bookings = controller.list_bookings(&actor, role).await?;
            json!({ "ok": true, "bookings": bookings })
        }
        Request::Get { actor, booking_id } => {
            let booking = controller.get_booking(&actor, &booking_id).await?;
            json!({ "ok": true, "booking": booking })
        }
        Request::Update {
            actor,
            booking_id,
            patch,
        } => {
            let booking = controller.update_booking(&actor, &booking_id, &patch).await?;
            json!({ "ok": true, "booking": booking })
        }
        Request::Delete { actor, booking_id } => {
            controller.delete_booking(&actor, &booking_id).await?;
            json!({ "ok": true, "deleted": booking_id })
        }
        Request::Providers => {
            let providers = controller.providers().await;
            json!({ "ok": true, "providers": providers })
        }
    })
}

/// Answer one request line. Never fails: errors become error responses.
pub async fn handle_line(controller: &BookingController, line: &str) -> Value {
    let request: Request = match input::from_json(line) {
        Ok(request) => request,
        Err(e) => return failure(&e),
    };
    match execute(controller, request).await {
        Ok(reply) => reply,
        Err(e) => failure(&e),
    }
}

/// Serve one client until it disconnects or sends an oversized line.
pub async fn process_connection(
    socket: TcpStream,
    controller: Arc<BookingController>,
) -> Result<(), LinesCodecError> {
    let mut lines = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    while let Some(line) = lines.next().await {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let reply = handle_line(&controller, &line).await;
        lines.send(reply.to_string()).await?;
    }
    Ok(())
}

/// Accept connections until `shutdown` resolves, then wait for open
/// connections to finish (bounded by `DRAIN_TIMEOUT`).
pub async fn serve(
    listener: TcpListener,
    controller: Arc<BookingController>,
    max_connections: usize,
    shutdown: impl Future<Output = ()>,
) {
    let semaphore = Arc::new(Semaphore::new(max_connections));
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (socket, peer) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!("accept error: {e}");
                        continue;
                    }
                };

                let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                    tracing::warn!("connection limit reached, rejecting {peer}");
                    metrics::counter!(CONNECTIONS_REJECTED_TOTAL).increment(1);
                    drop(socket);
                    continue;
                };

                info!("connection from {peer}");
                metrics::counter!(CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(CONNECTIONS_ACTIVE).increment(1.0);
                let controller = controller.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(e) = process_connection(socket, controller).await {
                        tracing::warn!("connection error from {peer}: {e}");
                    }
                    metrics::gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
                });
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    info!("draining connections...");
    let deadline = tokio::time::sleep(DRAIN_TIMEOUT);
    tokio::pin!(deadline);
    loop {
        if semaphore.available_permits() == max_connections {
            info!("all connections drained");
            break;
        }
        tokio::select! {
            _ = &mut deadline => {
                let remaining = max_connections - semaphore.available_permits();
                tracing::warn!("drain timeout, {remaining} connections still open");
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_decode_by_op_tag() {
        let r: Request = input::from_json(r#"{"op":"providers"}"#).unwrap();
        assert!(matches!(r, Request::Providers));

        let r: Request =
            input::from_json(r#"{"op":"list","actor":"01J00000000000000000000000"}"#).unwrap();
        assert!(matches!(r, Request::List { role: None, .. }));

        let r: Request = input::from_json(
            r#"{"op":"update","actor":"a","booking_id":"b","patch":{"instant":"2024-06-01T11:00:00Z"}}"#,
        )
        .unwrap();
        match r {
            Request::Update { patch, .. } => {
                assert_eq!(patch.instant.as_deref(), Some("2024-06-01T11:00:00Z"))
            }
            other => panic!("decoded {other:?}"),
        }
    }

    #[test]
    fn unknown_ops_and_patch_fields_are_rejected() {
        assert!(input::from_json::<Request>(r#"{"op":"truncate"}"#).is_err());
        assert!(
            input::from_json::<Request>(
                r#"{"op":"update","actor":"a","booking_id":"b","patch":{"client_id":"x"}}"#
            )
            .is_err()
        );
    }

    #[test]
    fn failures_carry_kind_only_message() {
        let v = failure(&BookingError::Forbidden);
        assert_eq!(v["ok"], false);
        assert_eq!(v["error"]["kind"], "forbidden");
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn storage_fault_reaches_the_caller_as_server_fault() {
        use crate::directory::InMemoryDirectory;
        use crate::notify::NotifyHub;
        use crate::store::BookingStore;

        let directory = InMemoryDirectory::new();
        let client = directory.register("Ana", "ana@example.com", Role::Client).unwrap();
        let provider = directory.register("Bia", "bia@example.com", Role::Provider).unwrap();
        let store = Arc::new(BookingStore::open("/dev/full").await.unwrap());
        let controller = BookingController::new(
            store.clone(),
            Arc::new(directory),
            Arc::new(NotifyHub::new()),
        );

        let line = json!({
            "op": "create",
            "actor": client.id.to_string(),
            "provider_id": provider.id.to_string(),
            "instant": "2024-06-01T10:00",
            "service_label": "haircut",
        })
        .to_string();
        let reply = handle_line(&controller, &line).await;
        assert_eq!(reply["ok"], false);
        assert_eq!(reply["error"]["kind"], "server_fault");
        assert!(store.is_empty());
    }
}
