//! Frame-for-frame WebSocket bridging for `/proxy/<ws-target>` upgrades.

use access_log::{AccessEntry, AccessEvent, AccessLog};
use axum::extract::ws::{self, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use content_fetcher::FetchError;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use http::{HeaderMap, HeaderValue, header};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;
use uuid::Uuid;

use crate::anonymize::anonymize_headers;
use crate::error::ProxyError;

type Upstream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// True when `headers` ask for a WebSocket upgrade.
pub fn is_upgrade_request(headers: &HeaderMap) -> bool {
    let upgrade = headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
    let connection = headers
        .get(header::CONNECTION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| {
            v.split(',')
                .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
        });
    upgrade && connection
}

/// Maps a proxied target onto the WebSocket URL to dial: `http` becomes `ws`
/// and `https` becomes `wss`.
pub fn socket_target(path_and_query: &str) -> Result<Url, ProxyError> {
    let mut target = url_codec::decode_request_target(path_and_query)?;
    let scheme = match target.scheme() {
        "http" => Some("ws"),
        "https" => Some("wss"),
        _ => None,
    };
    if let Some(scheme) = scheme {
        // Both schemes are special, so the switch cannot fail.
        let _ = target.set_scheme(scheme);
    }
    Ok(target)
}

fn dial_failure(target: &Url, err: impl ToString) -> ProxyError {
    ProxyError::Fetch(FetchError::FetchFailure {
        url: target.to_string(),
        reason: err.to_string(),
    })
}

/// Dials the upstream socket and, once it answers, upgrades the client.
///
/// Connecting first lets a refused upstream surface as a plain 502 and lets
/// the subprotocol the upstream picked be echoed to the client.
pub async fn bridge(
    upgrade: WebSocketUpgrade,
    path_and_query: &str,
    client_headers: &HeaderMap,
    access: AccessLog,
) -> Result<Response, ProxyError> {
    let target = socket_target(path_and_query)?;

    let mut request = target
        .as_str()
        .into_client_request()
        .map_err(|err| dial_failure(&target, err))?;
    if let Some(protocols) = client_headers.get(header::SEC_WEBSOCKET_PROTOCOL) {
        request
            .headers_mut()
            .insert(header::SEC_WEBSOCKET_PROTOCOL, protocols.clone());
    }
    if let Ok(origin) = HeaderValue::from_str(&target_origin(&target)) {
        request.headers_mut().insert(header::ORIGIN, origin);
    }
    anonymize_headers(request.headers_mut());

    let (upstream, response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|err| dial_failure(&target, err))?;

    let selected = response
        .headers()
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let upgrade = match selected {
        Some(protocol) => upgrade.protocols([protocol]),
        None => upgrade,
    };

    let connection_id = Uuid::new_v4();
    tracing::info!(%connection_id, %target, "websocket bridged");
    access
        .record(
            AccessEntry::new(
                AccessEvent::WebSocketBridged,
                serde_json::json!({ "connection_id": connection_id.to_string() }),
            )
            .for_target(target.as_str()),
        )
        .await;

    Ok(upgrade.on_upgrade(move |socket| relay(socket, upstream, connection_id)))
}

/// The page origin a browser would have sent for `target`.
fn target_origin(target: &Url) -> String {
    let scheme = match target.scheme() {
        "wss" => "https",
        _ => "http",
    };
    match (target.host_str(), target.port()) {
        (Some(host), Some(port)) => format!("{scheme}://{host}:{port}"),
        (Some(host), None) => format!("{scheme}://{host}"),
        _ => format!("{scheme}://"),
    }
}

/// Runs both forwarding directions until either side closes.
async fn relay(client: WebSocket, upstream: Upstream, connection_id: Uuid) {
    let (client_write, client_read) = client.split();
    let (upstream_write, upstream_read) = upstream.split();

    let up_task = tokio::spawn(client_to_upstream(client_read, upstream_write, connection_id));
    let down_task = tokio::spawn(upstream_to_client(upstream_read, client_write, connection_id));
    first_to_finish(up_task, down_task, connection_id).await;

    tracing::info!(%connection_id, "websocket closed");
}

/// Waits for whichever relay half ends first and aborts the other, so neither
/// socket outlives the bridge.
async fn first_to_finish(mut up_task: JoinHandle<()>, mut down_task: JoinHandle<()>, connection_id: Uuid) {
    tokio::select! {
        result = &mut up_task => {
            if let Err(err) = result {
                tracing::debug!(%connection_id, %err, "client relay task ended");
            }
            down_task.abort();
        }
        result = &mut down_task => {
            if let Err(err) = result {
                tracing::debug!(%connection_id, %err, "upstream relay task ended");
            }
            up_task.abort();
        }
    }
}

async fn client_to_upstream(
    mut reader: SplitStream<WebSocket>,
    mut writer: SplitSink<Upstream, Message>,
    connection_id: Uuid,
) {
    while let Some(message) = reader.next().await {
        let message = match message {
            Ok(message) => message,
            Err(err) => {
                tracing::debug!(%connection_id, %err, "client read error, closing relay");
                break;
            }
        };
        let closing = matches!(message, ws::Message::Close(_));
        if writer.send(to_upstream(message)).await.is_err() || closing {
            break;
        }
    }
}

async fn upstream_to_client(
    mut reader: SplitStream<Upstream>,
    mut writer: SplitSink<WebSocket, ws::Message>,
    connection_id: Uuid,
) {
    while let Some(message) = reader.next().await {
        let message = match message {
            Ok(message) => message,
            Err(err) => {
                tracing::debug!(%connection_id, %err, "upstream read error, closing relay");
                break;
            }
        };
        let Some(message) = to_client(message) else {
            continue;
        };
        let closing = matches!(message, ws::Message::Close(_));
        if writer.send(message).await.is_err() || closing {
            break;
        }
    }
}

fn to_upstream(message: ws::Message) -> Message {
    match message {
        ws::Message::Text(text) => Message::Text(text.as_str().to_owned().into()),
        ws::Message::Binary(data) => Message::Binary(data),
        ws::Message::Ping(data) => Message::Ping(data),
        ws::Message::Pong(data) => Message::Pong(data),
        ws::Message::Close(frame) => Message::Close(frame.map(|frame| CloseFrame {
            code: CloseCode::from(frame.code),
            reason: frame.reason.as_str().to_owned().into(),
        })),
    }
}

fn to_client(message: Message) -> Option<ws::Message> {
    let message = match message {
        Message::Text(text) => ws::Message::Text(text.as_str().to_owned().into()),
        Message::Binary(data) => ws::Message::Binary(data),
        Message::Ping(data) => ws::Message::Ping(data),
        Message::Pong(data) => ws::Message::Pong(data),
        Message::Close(frame) => ws::Message::Close(frame.map(|frame| ws::CloseFrame {
            code: u16::from(frame.code),
            reason: frame.reason.as_str().to_owned().into(),
        })),
        Message::Frame(_) => return None,
    };
    Some(message)
}
