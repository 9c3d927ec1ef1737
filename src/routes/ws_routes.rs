use std::sync::Arc;

use axum::extract::ws::{Message as WsFrame, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::models::{Identity, WidgetCommand, WidgetEvent};
use crate::routes::cookies::CookieIdentityStore;
use crate::routes::widget_routes::identity_from_headers;
use crate::service::SessionResolver;
use crate::widget::{Widget, WidgetServices};

/// GET `/api/widget/ws` — upgrades to a WebSocket; one connection is one live
/// widget.
pub async fn widget_ws_handler(
    ws: WebSocketUpgrade,
    State(services): State<WidgetServices>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let identity = identity_from_headers(&headers);
    let store = Arc::new(CookieIdentityStore::from_headers(&headers));
    ws.on_upgrade(move |socket| handle_socket(socket, services, store, identity))
}

type SocketSink = SplitSink<WebSocket, WsFrame>;

/// Drives one widget connection.
///
/// Protocol:
/// - Server opens with `{ "type": "session_ready", "session_id", "messages" }`
/// - Client sends `{ "type": "send", "content": "..." }` (or `{ "type": "close" }`)
/// - Server pushes `{ "type": "transcript", "messages": [...] }` on every
///   visible change, `{ "type": "notice", ... }` for recoverable conditions,
///   `{ "type": "error", ... }` when the conversation cannot continue.
///
/// Sends run on their own task so realtime deliveries keep flowing while a
/// reply is being generated; a second send during that window is answered
/// with an inline notice.
async fn handle_socket(
    socket: WebSocket,
    services: WidgetServices,
    store: Arc<CookieIdentityStore>,
    identity: Identity,
) {
    info!("widget client connected");
    let (mut sink, mut stream) = socket.split();

    let resolver = SessionResolver::new(store, services.sessions.clone());
    let widget = match Widget::activate(&services, &resolver, &identity).await {
        Ok(widget) => Arc::new(widget),
        Err(err) => {
            warn!("widget activation failed: {err}");
            send_event(&mut sink, &WidgetEvent::Error { message: err.to_string() }).await;
            return;
        }
    };

    send_event(
        &mut sink,
        &WidgetEvent::SessionReady {
            session_id: widget.session_id(),
            messages: widget.messages(),
        },
    )
    .await;

    let (notice_tx, mut notice_rx) = mpsc::channel::<WidgetEvent>(16);
    let mut changes = widget.changes();

    loop {
        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                send_event(
                    &mut sink,
                    &WidgetEvent::Transcript { messages: widget.messages() },
                )
                .await;
            }

            Some(event) = notice_rx.recv() => {
                send_event(&mut sink, &event).await;
            }

            incoming = stream.next() => {
                if !handle_frame(incoming, &widget, &notice_tx, &mut sink).await {
                    break;
                }
            }
        }
    }

    widget.close();
    info!("widget client disconnected");
}

/// Handle one incoming frame; returns `false` when the connection should end.
async fn handle_frame(
    incoming: Option<Result<WsFrame, axum::Error>>,
    widget: &Arc<Widget>,
    notices: &mpsc::Sender<WidgetEvent>,
    sink: &mut SocketSink,
) -> bool {
    let Some(frame) = incoming else { return false };
    let frame = match frame {
        Ok(frame) => frame,
        Err(err) => {
            warn!("WebSocket receive error: {err}");
            return false;
        }
    };
    let text = match &frame {
        WsFrame::Text(text) => text.to_string(),
        WsFrame::Close(_) => return false,
        _ => return true,
    };

    match serde_json::from_str::<WidgetCommand>(&text) {
        Ok(WidgetCommand::Send { content }) => {
            let widget = widget.clone();
            let notices = notices.clone();
            tokio::spawn(async move {
                if let Err(err) = widget.send(&content).await {
                    let event = if err.is_fatal() {
                        WidgetEvent::Error { message: err.to_string() }
                    } else {
                        WidgetEvent::Notice { message: err.to_string() }
                    };
                    let _ = notices.send(event).await;
                }
            });
            true
        }
        Ok(WidgetCommand::Close) => false,
        Err(err) => {
            send_event(
                sink,
                &WidgetEvent::Notice { message: format!("Invalid request: {err}") },
            )
            .await;
            true
        }
    }
}

/// Serialize a `WidgetEvent` and send it over the socket.
async fn send_event(sink: &mut SocketSink, event: &WidgetEvent) {
    if let Ok(json) = serde_json::to_string(event) {
        let _ = sink.send(WsFrame::Text(json.into())).await;
    }
}
