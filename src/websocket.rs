use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, WebSocketUpgrade,
    },
    response::IntoResponse,
    Extension, TypedHeader,
};
use futures::{sink::Sink, stream::Stream, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

use crate::{
    actions::{Reply, Request},
    control_center::ControlCenterHandle,
    peer::{GatewayInfo, PeerHandle},
    user::{ConnectionIds, User},
};

pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    user_agent: Option<TypedHeader<headers::UserAgent>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Extension(cc_handle): Extension<ControlCenterHandle>,
    Extension(info): Extension<Arc<GatewayInfo>>,
    Extension(ids): Extension<Arc<ConnectionIds>>,
) -> impl IntoResponse {
    let address = connect_info
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "unknown".into());

    if let Some(TypedHeader(user_agent)) = user_agent {
        info!("`{}`@`{address}` connected", user_agent.as_str());
    }

    ws.on_upgrade(move |socket| {
        let user = User::new(ids.next(), &address);

        let span = info_span!("User", %user);

        handle_websocket(socket, user, cc_handle, info).instrument(span)
    })
}

fn parse_request(text: &str) -> Option<Request> {
    match serde_json::from_str(text) {
        Ok(request) => Some(request),
        Err(e) => {
            error!(%e, "Malformed request, ignoring: {text}");
            None
        }
    }
}

pub(crate) async fn read<S>(mut receiver: S, peer_handle: PeerHandle)
where
    S: Unpin,
    S: Stream<Item = Result<Message, axum::Error>>,
{
    while let Some(Ok(msg)) = receiver.next().await {
        let request = match msg {
            Message::Text(request_text) => {
                trace!(%request_text, "peer request");
                parse_request(&request_text)
            }
            Message::Binary(bytes) => {
                trace!("peer request of {} bytes", bytes.len());
                parse_request(&String::from_utf8_lossy(&bytes))
            }
            Message::Ping(_) => {
                debug!("socket ping");
                None
            }
            Message::Pong(_) => {
                debug!("socket pong");
                None
            }
            Message::Close(_) => {
                debug!("client disconnected");
                None
            }
        };

        if let Some(request) = request {
            peer_handle.send(request);
        }
    }

    peer_handle.shutdown().await;

    debug!("no more stuff");
}

pub(crate) async fn write(
    mut sender: impl Sink<Message> + Unpin,
    mut receiver: mpsc::UnboundedReceiver<Reply>,
) {
    while let Some(reply) = receiver.recv().await {
        let reply = match serde_json::to_string(&reply) {
            Ok(reply) => reply,
            Err(e) => {
                error!(%e, "Could not serialize {reply}");
                continue;
            }
        };

        if sender.send(Message::Text(reply)).await.is_err() {
            debug!("client disconnected");
            return;
        }
        trace!("Reply flushed");
    }
}

pub(crate) async fn handle_websocket(
    websocket: WebSocket,
    user: User,
    cc_handle: ControlCenterHandle,
    info: Arc<GatewayInfo>,
) {
    let (stream_sender, stream_receiver) = websocket.split();
    let (reply_sender, reply_receiver) = mpsc::unbounded_channel::<Reply>();

    let peer_handle = PeerHandle::new(user, reply_sender, cc_handle, info, info_span!("Peer"));

    let read_handle =
        tokio::spawn(read(stream_receiver, peer_handle).instrument(info_span!("Read")));
    let write_handle =
        tokio::spawn(write(stream_sender, reply_receiver).instrument(info_span!("Write")));

    match read_handle.await {
        Ok(()) => debug!("Read task joined"),
        Err(e) => warn!("Read task join error: {e:?}"),
    }

    debug!("Aborting write task");
    // This ensures the underlying TCP connection gets closed,
    // which signals the peer that the session is over.
    write_handle.abort();
}
