//! WebSocket transport for the `{cmd, val}` protocol.
//!
//! One task per socket. The origin check runs inside the upgrade callback,
//! so a refused client is answered with `403 Forbidden` and never
//! registered. After the upgrade the socket is split: a writer task drains
//! the connection's outbound queue into the sink while the reader loop
//! feeds text frames to [`ConnectionHub::handle_inbound`] in arrival order.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use hostlink_middleware::{ConnectionHub, Registration};
use hostlink_types::{Envelope, LinkError};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{StatusCode, header};
use tracing::{debug, warn};

/// How long the writer gets to flush and close after the reader stops.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Accept sockets until `stop` fires.
pub async fn accept_loop(listener: TcpListener, hub: Arc<ConnectionHub>, mut stop: broadcast::Receiver<()>) {
    loop {
        tokio::select! {
            _ = stop.recv() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let hub = Arc::clone(&hub);
                    let stop = stop.resubscribe();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, hub, stop).await {
                            debug!(%peer, error = %e, "websocket session ended");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "accept error"),
            }
        }
    }
    debug!("websocket listener stopped");
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    hub: Arc<ConnectionHub>,
    mut stop: broadcast::Receiver<()>,
) -> Result<(), LinkError> {
    let mut registration: Option<Registration> = None;
    let check_origin = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        let origin = req.headers().get(header::ORIGIN).and_then(|v| v.to_str().ok());
        match hub.accept(origin, Some(peer)) {
            Ok(reg) => {
                registration = Some(reg);
                Ok(resp)
            }
            Err(e) => {
                let mut refusal = ErrorResponse::new(Some(e.to_string()));
                *refusal.status_mut() = StatusCode::FORBIDDEN;
                Err(refusal)
            }
        }
    };

    let upgraded = accept_hdr_async(stream, check_origin).await;
    let ws = match upgraded {
        Ok(ws) => ws,
        Err(e) => {
            if let Some(reg) = registration.take() {
                hub.disconnect(reg.id);
            }
            return Err(LinkError::ConnectionLost(format!("handshake with {peer}: {e}")));
        }
    };
    let Some(Registration { id, mut outbound }) = registration else {
        return Err(LinkError::ConnectionLost(format!("{peer} upgraded without registration")));
    };

    let (mut sink, mut source) = ws.split();
    let mut writer = tokio::spawn(async move {
        while let Some(text) = outbound.recv().await {
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut writer_done = false;
    loop {
        tokio::select! {
            _ = stop.recv() => break,
            _ = &mut writer => {
                writer_done = true;
                break;
            }
            msg = source.next() => match msg {
                Some(Ok(Message::Text(text))) => hub.handle_inbound(id, text.as_str()).await,
                Some(Ok(Message::Binary(_))) => {
                    let err = LinkError::InvalidArgument("binary frames are not supported".into());
                    let _ = hub.send_to(id, &Envelope::error(None, &err));
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(connection = %id, error = %e, "transport error");
                    break;
                }
                Some(Ok(_)) => {}
            }
        }
    }

    hub.disconnect(id);
    if !writer_done && tokio::time::timeout(CLOSE_GRACE, &mut writer).await.is_err() {
        writer.abort();
    }
    Ok(())
}
