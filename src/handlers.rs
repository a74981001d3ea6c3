use std::net::SocketAddr;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;

use crate::broker::ListenerId;
use crate::context::AppContext;
use crate::message::{clean_headers, Headers, Telegram, HEADER_FROM};

type WsSender = SplitSink<WebSocketStream<TcpStream>, WsMessage>;

#[derive(Debug, Deserialize)]
#[serde(tag = "request", rename_all = "lowercase")]
enum ClientFrame {
    /// Binds the connection to a session and registers a live listener.
    Auth {
        token: String,
    },
    /// Drain the caller's inbox.
    New,
    /// Post a message on behalf of the session owner.
    Proxy {
        #[serde(default)]
        headers: Headers,
        #[serde(default)]
        body: String,
    },
    Close,
}

#[derive(Debug, Serialize)]
struct StatusFrame {
    status: u16,
}

#[derive(Debug, Serialize)]
struct DeliveryFrame<'a> {
    status: u16,
    request: &'static str,
    headers: &'a Headers,
    body: &'a str,
}

impl<'a> DeliveryFrame<'a> {
    fn new(telegram: &'a Telegram) -> Self {
        Self {
            status: 200,
            request: "new",
            headers: &telegram.headers,
            body: &telegram.body,
        }
    }
}

/// One live connection. Suspends on the socket receive and on the listener
/// push channel; whichever fires first is handled. The listener registered
/// by `auth` is removed on every exit path.
pub async fn handle_socket(
    ws_stream: WebSocketStream<TcpStream>,
    addr: SocketAddr,
    ctx: AppContext,
) {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Telegram>();
    let mut session: Option<(String, ListenerId)> = None;

    tracing::debug!(addr = %addr, "websocket connection established");

    loop {
        tokio::select! {
            frame = ws_receiver.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        let frame = match serde_json::from_str::<ClientFrame>(&text) {
                            Ok(frame) => frame,
                            Err(err) => {
                                tracing::debug!(addr = %addr, error = %err, "unparseable frame");
                                send_json(&mut ws_sender, &StatusFrame { status: 404 }).await;
                                continue;
                            }
                        };

                        match frame {
                            ClientFrame::Auth { token } => {
                                match ctx.sessions.validate(&token).await {
                                    Some(username) => {
                                        if session.is_none() {
                                            let id = ctx.broker.listen(&username, tx.clone()).await;
                                            session = Some((username, id));
                                        }
                                        send_json(&mut ws_sender, &StatusFrame { status: 200 }).await;
                                    }
                                    None => {
                                        send_json(&mut ws_sender, &StatusFrame { status: 401 }).await;
                                    }
                                }
                            }

                            ClientFrame::New => {
                                let Some((username, _)) = &session else {
                                    send_json(&mut ws_sender, &StatusFrame { status: 401 }).await;
                                    continue;
                                };
                                loop {
                                    match ctx.broker.fetch(username).await {
                                        Ok(Some(telegram)) => {
                                            send_json(&mut ws_sender, &DeliveryFrame::new(&telegram))
                                                .await;
                                        }
                                        Ok(None) => {
                                            send_json(&mut ws_sender, &StatusFrame { status: 204 })
                                                .await;
                                            break;
                                        }
                                        Err(err) => {
                                            err.log();
                                            send_json(&mut ws_sender, &StatusFrame { status: 404 })
                                                .await;
                                            break;
                                        }
                                    }
                                }
                            }

                            ClientFrame::Proxy { headers, body } => {
                                let Some((username, _)) = &session else {
                                    send_json(&mut ws_sender, &StatusFrame { status: 401 }).await;
                                    continue;
                                };
                                let mut headers = clean_headers(headers);
                                headers.insert(HEADER_FROM.to_string(), username.clone());

                                match ctx.broker.post(headers, body, false) {
                                    Ok(()) => {
                                        send_json(&mut ws_sender, &StatusFrame { status: 201 }).await;
                                    }
                                    Err(err) => {
                                        let status = err.status_code().as_u16();
                                        err.log();
                                        send_json(&mut ws_sender, &StatusFrame { status }).await;
                                    }
                                }
                            }

                            ClientFrame::Close => break,
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) => break,
                    Some(Ok(WsMessage::Ping(data))) => {
                        let _ = ws_sender.send(WsMessage::Pong(data)).await;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        tracing::debug!(addr = %addr, error = %err, "websocket error");
                        break;
                    }
                    None => break,
                }
            }

            Some(telegram) = rx.recv() => {
                if let Ok(json) = serde_json::to_string(&DeliveryFrame::new(&telegram)) {
                    if ws_sender.send(WsMessage::Text(json)).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    if let Some((username, id)) = session {
        ctx.broker.unlisten(&username, id).await;
    }
    tracing::debug!(addr = %addr, "websocket connection closed");
}

async fn send_json<T: Serialize>(ws_sender: &mut WsSender, frame: &T) {
    if let Ok(json) = serde_json::to_string(frame) {
        let _ = ws_sender.send(WsMessage::Text(json)).await;
    }
}
