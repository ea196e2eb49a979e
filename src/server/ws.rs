use crate::error::SignalError;
use crate::logger::log;
use crate::server::relay::SignalingRelay;
use crate::signaling::{ClientMessage, ServerMessage};
use crate::utils::random_id;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

/// Принимает WebSocket-подключения и привязывает каждое к релею
pub async fn run(addr: &str, relay: Arc<SignalingRelay>) -> Result<(), SignalError> {
    let listener = TcpListener::bind(addr).await?;
    log(&format!("signaling server listening on {addr}"));
    loop {
        let (stream, peer_addr) = listener.accept().await?;
        let relay = relay.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, relay).await {
                log(&format!("connection from {peer_addr} closed with error: {e}"));
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    relay: Arc<SignalingRelay>,
) -> Result<(), SignalError> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (mut sink, mut stream) = ws.split();

    // ID канала выдаём здесь, он живёт пока живо соединение
    let channel_id = random_id();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    relay.connect(&channel_id, tx);

    // исходящий насос: из релея в сокет
    let pump = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let Ok(json) = serde_json::to_string(&msg) else {
                continue;
            };
            if sink.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(f) => f,
            Err(e) => {
                log(&format!("websocket error on {channel_id}: {e}"));
                break;
            }
        };
        match frame {
            Message::Text(text) => {
                // сервер не падает от мусора: непонятные кадры просто дропаем
                match serde_json::from_str::<ClientMessage>(text.as_str()) {
                    Ok(msg) => relay.handle_message(&channel_id, msg),
                    Err(e) => log(&format!("malformed message from {channel_id} ignored: {e}")),
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    relay.disconnect(&channel_id);
    pump.abort();
    Ok(())
}
