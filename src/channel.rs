use crate::error::SignalError;
use crate::logger::log;
use crate::signaling::{ClientMessage, ServerMessage};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

/// Клиентский конец сигнального канала
pub struct SignalChannel {
    pub tx: UnboundedSender<ClientMessage>,
    pub rx: UnboundedReceiver<ServerMessage>,
}

/// Подключается к сигнальному серверу и поднимает два насоса:
/// типизированные сообщения → JSON кадры и обратно. Закрытие сокета
/// просто закрывает `rx` — приложение увидит конец потока.
pub async fn connect(url: &str) -> Result<SignalChannel, SignalError> {
    let (ws, _) = connect_async(url).await?;
    let (mut sink, mut stream) = ws.split();

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ClientMessage>();
    let (in_tx, in_rx) = mpsc::unbounded_channel::<ServerMessage>();

    tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let Ok(json) = serde_json::to_string(&msg) else {
                continue;
            };
            if sink.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            let Ok(frame) = frame else { break };
            match frame {
                Message::Text(text) => {
                    match serde_json::from_str::<ServerMessage>(text.as_str()) {
                        Ok(msg) => {
                            if in_tx.send(msg).is_err() {
                                break;
                            }
                        }
                        Err(e) => log(&format!("malformed server message ignored: {e}")),
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    Ok(SignalChannel {
        tx: out_tx,
        rx: in_rx,
    })
}
