use crate::error::SignalError;
use crate::peer::types::IceCandidate;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

/// Состояние транспорта, как его сообщает медиадвижок
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Событие от медиадвижка
///
/// Каждое событие несёт `connection_id` попытки звонка, породившей его:
/// события от уже закрытого движка отбрасываются по несовпадению ID, а не
/// применяются к новому сеансу.
#[derive(Debug, Clone)]
pub struct EngineEvent {
    pub connection_id: String,
    pub kind: EngineEventKind,
}

#[derive(Debug, Clone)]
pub enum EngineEventKind {
    /// Локальный кандидат собран, пора отправить его пиру
    LocalCandidate(IceCandidate),
    /// Пришёл удалённый медиатрек
    RemoteTrack { kind: String, ssrc: u32 },
    /// Изменилось состояние транспорта
    Transport(TransportState),
}

/// Медиадвижок одного звонка: offer/answer, описания, кандидаты.
///
/// SDP-описания передаются как непрозрачный JSON — конкретный движок сам
/// решает, как их разбирать. Один экземпляр живёт ровно одну попытку
/// звонка и никогда не переиспользуется.
pub trait MediaEngine {
    /// Локальные медиатреки, в том виде, в котором их знает движок
    type Tracks: Clone + Send;

    fn attach_local_tracks(
        &self,
        tracks: Self::Tracks,
    ) -> impl std::future::Future<Output = Result<(), SignalError>> + Send;

    fn create_local_offer(
        &self,
    ) -> impl std::future::Future<Output = Result<Value, SignalError>> + Send;

    fn create_local_answer(
        &self,
    ) -> impl std::future::Future<Output = Result<Value, SignalError>> + Send;

    fn set_local_description(
        &self,
        description: Value,
    ) -> impl std::future::Future<Output = Result<(), SignalError>> + Send;

    fn set_remote_description(
        &self,
        description: Value,
    ) -> impl std::future::Future<Output = Result<(), SignalError>> + Send;

    fn add_remote_candidate(
        &self,
        candidate: IceCandidate,
    ) -> impl std::future::Future<Output = Result<(), SignalError>> + Send;

    fn close(&self) -> impl std::future::Future<Output = ()> + Send;
}

/// Фабрика движков: по одному экземпляру на попытку звонка
pub trait EngineFactory {
    type Engine: MediaEngine;

    /// Создаёт движок, привязанный к `connection_id`; все события движка
    /// уходят в `events` с этим же ID
    fn create(
        &self,
        connection_id: &str,
        events: UnboundedSender<EngineEvent>,
    ) -> impl std::future::Future<Output = Result<Self::Engine, SignalError>> + Send;
}
