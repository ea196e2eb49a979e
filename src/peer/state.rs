use std::time::Duration;

/// Роль стороны в текущем звонке: кто отправил первый offer, тот caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallRole {
    Caller,
    Callee,
}

/// Состояние переговоров одного сеанса
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    HaveLocalMedia,
    AwaitingPeer,
    Negotiating(CallRole),
    Connected,
    Failed,
    Ended,
}

impl NegotiationState {
    /// Offer от пира принимается только до начала собственных переговоров
    pub fn accepts_remote_offer(&self) -> bool {
        matches!(self, NegotiationState::HaveLocalMedia | NegotiationState::AwaitingPeer)
    }
}

/// ========== CONSTANTS ==========

/// Период ожидания перед принудительным отключением
pub const GRACE_PERIOD: Duration = Duration::from_secs(10);
