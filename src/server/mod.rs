pub mod registry;
pub mod relay;
pub mod ws;

pub use registry::RoomRegistry;
pub use relay::SignalingRelay;
