use thiserror::Error;
use vdt_core::bridge_ipc::EventName;

pub mod app;
pub mod bridge;
pub mod config;
pub mod session;
pub mod store;
pub mod transport;
pub mod ui;
pub mod visibility;

pub use bridge::{Bridge, BridgeSender, Generation};
pub use session::{HostSignal, Session, SessionHandle, SessionInput, SessionOptions, UiCommand};
pub use store::{Action, Mutation, SessionStore, Tab};
pub use transport::{ConnectLink, MemoryConnector, TransportConnector, UdsConnector};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("payload for {event} rejected: {message}")]
    Payload { event: EventName, message: String },
}

impl SessionError {
    pub fn payload(event: EventName, message: impl Into<String>) -> Self {
        Self::Payload {
            event,
            message: message.into(),
        }
    }
}
