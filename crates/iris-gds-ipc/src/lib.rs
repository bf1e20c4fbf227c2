//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Pub/sub IPC bus, signed envelopes, and app managers."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Inter-process bus for the ground system. Every role runs in its own
//! process; processes exchange [`IpcPayload`]s over TCP, routed by topic
//! through a [`TopicProxy`] that sits between the publisher-side and
//! subscriber-side [`Port`] of each logical channel.
#![warn(missing_docs)]

pub mod frame;
pub mod manager;
pub mod messages;
pub mod ports;
pub mod proxy;
pub mod serializer;
pub mod socket;
pub mod topics;

/// Result alias used throughout the IPC crate.
pub type Result<T> = std::result::Result<T, IpcError>;

/// Error type for the bus and the app managers.
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    /// Socket I/O failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// A frame or message envelope could not be decoded.
    #[error("ipc decode failed: {0}")]
    Decode(String),
    /// A message digest did not verify.
    #[error("ipc integrity check failed: {0}")]
    Integrity(String),
    /// A frame announced more bytes than the configured maximum.
    #[error("frame of {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge {
        /// Announced size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },
    /// A message could not be encoded.
    #[error("ipc encode failed: {0}")]
    Encode(String),
    /// Socket name or port setup is wrong.
    #[error("ipc configuration error: {0}")]
    Config(String),
    /// A payload arrived on a topic the handler does not know.
    #[error("no handler for topic {0}")]
    UnhandledTopic(String),
    /// The peer or the local socket is gone.
    #[error("socket closed: {0}")]
    Closed(String),
    /// A handler asked for the app to shut down.
    #[error("app shutdown requested: {0}")]
    EndAppRequest(String),
}

impl IpcError {
    /// Whether this error is the graceful-shutdown sentinel.
    pub fn is_end_app_request(&self) -> bool {
        matches!(self, IpcError::EndAppRequest(_))
    }
}

pub use frame::{Frame, IpcCodec, IpcPayload};
pub use manager::{
    AppContext, AppManager, AppManagerSync, SocketHandler, SocketSpec, SocketTopicHandler,
    TopicHandler, TopicHandlerTable,
};
pub use messages::{
    AppAction, AppControlMessage, DownlinkedPacketsMessage, DownlinkedPayloadsMessage,
    MessageContent, MessageKind, PacketSplit, TargetXcvr, UplinkPacketRequestMessage,
    UplinkPayloadsRequestMessage, XcvrCommand, XcvrControlMessage,
};
pub use ports::{Port, PortSide};
pub use proxy::TopicProxy;
pub use serializer::{Serializer, SERIALIZER_VERSION};
pub use socket::{
    Endpoint, IpcSocket, SocketKind, SocketOptions, SocketStats, SocketStatsSnapshot, Subscriptions,
};
pub use topics::{Topic, TopicDefinition, TOPICS};
