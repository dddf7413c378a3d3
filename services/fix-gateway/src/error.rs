//! Why a connection ended; used for disconnect logging and cleanup.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionEnd {
    #[error("peer closed the connection")]
    PeerClosed,

    #[error("logout")]
    Logout,

    #[error("no traffic within two heartbeat intervals")]
    HeartbeatTimeout,

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("write timed out")]
    WriteTimeout,

    #[error("inbound buffer overflow: {0}")]
    Overflow(#[from] fix::FrameError),
}
