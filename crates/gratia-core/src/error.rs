//! Error types for Gratia

use thiserror::Error;

use crate::PeerId;

/// Core Gratia errors
#[derive(Error, Debug)]
pub enum GratiaError {
    // Domain errors
    #[error("Invalid phase: {0:?}")]
    InvalidPhase(String),

    #[error("Invalid mood: {0:?}")]
    InvalidMood(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Wire errors
    #[error("Invalid wire format: {0}")]
    InvalidWireFormat(String),

    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    // Transport errors
    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Relay unavailable")]
    RelayUnavailable,

    // Negotiation errors
    #[error("Negotiation with {peer} failed: {reason}")]
    NegotiationFailed { peer: PeerId, reason: String },

    #[error("No connection to peer {0}")]
    UnknownPeer(PeerId),
}

/// Result type for Gratia operations
pub type GratiaResult<T> = Result<T, GratiaError>;

impl From<serde_json::Error> for GratiaError {
    fn from(err: serde_json::Error) -> Self {
        GratiaError::InvalidWireFormat(err.to_string())
    }
}

impl From<std::io::Error> for GratiaError {
    fn from(err: std::io::Error) -> Self {
        GratiaError::TransportError(err.to_string())
    }
}
