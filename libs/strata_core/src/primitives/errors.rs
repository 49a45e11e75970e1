use std::fmt::Display;

use uuid::Uuid;

#[derive(Debug)]
pub enum CodecError {
    /// The frame is not `<base64 payload>.<hex tail>`
    MalformedFrame(String),
    /// The payload is not the expected JSON shape
    MalformedJson(String),
    /// A hash field decoded to the wrong number of bytes
    BadHashLength(usize),
    /// The transaction has no signature, so it has no canonical form
    UnsignedTransaction,
    /// The block has no hash, so it has no canonical form
    UnminedBlock,
    /// Producing a signature failed
    SigningFailed(String),
    /// A block referenced by an appendage is missing from the hash index
    UnresolvedReference(String),
}

impl Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecError::MalformedFrame(reason) => {
                write!(f, "malformed frame: {reason}")
            }
            CodecError::MalformedJson(reason) => {
                write!(f, "malformed payload: {reason}")
            }
            CodecError::BadHashLength(length) => {
                write!(f, "hash is {length} bytes, expected 32")
            }
            CodecError::UnsignedTransaction => {
                write!(f, "cannot serialize an unsigned transaction")
            }
            CodecError::UnminedBlock => {
                write!(f, "cannot serialize an unmined block")
            }
            CodecError::SigningFailed(reason) => {
                write!(f, "failed to sign transaction: {reason}")
            }
            CodecError::UnresolvedReference(hash) => {
                write!(f, "block {hash} is not in the hash index")
            }
        }
    }
}

#[derive(Debug)]
pub enum PeerError {
    /// The peer could not be reached at all
    Transport(String),
    /// The peer answered with a non-200 status or an unparseable body
    InvalidResponse(String),
    /// The peer reported a different id than the one on record
    IdentityMismatch { expected: Uuid, actual: Uuid },
}

impl Display for PeerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerError::Transport(reason) => write!(f, "peer transport failure: {reason}"),
            PeerError::InvalidResponse(reason) => {
                write!(f, "peer returned an invalid response: {reason}")
            }
            PeerError::IdentityMismatch { expected, actual } => {
                write!(f, "peer identity mismatch: expected {expected}, got {actual}")
            }
        }
    }
}

#[derive(Debug)]
pub enum SyncError {
    /// A peer call failed during synchronization
    Peer(PeerError),
    /// A fetched block or appendage failed to decode
    Codec(CodecError),
    /// The chain walk or the genesis search could not be completed
    Incomplete(String),
}

impl Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::Peer(error) => write!(f, "sync failed: {error}"),
            SyncError::Codec(error) => write!(f, "sync received bad data: {error}"),
            SyncError::Incomplete(reason) => write!(f, "sync incomplete: {reason}"),
        }
    }
}
