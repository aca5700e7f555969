//! Error type for the replication core.

use crate::prediction::PredictionKey;
use crate::replicated::PeerId;
use crate::replication::NetworkId;

/// Failures surfaced by replicated-state access and the wire codec.
///
/// None of these are fatal: peers log them and keep ticking.
#[derive(Debug, thiserror::Error)]
pub enum NetcodeError {
    /// A peer without write access tried to mutate replicated state.
    #[error("peer {peer} has no write access to replicated {field}")]
    ReadOnly {
        /// The peer that attempted the write.
        peer: PeerId,
        /// Name of the field.
        field: &'static str,
    },

    /// Encoding a value with postcard failed.
    #[error("failed to encode {what}: {source}")]
    Encode {
        /// What was being encoded.
        what: &'static str,
        /// Underlying postcard error.
        #[source]
        source: postcard::Error,
    },

    /// Decoding a value with postcard failed.
    #[error("failed to decode {what}: {source}")]
    Decode {
        /// What was being decoded.
        what: &'static str,
        /// Underlying postcard error.
        #[source]
        source: postcard::Error,
    },

    /// A message referenced an object this peer does not know.
    #[error("unknown object {0:?}")]
    UnknownObject(NetworkId),

    /// A predicted spawn reused a key that is still awaiting confirmation.
    #[error("prediction key {0:?} is still pending")]
    PredictionKeyInUse(PredictionKey),
}
