//! Domain layer for tracking a single channel's broadcast state.
//!
//! Everything in this crate is free of I/O: payload decoding, signature checks,
//! delivery de-duplication and the channel state machine. The application crate
//! wires these together with the Helix client and the on-disk game cache.
pub mod channel;
pub mod dedup;
pub mod signature;
pub mod types;

pub use channel::{ChannelStateMachine, Transition};
pub use dedup::NotificationDeduplicator;
pub use signature::SignatureVerifier;
pub use types::{ChangeEvent, ChangeKind, ChannelState, PayloadError, StreamUpdate};
