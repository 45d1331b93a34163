//! # verifyq
//!
//! Keeps a chat channel in sync with a speedrun verification queue.
//!
//! Every pending run is mirrored as one bot message. Reviewers claim a run
//! by reacting with the claim marker and hand it back with the unclaim
//! marker; the claim lives in the message text, so channel history is the
//! only state. A scheduling loop reconciles each tracked (channel, game)
//! pair on an interval and applies reaction events in between.

pub mod chat;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod model;
pub mod source;
pub mod telemetry;
