//! Sync engine: history reader, reconciler, claim state machine and the
//! loop that drives them.

pub mod claim;
pub mod control;
pub mod reader;
pub mod reconcile;

pub use claim::{ClaimOutcome, ClaimStateMachine};
pub use control::{SchedulerConfig, SchedulerHandle, SchedulingLoop, TickSummary};
pub use reader::{ChannelStateReader, ObservedChannel};
pub use reconcile::{Reconciler, TickReport};
