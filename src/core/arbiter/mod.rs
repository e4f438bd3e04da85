//! Half-duplex arbitration: activity signals in, mute/unmute batches out.

pub mod enforcer;
pub mod machine;
pub mod scheduler;
pub mod scope;
pub mod signal;

pub use enforcer::{spawn_enforcer, BatchReport, PermissionEnforcer};
pub use machine::{EnforcementCommand, SpeakerArbiter, TimerKey, TimerPurpose, Timing};
pub use scheduler::{DebounceScheduler, TimerId};
pub use scope::{ChannelScope, ScopeError};
pub use signal::{ActivitySignal, SignalAdapter, SignalKind};
