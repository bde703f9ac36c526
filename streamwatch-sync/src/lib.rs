//! # streamwatch-sync
//!
//! Keeps a chat channel's live announcements in step with the streaming
//! platform.
//!
//! [`Engine`] runs reconciliation passes against a [`LiveSetProvider`] and a
//! [`MessageStore`]; [`recovery`] rebuilds its cache from the channel after a
//! restart; [`RestartCorrelator`] answers a forced-restart command once the
//! bot is back; [`handle_command_failure`] turns failed commands into
//! chat responses.

pub mod engine;
pub mod error;
pub mod plan;
pub mod ports;
pub mod recovery;
pub mod report;
pub mod restart;
pub mod state;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

pub use engine::{Engine, EngineConfig, PassReport};
pub use error::{ProviderError, StoreError, SyncError};
pub use ports::{LiveSetProvider, MessageStore};
pub use recovery::{RecoveryOutcome, RecoverySummary};
pub use report::{handle_command_failure, CommandContext, CommandFailure, FailureResponse};
pub use restart::{RestartCorrelator, RestartOutcome, RESTART_SCAN_LIMIT};
pub use state::{EngineState, RenderCache, SoftBanSet, StateSnapshot};
