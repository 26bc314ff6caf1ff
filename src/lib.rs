mod client;
pub mod config;
pub mod derive;
pub mod diff;
mod error;
mod logger;
pub mod poller;
pub mod protocol;
pub mod retry;
pub mod state;
mod types;

pub use client::JnapClient;
pub use config::PollerConfig;
pub use derive::DerivationEngine;
pub use diff::{ReadingsDiff, VariableChange};
pub use error::{Error, GiveUpError, ParseError, Result, TransportError};
pub use logger::MessageLogMode;
pub use poller::{CycleOutcome, PollOutcome, PollPhase, Poller, PollerBuilder, PollerStatus};
pub use retry::RetryPolicy;
pub use state::{ScalarValue, Snapshot, VariableKey};
pub use types::*;
