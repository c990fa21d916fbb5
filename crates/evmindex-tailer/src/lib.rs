//! evmindex-tailer — keeps the EVM tx index current.
//!
//! * [`LiveTailer`] follows new block headers and indexes each height.
//! * [`catchup`] re-indexes a bounded height range after downtime.
//! * [`CometRpcClient`] is the default [`ChainClient`] for CometBFT nodes.

pub mod catchup;
pub mod client;
pub mod comet;
pub mod config;
pub mod tailer;

pub use catchup::{resolve_range, run_catch_up, CatchUpRange, CatchUpReport, EndHeight, StartHeight};
pub use client::{ChainClient, ChainStatus, HeaderStream};
pub use comet::CometRpcClient;
pub use config::{CheckpointPolicy, TailerBuilder, TailerConfig};
pub use tailer::{LiveTailer, TailerState};
