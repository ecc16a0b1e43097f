#![warn(missing_docs)]

//! kvdefrag: leader-aware defragmentation of a clustered key-value store,
//! gated on cluster health, with optional compaction and alarm clearance.

pub mod cli;
pub mod config;
pub mod discovery;
pub mod disalarm;
pub mod endpoints;
pub mod error;
pub mod gateway;
pub mod health;
pub mod orchestrator;
pub mod rule;
pub mod service;
pub mod status;

#[cfg(test)]
mod testing;

pub use config::DefragConfig;
pub use disalarm::DisalarmOutcome;
pub use error::{DefragError, Result};
pub use orchestrator::{EndpointOutcome, EndpointPhase, Orchestrator, RunPhase, RunReport};
pub use service::{
    AlarmKind, AlarmMember, ClientError, ClientResult, ClusterMember, ClusterService,
    EndpointStatus, NameService,
};
