//! Terminal dashboard for a Cardano-style relay or block producing node.
//!
//! Background tasks poll the node's Prometheus endpoint, its OS process and
//! TCP connection table, and probe the latency of every connected peer. The
//! terminal UI only reads the shared [`state::AppState`] they publish into.

pub mod config;
pub mod epoch;
pub mod error;
pub mod failure;
pub mod genesis;
pub mod log_buffer;
pub mod metrics;
pub mod network_type;
pub mod node;
pub mod peers;
pub mod process;
pub mod state;
pub mod tasks;
pub mod ui;
pub mod version;

pub use config::Config;
pub use error::AppError;
pub use state::AppState;
