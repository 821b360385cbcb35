//! # Session Networking Client
//!
//! Client-side session layer for an online game: a long-lived UDP session
//! with the active game server plus background probing of a roster of
//! candidate servers for latency and player counts.
//!
//! ## Architecture Overview
//!
//! The [`network::NetworkManager`] owns the transport and runs four workers
//! on the tokio runtime:
//!
//! - **Sender**: drains the outbound packet queue into the transport in
//!   submission order
//! - **Receiver**: reads the transport, completes the handshake, swallows
//!   keepalive responses, honours server disconnect notices and defers every
//!   other packet to the registered listeners
//! - **Task worker**: executes queued network tasks, currently probing every
//!   server in the roster
//! - **Probe receiver**: matches ping responses to pending probes and
//!   records the measured round trip
//!
//! Listener callbacks never run on a network worker. They are posted to the
//! [`main_thread::MainThreadQueue`], which the application drains on its own
//! thread. Non-fatal failures go to a [`diagnostics::DiagnosticSink`].
//!
//! ## Usage Example
//!
//! ```no_run
//! use client::{main_thread_queue, ErrorQueues, NetworkConfig, NetworkManager, ServerRoster};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), client::NetworkError> {
//! let (handle, mut main_thread) = main_thread_queue();
//! let roster = Arc::new(ServerRoster::default());
//! let errors = Arc::new(ErrorQueues::new());
//!
//! let network = NetworkManager::start(NetworkConfig::default(), roster, errors, handle).await?;
//! network.add_listener(30000, |packet| println!("got {:?}", packet));
//! network.connect("127.0.0.1", 7777).await?;
//!
//! loop {
//!     main_thread.run_pending();
//!     # break;
//! }
//! network.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod history;
pub mod listeners;
pub mod main_thread;
pub mod network;
pub mod queue;
pub mod roster;
pub mod transport;

pub use config::NetworkConfig;
pub use diagnostics::{DiagnosticSink, ErrorQueues};
pub use error::{NetworkError, NetworkResult};
pub use history::{LatencyHistory, LatencyStats, LinkQuality};
pub use main_thread::{main_thread_queue, MainThreadHandle, MainThreadQueue};
pub use network::{NetworkManager, NetworkTask};
pub use roster::{GameServerView, ServerId, ServerRoster};
