//! # Reference Game Server
//!
//! A small UDP game server speaking the session protocol of the `client`
//! crate. It exists to exercise the client end to end and to give server
//! browsers something to probe.
//!
//! ## Responsibilities
//!
//! - **Probes**: every `Ping` is answered with a `PingResponse` carrying the
//!   same id and the current player count (optionally fixed, optionally
//!   delayed to simulate distance)
//! - **Sessions**: `CryptoHandshakeStart` registers the sender and is answered
//!   with the server's key, or with a `ServerDisconnect` when the protocol
//!   version is wrong or the server is full
//! - **Keepalives**: acknowledged with the current player count
//! - **Custom packets**: echoed back to the client that sent them
//! - **Timeouts**: clients silent for too long are dropped with a notice
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::{GameServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = GameServer::bind("127.0.0.1:7777", ServerConfig::default()).await?;
//!     server.run().await;
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod config;
pub mod network;

pub use config::ServerConfig;
pub use network::GameServer;
