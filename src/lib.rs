//! # serialwire-client
//!
//! Async client for serial ports that live on a remote host and are
//! reached through a single TCP connection.
//!
//! One [`Connection`] multiplexes any number of named virtual ports. Each
//! port is opened and closed with a request/reply handshake, and data
//! written to it is confirmed by the server per transaction.
//!
//! ## Architecture
//!
//! - **Frame codec** ([`protocol`]): 1-byte header (3-bit opcode, 5-bit
//!   length) with a 4-byte extended length for payloads over 30 bytes
//! - **Tracking tables** ([`tracking`]): pending handshakes, open ports and
//!   unconfirmed writes, resolved by the receive loop
//! - **Writer task** ([`writer`]): the only writer of the socket
//!
//! ## Example
//!
//! ```ignore
//! use serialwire_client::Connection;
//! use tokio::net::TcpStream;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let conn = Connection::builder().connect(TcpStream::connect("10.0.0.5:7000").await?)?;
//!
//!     if conn.open_port("COM5", 9600).await? {
//!         let delivery = conn.write("COM5", b"hello").await?;
//!         println!("confirmed transaction {}", delivery.txid);
//!     }
//!
//!     conn.close().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod protocol;
pub mod tracking;
pub mod writer;

mod client;

pub use client::{Connection, ConnectionBuilder, RemoteErrorCallback};
pub use config::ConnectionConfig;
pub use error::{OperationKind, RemoteError, Result, SerialWireError};
pub use tracking::{Delivery, PendingReply};
