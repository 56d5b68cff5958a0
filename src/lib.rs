//! Minimal MQTT v3.1.1 client for embedded-class devices.
//!
//! One network connection is shared by three background threads, a
//! transport reader, a keep-alive monitor and a delivery dispatcher,
//! plus the caller's own thread. All inbound traffic flows through a
//! bounded packet queue; every waiter drains it and puts back whatever
//! was not addressed to it, so acknowledgements find the request that
//! is waiting for them even when they arrive interleaved with
//! unsolicited messages.
//!
//! ```no_run
//! use tinymq::{Client, ConnectOptions, TcpConnection};
//!
//! let mut client = Client::new(ConnectOptions::new("sensor-1"));
//! client.on_message(|topic, payload| {
//!     println!("{}: {} bytes", topic, payload.len());
//! });
//!
//! let conn = TcpConnection::connect("broker.local", 1883)?;
//! client.connect(Box::new(conn))?;
//! client.subscribe("sensors/commands")?;
//! client.publish("sensors/state", b"online", true)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#[macro_use]
mod utils;

mod client;
pub mod codec;
mod connection;
mod dispatcher;
mod error;
mod inflight;
mod keepalive;
mod queue;
mod reader;
mod shared;
mod types;
mod worker;

pub use self::client::{Client, ClientStats, ConnectOptions};
pub use self::connection::{Connection, ConnectionRead, ConnectionWrite, TcpConnection};
pub use self::error::{ClientError, DecodeError, EncodeError, KeepAliveFailure};
pub use self::types::QoS;
