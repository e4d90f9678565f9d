//! # ThingsBoard Device Client for Embedded Systems
//!
//! `myrtio-thingsboard` is a `no_std`, asynchronous client for the ThingsBoard
//! device MQTT API, built upon the [Embassy](https://embassy.dev/) async
//! ecosystem. A device can publish telemetry and attributes, request
//! attribute values, follow attribute pushes, answer server RPCs and make RPC
//! calls of its own, all over one broker connection.
//!
//! ## Core Features
//!
//! - **`no_std` + `alloc`:** JSON documents and callbacks live on the heap;
//!   topics and packet buffers are fixed size (`heapless`).
//! - **Fully Async:** Built with `async/await` on embassy timers and networking.
//! - **Rust 2024 Edition:** Uses native `async fn` in traits, removing the need
//!   for `async-trait`.
//! - **Transport Agnostic:** The session runs on any [`link::DeviceLink`]; the
//!   bundled [`MqttClient`] implements it over any [`transport::MqttTransport`].
//! - **Shared Routing:** All callback bookkeeping sits in a [`Router`] that can
//!   be placed in a `static` and used from several tasks.
//!
//! ## Architecture
//!
//! ```ignore
//! static ROUTER: Router = Router::new();
//!
//! let auth = AuthConfig::access_token("A1_TEST_TOKEN")?;
//! let transport = TcpTransport::new(socket, Duration::from_secs(5));
//! let client = MqttClient::<_, 1024>::new(transport, MqttOptions::from_auth(&auth));
//! let mut session = DeviceSession::new(client, &ROUTER, SessionOptions::new());
//!
//! session.connect().await?;
//! session.subscribe_to_attribute("uploadFrequency", |attrs| {
//!     // apply the new setting
//! });
//! session.set_server_side_rpc_request_handler(|_id, method, _params| {
//!     (method == "getState").then(|| json!({"ok": true}))
//! });
//!
//! loop {
//!     session.wait_msg().await?;
//! }
//! ```
//!
//! Inbound messages flow from the link into [`Router::dispatch`], which
//! classifies the topic ([`topic::InboundTopic`]), decodes the JSON payload
//! and hands it to the matching subscription, pending request or RPC handler.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

#[macro_use]
mod fmt;

pub mod auth;
pub mod client;
pub mod codec;
pub mod error;
pub mod link;
pub mod packet;
pub mod router;
pub mod session;
pub mod topic;
pub mod transport;
pub mod util;

// Re-export key types for easier access at the crate root.
pub use auth::{AuthConfig, BasicCredentials};
pub use client::{MqttClient, MqttOptions};
pub use codec::Attributes;
pub use error::{ConfigError, DecodeError, Error, MqttError};
pub use link::DeviceLink;
pub use packet::QoS;
pub use router::{AttributeFilter, CorrelationId, Routed, Router, RpcReply, SubscriptionHandle};
pub use session::{ConnectionState, DeviceSession, SessionOptions};
pub use transport::TcpTransport;
