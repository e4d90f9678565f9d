//! Message routing and correlation.
//!
//! [`Router`] holds all bookkeeping of a device session: the attribute
//! subscription registry, the two pending-request tables (RPC calls and
//! attribute requests, each with its own correlation counter) and the
//! server-side RPC handler slot.
//!
//! # Locking
//!
//! The state sits behind a single critical-section mutex, so a `Router` can
//! live in a `static` and be shared between the task that drives the session
//! and tasks that register callbacks. Only bookkeeping happens inside the
//! lock: callbacks are moved or cloned out first and invoked after it is
//! released, which leaves them free to call back into the router.
//!
//! Callbacks run on whichever task dispatches the message. They must not
//! wait for another inbound message themselves.
//!
//! # Example
//!
//! ```ignore
//! static ROUTER: Router = Router::new();
//!
//! let handle = ROUTER.subscribe(AttributeFilter::from("uploadFrequency"), |attrs| {
//!     // react to the new setting
//! });
//! ```

pub(crate) mod pending;
pub(crate) mod registry;

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use serde_json::Value;

pub use pending::{CorrelationId, CorrelationIds, PendingTable};
pub use registry::{AttributeCallback, AttributeFilter, SubscriptionHandle, SubscriptionRegistry};

use crate::codec::{self, Attributes, RpcRequest};
use crate::error::DecodeError;
use crate::topic::InboundTopic;

/// Receives the response to an RPC call made by the device.
pub type RpcCallback = Box<dyn FnOnce(CorrelationId, Value) + Send>;

/// Receives the response to an attribute request.
pub type AttributeRequestCallback = Box<dyn FnOnce(Attributes) + Send>;

/// Handles a server-initiated RPC: `(request_id, method, params)`.
///
/// Returning `Some(value)` publishes `value` as the reply once the handler
/// returns. Returning `None` sends nothing; the device may still answer later
/// with [`crate::session::DeviceSession::send_rpc_reply`].
pub type RpcHandler = Arc<dyn Fn(&str, &str, &Value) -> Option<Value> + Send + Sync>;

/// A reply produced by the RPC handler, waiting to be published.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcReply {
    pub request_id: String,
    pub body: Value,
}

/// What happened to an inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    /// The topic is not one of the device API topics.
    Ignored,
    /// An attribute push ran this many callbacks.
    Attributes(usize),
    /// A server RPC. `handled` is false when no handler is set.
    RpcRequest { handled: bool, reply: Option<RpcReply> },
    /// An RPC response; `matched` is false for orphans, which are dropped.
    RpcResponse { id: CorrelationId, matched: bool },
    /// An attribute response; `matched` is false for orphans, which are dropped.
    AttributeResponse { id: CorrelationId, matched: bool },
}

struct RouterState {
    subscriptions: SubscriptionRegistry,
    rpc_calls: PendingTable<RpcCallback>,
    attribute_requests: PendingTable<AttributeRequestCallback>,
    rpc_handler: Option<RpcHandler>,
}

/// Shared routing state of a device session.
pub struct Router {
    state: Mutex<CriticalSectionRawMutex, RefCell<RouterState>>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(RouterState {
                subscriptions: SubscriptionRegistry::new(),
                rpc_calls: PendingTable::new(),
                attribute_requests: PendingTable::new(),
                rpc_handler: None,
            })),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut RouterState) -> R) -> R {
        self.state.lock(|state| f(&mut state.borrow_mut()))
    }

    // --- attribute subscriptions ---

    pub fn subscribe<F>(&self, filter: AttributeFilter, callback: F) -> SubscriptionHandle
    where
        F: Fn(&Attributes) + Send + Sync + 'static,
    {
        let handle = self.with(|state| state.subscriptions.subscribe(filter, Arc::new(callback)));
        debug!("Subscribed to attributes with id {}", handle.get());
        handle
    }

    /// Removes one registration; returns false if `handle` was not registered.
    ///
    /// The callback is dropped after the lock is released, so state it
    /// captured may touch the router from its `Drop`.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let Some(callback) = self.with(|state| state.subscriptions.unsubscribe(handle)) else {
            return false;
        };
        drop(callback);
        debug!("Unsubscribed subscription id {}", handle.get());
        true
    }

    pub fn unsubscribe_all(&self) {
        let removed = self.with(|state| state.subscriptions.clear());
        drop(removed);
        debug!("Unsubscribed from all attributes");
    }

    pub fn subscription_count(&self) -> usize {
        self.with(|state| state.subscriptions.len())
    }

    /// Runs every callback interested in `attributes` and returns how many ran.
    pub fn dispatch_attributes(&self, attributes: &Attributes) -> usize {
        let callbacks = self.with(|state| state.subscriptions.matching(attributes));
        for callback in &callbacks {
            callback(attributes);
        }
        callbacks.len()
    }

    // --- device-initiated RPC calls ---

    pub fn register_rpc_call<F>(&self, callback: F) -> CorrelationId
    where
        F: FnOnce(CorrelationId, Value) + Send + 'static,
    {
        self.with(|state| state.rpc_calls.register(Box::new(callback)))
    }

    /// Drops a pending call without running its callback.
    pub fn cancel_rpc_call(&self, id: CorrelationId) -> bool {
        self.with(|state| state.rpc_calls.take(id)).is_some()
    }

    pub fn pending_rpc_calls(&self) -> usize {
        self.with(|state| state.rpc_calls.len())
    }

    /// Hands `response` to the call registered under `id`. An unknown id is
    /// not an error: the response is dropped and `false` returned.
    pub fn resolve_rpc_call(&self, id: CorrelationId, response: Value) -> bool {
        match self.with(|state| state.rpc_calls.take(id)) {
            Some(callback) => {
                callback(id, response);
                true
            }
            None => {
                debug!("Dropping RPC response {} with no pending call", id);
                false
            }
        }
    }

    // --- attribute requests ---

    pub fn register_attribute_request<F>(&self, callback: F) -> CorrelationId
    where
        F: FnOnce(Attributes) + Send + 'static,
    {
        self.with(|state| state.attribute_requests.register(Box::new(callback)))
    }

    pub fn cancel_attribute_request(&self, id: CorrelationId) -> bool {
        self.with(|state| state.attribute_requests.take(id)).is_some()
    }

    pub fn pending_attribute_requests(&self) -> usize {
        self.with(|state| state.attribute_requests.len())
    }

    pub fn resolve_attribute_request(&self, id: CorrelationId, attributes: Attributes) -> bool {
        match self.with(|state| state.attribute_requests.take(id)) {
            Some(callback) => {
                callback(attributes);
                true
            }
            None => {
                debug!("Dropping attribute response {} with no pending request", id);
                false
            }
        }
    }

    // --- server-side RPC ---

    /// Installs the server RPC handler, replacing any previous one. Returns
    /// true if a handler was replaced.
    pub fn set_rpc_handler<F>(&self, handler: F) -> bool
    where
        F: Fn(&str, &str, &Value) -> Option<Value> + Send + Sync + 'static,
    {
        let handler: RpcHandler = Arc::new(handler);
        self.with(|state| state.rpc_handler.replace(handler)).is_some()
    }

    pub fn clear_rpc_handler(&self) -> bool {
        self.with(|state| state.rpc_handler.take()).is_some()
    }

    pub fn has_rpc_handler(&self) -> bool {
        self.with(|state| state.rpc_handler.is_some())
    }

    /// Runs the handler for a server RPC, if one is set.
    pub fn handle_rpc_request(&self, request_id: &str, request: &RpcRequest) -> Routed {
        let Some(handler) = self.with(|state| state.rpc_handler.clone()) else {
            debug!("No handler for RPC request {}", request_id);
            return Routed::RpcRequest {
                handled: false,
                reply: None,
            };
        };
        let reply = handler(request_id, &request.method, &request.params).map(|body| RpcReply {
            request_id: String::from(request_id),
            body,
        });
        Routed::RpcRequest {
            handled: true,
            reply,
        }
    }

    // --- dispatch ---

    /// Routes an already decoded payload according to its topic kind.
    pub fn route(&self, topic: InboundTopic<'_>, payload: Value) -> Result<Routed, DecodeError> {
        match topic {
            InboundTopic::RpcRequest(request_id) => {
                let request = RpcRequest::from_value(payload)?;
                Ok(self.handle_rpc_request(request_id, &request))
            }
            InboundTopic::RpcResponse(id) => Ok(Routed::RpcResponse {
                id,
                matched: self.resolve_rpc_call(id, payload),
            }),
            InboundTopic::AttributeResponse(id) => {
                let attributes = codec::into_attributes(payload)?;
                Ok(Routed::AttributeResponse {
                    id,
                    matched: self.resolve_attribute_request(id, attributes),
                })
            }
            InboundTopic::AttributeUpdate => {
                let attributes = codec::into_attributes(payload)?;
                Ok(Routed::Attributes(self.dispatch_attributes(&attributes)))
            }
        }
    }

    /// Classifies an inbound message, decodes its payload and routes it.
    ///
    /// Messages on unknown topics are ignored without looking at the payload.
    pub fn dispatch(&self, topic: &str, payload: &[u8]) -> Result<Routed, DecodeError> {
        let Some(kind) = InboundTopic::parse(topic) else {
            trace!("Ignoring message on {}", topic);
            return Ok(Routed::Ignored);
        };
        trace!("Rx on {}: {} bytes", topic, payload.len());
        let payload = codec::decode(payload).inspect_err(|err| {
            warn!("Undecodable payload on {}: {:?}", topic, err);
        })?;
        self.route(kind, payload).inspect_err(|err| {
            warn!("Unexpected payload on {}: {:?}", topic, err);
        })
    }
}
