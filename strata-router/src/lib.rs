//! Strata router node.
//!
//! The router hosts the authoritative object store and serves
//! connected clients: save/load/query requests are delegated to the
//! store, and every committed save is fanned out to the subscriptions
//! whose filter matches, each on its own ordered delivery channel. A
//! slow or cancelled subscriber never delays a commit or another
//! subscriber.
//!
//! Concrete network transports are pluggable adapters behind the
//! `RequestTransport` seam; the loopback transport shipped here is the
//! only one the core needs.

mod config;
mod hub;
mod node;
mod protocol;
mod transport;

pub use config::RouterConfig;
pub use hub::SubscriptionStream;
pub use node::{ConnectOutcome, RedirectPolicy, RouterNode, SessionHandle};
pub use protocol::{Request, Response, SubscribeSpec, SubscriptionMode};
pub use transport::{LoopbackTransport, RequestTransport};
