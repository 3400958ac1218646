pub mod client;
pub mod codec;
pub mod connection;
pub mod loopback;
pub mod payload;
pub mod subscription;

pub use client::ChatClient;
pub use connection::{Connection, ConnectionProvider, ConnectionSlot};
pub use loopback::{LoopbackConnection, RequestHandler};
pub use payload::WirePayload;
pub use subscription::{MessageSubscription, Subscription, SubscriptionHandle};
