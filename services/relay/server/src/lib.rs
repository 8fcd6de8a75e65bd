//! Store-and-forward relay server.
//!
//! Clients register a name and public key, discover each other, and leave
//! opaque messages in each other's mailboxes; receivers collect them later.
//! The server never interprets message content.
//!
//! ## Components
//!
//! - **Reader**: assembles one request from a readable connection, including
//!   content that spans several packets
//! - **Writer**: sends a response padded or chunked to the packet size
//! - **Dispatcher**: validates the header and requester, runs the handler and
//!   deletes delivered messages once the response is out
//! - **Handlers**: one per request code, held in an immutable [`Router`]
//! - **Server**: single-threaded readiness loop, one request per connection
//! - **Client**: connection-per-call client for the same protocol
//!
//! ## Example
//!
//! ```rust,no_run
//! use relay_server::{Dispatcher, RelayClient, RelayServer, Router, DEFAULT_BACKLOG};
//! use relay_storage::Storage;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let dispatcher = Dispatcher::new(Arc::new(Storage::in_memory()), Arc::new(Router::standard()));
//! let server = RelayServer::bind("127.0.0.1:1357".parse()?, DEFAULT_BACKLOG, dispatcher)?;
//! let addr = server.local_addr()?;
//! tokio::spawn(server.run());
//!
//! let mut alice = RelayClient::new(addr);
//! alice.register("alice", vec![0u8; 160].into()).await?;
//! for message in alice.unread_messages().await? {
//!     println!("message {} from {}", message.id, message.from);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod dispatcher;
pub mod handlers;
pub mod reader;
pub mod server;
pub mod transport;
pub mod writer;

// Re-export main types
pub use client::{ClientError, RelayClient};
pub use dispatcher::{DispatchError, Dispatcher};
pub use handlers::{
    ClientsListHandler, HandlerContext, HandlerError, PublicKeyHandler, RegisterHandler, Reply,
    RequestHandler, Router, SendMessageHandler, UnreadMessagesHandler,
};
pub use reader::{ReadError, RequestReader};
pub use server::{RelayServer, DEFAULT_BACKLOG};
pub use writer::{ResponseWriter, SendError};
