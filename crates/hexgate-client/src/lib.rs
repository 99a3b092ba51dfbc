//! hexgate engine client
//!
//! Keeps one session open to the execution engine and multiplexes any
//! number of concurrent script executions over it. The engine may call back
//! into host functions registered in the [`CallbackRegistry`] while a script
//! runs.
//!
//! ```no_run
//! use hexgate_client::{install_builtins, ClientConfig, EngineClient};
//!
//! # async fn demo() -> hexgate_common::Result<()> {
//! let client = EngineClient::new(ClientConfig::new("127.0.0.1:9001"))?;
//! install_builtins(client.registry());
//! client.start().await;
//!
//! let result = client.execute("print('hi'); 1 + 1").await?;
//! # let _ = result;
//! # Ok(())
//! # }
//! ```

pub mod builtins;
pub mod client;
pub mod config;
pub mod multiplexer;
pub mod pending;
pub mod registry;
pub mod session;

pub use builtins::{install_builtins, print_handler, PRINT};
pub use client::EngineClient;
pub use config::{ClientConfig, ReconnectConfig, DEFAULT_ENGINE_ADDR};
pub use multiplexer::{Dispatcher, Multiplexer};
pub use pending::PendingTable;
pub use registry::{ArgPolicy, CallbackError, CallbackHandler, CallbackRegistry};
pub use session::{InboundHandler, Link, Session, SessionState};
