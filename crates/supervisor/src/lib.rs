//! Bootstrap for the control plane of a lightweight Kubernetes distribution.
//!
//! The crate connects to the API server with the credentials of one role,
//! installs the schema extensions that optional controllers depend on, and
//! starts the built-in controller groups with bounded concurrency. The
//! [`node::NodeLifecycleController`] runs in the `core` group and removes the
//! join credential of every node that leaves the cluster.
//!
//! # Example
//! ```rust,no_run
//! use supervisor::{bootstrap, config::Config};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default_config()?;
//!     let shutdown = CancellationToken::new();
//!     let context = bootstrap(&config, &shutdown).await?;
//!     println!("connected as {}", context.connection().user_agent());
//!
//!     shutdown.cancel();
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![cfg_attr(feature = "docs", feature(doc_cfg))]

mod bootstrap;
pub mod config;
pub mod connection;
pub mod context;
pub mod error;
pub mod factory;
pub mod helm;
pub mod node;
pub mod schema;
pub mod startup;
pub mod version;

pub use self::bootstrap::bootstrap;

#[doc(inline)]
pub use context::Context;
#[doc(inline)]
pub use error::{Error, Result};
