//! # Jewel Core
//!
//! The "Brain" of the Jewel assistant service - skill registry, sandboxed
//! skill execution, tool catalog and the remote run loop.
//!
//! ## Architecture
//!
//! - `state/` - SQLite-backed skill registry with an append-only audit mirror
//! - `sandbox` - capability-restricted Rhai evaluation context
//! - `loader` - materializes registry rows into the in-process callable table
//! - `catalog` - derives the tool list advertised to the remote assistant
//! - `assistant/` - remote protocol client, conversation session and the
//!   run poller / tool dispatcher
//!
//! ## Usage
//!
//! ```rust,ignore
//! use jewel_core::assistant::{ConversationSession, RunDriver};
//!
//! let session = ConversationSession::create(&client, &catalog, instructions, model).await?;
//! session.post_user_message(&client, "What's the weather in Tokyo?").await?;
//! let run = session.start_run(&client).await?;
//! let outcome = driver.drive(&session.thread_id, run).await?;
//! ```

pub mod assistant;
pub mod catalog;
pub mod config;
pub mod error;
pub mod loader;
pub mod sandbox;
pub mod state;
