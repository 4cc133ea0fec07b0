//! # bridgerun
//!
//! The script side of a scripting bridge. A script is a separate process that
//! drives a host application by writing call lines to stdout and reading reply
//! lines from stdin. This crate correlates those replies with the calls that
//! caused them and turns them into blocking calls, futures, streams, task
//! batches and typed events.
//!
//! ## Philosophy
//!
//! - **One Context**: a [`Link`] owns everything a script's connection needs and
//!   is passed by reference. There is no global registry.
//! - **Never Hang on a Dead Host**: every blocking operation returns promptly once
//!   the link is closed.
//! - **Protocol Errors are Data**: a malformed reply is logged and skipped; it never
//!   stops the service loop.
//!
//! ## Example
//!
//! ```no_run
//! use bridgerun::Executor;
//!
//! fn main() -> anyhow::Result<()> {
//!     bridgerun::run_script(|link| {
//!         let health = link.call("player_health", vec![])?;
//!         let _tick = Executor::Tick.enter();
//!         link.send("echo", vec![format!("health is {}", health).into()])?;
//!         Ok(())
//!     })
//! }
//! ```

use std::sync::Arc;

use anyhow::anyhow;

pub mod call;
pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod future;
pub mod link;
pub mod logging;
pub mod mock_transport;
pub mod queue;
pub mod registry;
pub mod task;
pub mod transport;
pub mod watchdog;

pub use bridgerpc::Value;
pub use call::Call;
pub use config::LinkConfig;
pub use error::Error;
pub use error::Result;
pub use events::ChatFilter;
pub use events::Event;
pub use events::EventKind;
pub use executor::Executor;
pub use executor::ExecutorScope;
pub use future::CallFuture;
pub use future::ReplyStream;
pub use link::Link;
pub use link::LinkState;
pub use queue::EventQueue;
pub use queue::HandlerId;
pub use task::Arg;
pub use task::ScheduleId;
pub use task::Task;
pub use transport::LineTransport;
pub use transport::Transport;

/// Runs a script over stdio.
///
/// Loads the configuration from the environment, installs logging, starts the
/// link, and runs `main` on its own thread under the watchdog. Returns once the
/// link has closed and `main` has returned.
pub fn run_script<F>(main: F) -> anyhow::Result<()>
where
    F: FnOnce(&Link) -> anyhow::Result<()> + Send + 'static,
{
    let config = LinkConfig::from_env()?;
    let _guard = logging::init(&config)?;

    let link = Arc::new(Link::start(Box::new(LineTransport::stdio()), config)?);
    let script = Arc::clone(&link);
    let main_thread = link.spawn_main(move || main(script.as_ref()))?;

    link.join();
    match main_thread.join() {
        Ok(outcome) => outcome,
        Err(_) => Err(anyhow!("script main thread panicked")),
    }
}
