//! uplink - controller address resolution for device agents
//!
//! Keeps a device's control-plane target pointed at a reachable address of
//! the selected destination (redirector or manager):
//! - Non-blocking hostname lookups over one shared resolver channel
//! - Per-destination address lists with a failover cursor
//! - `proto:host:port` / `proto:[host]:port` target publication
//! - Forced channel teardown when lookups stall
//!
//! # Architecture
//!
//! ```text
//!              +-----------------+
//!              |  Agent (loop)   |
//!              +--------+--------+
//!                       |
//!              +--------v--------+
//!              |  dns::Resolver  |
//!              +--+-----+-----+--+
//!                 |     |     |
//!   +-------------v+  +-v-----v---------+
//!   | ResolverChan |  | addr (records,  |
//!   |  + backend   |  |  target sinks)  |
//!   +--------------+  +-----------------+
//! ```

pub mod addr;
pub mod common;
pub mod config;
pub mod dns;

pub use addr::Destination;
pub use common::error::{Error, Result};
pub use config::Config;

use dns::{CompletionEffect, Resolver};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{info, warn};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Requests from the connection-establishment side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// The published target could not be connected; fail over
    ConnectFailed,
    /// Resolve the current destination again
    Resolve,
    /// Switch to another destination and resolve it
    Select(Destination),
    /// Stop the agent
    Shutdown,
}

/// Cloneable handle for sending commands to a running agent
#[derive(Debug, Clone)]
pub struct AgentHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl AgentHandle {
    pub fn send(&self, command: Command) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| Error::internal("agent is not running"))
    }

    pub fn connect_failed(&self) -> Result<()> {
        self.send(Command::ConnectFailed)
    }

    pub fn resolve(&self) -> Result<()> {
        self.send(Command::Resolve)
    }

    pub fn select(&self, dest: Destination) -> Result<()> {
        self.send(Command::Select(dest))
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown)
    }
}

/// The resolution event loop
pub struct Agent {
    resolver: Resolver,
    commands: mpsc::UnboundedReceiver<Command>,
    handle: AgentHandle,
    resolve_timeout: Duration,
    retry_interval: Duration,
    /// Channel teardown deadline while lookups are outstanding
    deadline: Option<Instant>,
    /// Next resolve attempt after a failure
    retry_at: Option<Instant>,
}

impl Agent {
    pub fn new(resolver: Resolver, resolve_timeout: Duration, retry_interval: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Agent {
            resolver,
            commands: rx,
            handle: AgentHandle { tx },
            resolve_timeout,
            retry_interval,
            deadline: None,
            retry_at: None,
        }
    }

    /// Create an agent from configuration
    pub fn from_config(config: &Config) -> Self {
        info!("Initializing uplink v{}", VERSION);
        Agent::new(
            Resolver::from_config(config),
            config.resolve_timeout(),
            config.retry_interval(),
        )
    }

    pub fn handle(&self) -> AgentHandle {
        self.handle.clone()
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Drive resolution until a `Shutdown` command arrives
    pub async fn run(&mut self) -> Result<()> {
        info!(
            "Starting agent for {}",
            self.resolver.book().current_destination()
        );
        self.start_resolve();

        loop {
            let deadline = self.deadline;
            let retry_at = self.retry_at;

            tokio::select! {
                Some(completion) = self.resolver.next_completion() => {
                    self.on_completion(completion);
                }
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.deadline = None;
                    let cancelled = self.resolver.resolve_timeout();
                    warn!("No completion within {:?}, cancelled {} lookups", self.resolve_timeout, cancelled);
                }
                _ = sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                    self.retry_at = None;
                    self.start_resolve();
                }
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.on_command(command),
                },
            }

            if self.resolver.take_retry() {
                info!(
                    "Transient resolution failure #{}, retrying in {:?}",
                    self.resolver.retry().count(),
                    self.retry_interval
                );
                self.schedule_retry();
            }
        }

        info!("Received shutdown");
        self.resolver.shutdown();
        info!("Agent stopped");
        Ok(())
    }

    fn start_resolve(&mut self) {
        let dest = self.resolver.book().current_destination();
        match self.resolver.resolve(dest) {
            Ok(_) => {
                self.deadline = Some(Instant::now() + self.resolve_timeout);
            }
            Err(e) => {
                warn!("{}: resolve not dispatched: {}", dest, e);
                self.schedule_retry();
            }
        }
    }

    fn schedule_retry(&mut self) {
        if self.retry_at.is_none() {
            self.retry_at = Some(Instant::now() + self.retry_interval);
        }
    }

    fn on_completion(&mut self, completion: dns::Completion) {
        let dest = completion.destination;
        let effect = self.resolver.on_completion(completion);

        if self.resolver.channel().busy_count() == 0 {
            self.deadline = None;
        }

        if dest != self.resolver.book().current_destination() {
            return;
        }

        match effect {
            CompletionEffect::Resolved(_) => match self.resolver.write_current_target() {
                Ok(_) => {
                    self.retry_at = None;
                    self.resolver.book_mut().current_mut().mark_updated();
                }
                Err(e) => {
                    warn!("{}: cannot publish target: {}", dest, e);
                    self.schedule_retry();
                }
            },
            CompletionEffect::Unhandled => self.schedule_retry(),
            // retry flag handled by the loop
            CompletionEffect::Transient | CompletionEffect::Destroyed => {}
        }
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::ConnectFailed => match self.resolver.write_next_target() {
                Ok(_) => {}
                Err(Error::AddressUnavailable(reason)) => {
                    info!("Addresses exhausted ({}), resolving again", reason);
                    self.start_resolve();
                }
                Err(e) => {
                    warn!("Failover failed: {}", e);
                    self.start_resolve();
                }
            },
            Command::Resolve => self.start_resolve(),
            Command::Select(dest) => {
                info!("Switching destination to {}", dest);
                self.resolver.book_mut().select(dest);
                self.start_resolve();
            }
            Command::Shutdown => {}
        }
    }
}
