// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reactors: one mio event loop per thread.
//!
//! # Architecture
//!
//! ```text
//! +-------------------------------------------------------------+
//! |                         Reactor                              |
//! |  +-------------------------------------------------------+  |
//! |  |                    mio::Poll                           |  |
//! |  |  - sources registered by attached EventHandlers        |  |
//! |  |  - Waker (command channel)                             |  |
//! |  +-------------------------------------------------------+  |
//! |          |                   |                    |          |
//! |          v                   v                    v          |
//! |  +-------------+    +-----------------+   +--------------+  |
//! |  |  ready()    |    | Attach / Notify |   |   tick()     |  |
//! |  |  per token  |    | Detach commands |   | every 100ms  |  |
//! |  +-------------+    +-----------------+   +--------------+  |
//! +-------------------------------------------------------------+
//! ```
//!
//! Everything bound to a reactor (listeners, connectors, channels) is an
//! [`EventHandler`] owned by the loop and keyed by its [`Token`]. All callbacks
//! of one handler run on the reactor thread, so a channel's read, write, tick
//! and error paths never race each other. Other threads talk to a reactor only
//! through its [`ReactorHandle`].

mod pool;

pub use pool::ReactorPool;

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender, TryRecvError};
use mio::event::Event;
use mio::{Events, Poll, Registry, Token, Waker};
use parking_lot::Mutex;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Token of the command waker.
const WAKER_TOKEN: Token = Token(usize::MAX);

/// Upper bound on a single poll wait.
const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Maximum events to process per poll
const MAX_EVENTS: usize = 1024;

// ============================================================================
// Handler interface
// ============================================================================

/// Readiness reported for one token.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
    pub read_closed: bool,
    pub write_closed: bool,
}

impl Readiness {
    pub fn readable() -> Self {
        Self {
            readable: true,
            ..Default::default()
        }
    }

    pub fn writable() -> Self {
        Self {
            writable: true,
            ..Default::default()
        }
    }
}

impl From<&Event> for Readiness {
    fn from(event: &Event) -> Self {
        Self {
            readable: event.is_readable(),
            writable: event.is_writable(),
            error: event.is_error(),
            read_closed: event.is_read_closed(),
            write_closed: event.is_write_closed(),
        }
    }
}

/// What the reactor should do with a handler after a callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Continue,
    /// Remove the handler and call [`EventHandler::close`].
    Close(String),
}

/// Why a handler was removed from its reactor.
#[derive(Debug)]
pub enum CloseReason {
    /// The handler returned [`Action::Close`].
    Requested(String),
    /// [`ReactorHandle::detach`] was called.
    Detached,
    /// [`EventHandler::register`] failed.
    RegisterFailed(io::Error),
    /// The reactor is stopping.
    Shutdown,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::Requested(reason) => write!(f, "{}", reason),
            CloseReason::Detached => write!(f, "detached"),
            CloseReason::RegisterFailed(e) => write!(f, "register failed: {}", e),
            CloseReason::Shutdown => write!(f, "reactor shutdown"),
        }
    }
}

/// Something driven by a reactor.
pub trait EventHandler: Send {
    /// Register I/O sources under `token`. Called on the reactor thread.
    fn register(&mut self, registry: &Registry, token: Token) -> io::Result<()>;

    /// I/O readiness for this handler's token.
    fn ready(&mut self, registry: &Registry, readiness: Readiness) -> Action;

    /// Another thread asked for attention (e.g. data queued for sending).
    fn notify(&mut self, _registry: &Registry) -> Action {
        Action::Continue
    }

    /// Periodic tick (handshake deadlines, retry backoff, keepalive).
    fn tick(&mut self, _registry: &Registry, _now: Instant) -> Action {
        Action::Continue
    }

    /// The handler is being dropped; deregister sources and clean up.
    fn close(&mut self, registry: &Registry, reason: CloseReason);
}

enum Command {
    Attach(Token, Box<dyn EventHandler>),
    Notify(Token),
    Detach(Token),
    Shutdown,
}

// ============================================================================
// Reactor handle
// ============================================================================

/// Cloneable handle for sending commands to a reactor.
#[derive(Clone)]
pub struct ReactorHandle {
    id: usize,
    name: Arc<str>,
    cmd_tx: Sender<Command>,
    waker: Arc<Waker>,
    next_token: Arc<AtomicUsize>,
    running: Arc<AtomicBool>,
}

impl ReactorHandle {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Reserve a token for a handler attached later with [`Self::attach_with`].
    pub fn alloc_token(&self) -> Token {
        Token(self.next_token.fetch_add(1, Ordering::Relaxed))
    }

    /// Hand `handler` to the reactor under a fresh token.
    pub fn attach(&self, handler: Box<dyn EventHandler>) -> Result<Token> {
        let token = self.alloc_token();
        self.attach_with(token, handler)?;
        Ok(token)
    }

    /// Hand `handler` to the reactor under a reserved token.
    pub fn attach_with(&self, token: Token, handler: Box<dyn EventHandler>) -> Result<()> {
        self.send(Command::Attach(token, handler))
    }

    /// Wake the handler's [`EventHandler::notify`].
    pub fn notify(&self, token: Token) -> Result<()> {
        self.send(Command::Notify(token))
    }

    /// Remove and close the handler.
    pub fn detach(&self, token: Token) -> Result<()> {
        self.send(Command::Detach(token))
    }

    fn send(&self, cmd: Command) -> Result<()> {
        if !self.is_running() {
            return Err(Error::InvalidState(format!("reactor {} not running", self.name)));
        }
        self.cmd_tx
            .send(cmd)
            .map_err(|_| Error::InvalidState(format!("reactor {} stopped", self.name)))?;
        self.waker.wake()?;
        Ok(())
    }
}

impl std::fmt::Debug for ReactorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactorHandle")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .finish()
    }
}

// ============================================================================
// Reactor
// ============================================================================

/// One event-loop thread.
pub struct Reactor {
    handle: ReactorHandle,
    pending: Mutex<Option<EventLoop>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Reactor {
    /// Create the poll and command channel; the thread starts in [`Self::start`].
    pub fn new(id: usize, name: &str, tick_interval: Duration) -> Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
        let (cmd_tx, cmd_rx) = channel::unbounded();

        let name: Arc<str> = Arc::from(name);
        let handle = ReactorHandle {
            id,
            name: Arc::clone(&name),
            cmd_tx,
            waker,
            next_token: Arc::new(AtomicUsize::new(0)),
            running: Arc::new(AtomicBool::new(false)),
        };
        let event_loop = EventLoop {
            name,
            poll,
            cmd_rx,
            handlers: HashMap::new(),
            tick_interval,
            last_tick: Instant::now(),
        };

        Ok(Self {
            handle,
            pending: Mutex::new(Some(event_loop)),
            thread: Mutex::new(None),
        })
    }

    pub fn handle(&self) -> ReactorHandle {
        self.handle.clone()
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_running()
    }

    /// Spawn the event-loop thread. A stopped reactor cannot be restarted.
    pub fn start(&self) -> Result<()> {
        let Some(event_loop) = self.pending.lock().take() else {
            if self.is_running() {
                return Ok(());
            }
            return Err(Error::InvalidState(format!(
                "reactor {} cannot be restarted",
                self.handle.name
            )));
        };

        self.handle.running.store(true, Ordering::Release);
        let spawned = thread::Builder::new()
            .name(format!("dbc-{}", self.handle.name))
            .spawn(move || event_loop.run());

        match spawned {
            Ok(join) => {
                *self.thread.lock() = Some(join);
                Ok(())
            }
            Err(e) => {
                self.handle.running.store(false, Ordering::Release);
                Err(e.into())
            }
        }
    }

    /// Request shutdown, then join. Idempotent.
    pub fn stop(&self) {
        self.pending.lock().take();
        let Some(join) = self.thread.lock().take() else {
            return;
        };

        self.handle.running.store(false, Ordering::Release);
        let _ = self.handle.cmd_tx.send(Command::Shutdown);
        let _ = self.handle.waker.wake();
        if join.join().is_err() {
            log::error!("[REACTOR] {} thread panicked", self.handle.name);
        }
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// Event loop
// ============================================================================

struct EventLoop {
    name: Arc<str>,
    poll: Poll,
    cmd_rx: Receiver<Command>,
    handlers: HashMap<Token, Box<dyn EventHandler>>,
    tick_interval: Duration,
    last_tick: Instant,
}

impl EventLoop {
    fn run(mut self) {
        log::debug!("[REACTOR] {} started", self.name);
        let mut events = Events::with_capacity(MAX_EVENTS);
        let timeout = self.tick_interval.min(DEFAULT_POLL_TIMEOUT);

        loop {
            if let Err(e) = self.poll.poll(&mut events, Some(timeout)) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                log::error!("[REACTOR] {} poll failed: {}", self.name, e);
                break;
            }

            for event in events.iter() {
                let token = event.token();
                if token == WAKER_TOKEN {
                    continue;
                }
                self.dispatch_ready(token, Readiness::from(event));
            }

            if !self.handle_commands() {
                break;
            }

            let now = Instant::now();
            if now.duration_since(self.last_tick) >= self.tick_interval {
                self.last_tick = now;
                self.tick_all(now);
            }
        }

        self.shutdown();
        log::debug!("[REACTOR] {} stopped", self.name);
    }

    fn dispatch_ready(&mut self, token: Token, readiness: Readiness) {
        let registry = self.poll.registry();
        let action = match self.handlers.get_mut(&token) {
            Some(handler) => handler.ready(registry, readiness),
            None => return,
        };
        self.apply(token, action);
    }

    /// Returns false when the loop must exit.
    fn handle_commands(&mut self) -> bool {
        loop {
            match self.cmd_rx.try_recv() {
                Ok(Command::Attach(token, mut handler)) => {
                    let registry = self.poll.registry();
                    match handler.register(registry, token) {
                        Ok(()) => {
                            self.handlers.insert(token, handler);
                        }
                        Err(e) => {
                            log::warn!("[REACTOR] {} register {:?} failed: {}", self.name, token, e);
                            handler.close(registry, CloseReason::RegisterFailed(e));
                        }
                    }
                }
                Ok(Command::Notify(token)) => {
                    let registry = self.poll.registry();
                    let action = match self.handlers.get_mut(&token) {
                        Some(handler) => handler.notify(registry),
                        None => continue,
                    };
                    self.apply(token, action);
                }
                Ok(Command::Detach(token)) => {
                    if let Some(mut handler) = self.handlers.remove(&token) {
                        handler.close(self.poll.registry(), CloseReason::Detached);
                    }
                }
                Ok(Command::Shutdown) => return false,
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            }
        }
    }

    fn tick_all(&mut self, now: Instant) {
        let registry = self.poll.registry();
        let mut closing = Vec::new();
        for (token, handler) in self.handlers.iter_mut() {
            if let Action::Close(reason) = handler.tick(registry, now) {
                closing.push((*token, reason));
            }
        }
        for (token, reason) in closing {
            self.apply(token, Action::Close(reason));
        }
    }

    fn apply(&mut self, token: Token, action: Action) {
        if let Action::Close(reason) = action {
            if let Some(mut handler) = self.handlers.remove(&token) {
                log::trace!("[REACTOR] {} closing {:?}: {}", self.name, token, reason);
                handler.close(self.poll.registry(), CloseReason::Requested(reason));
            }
        }
    }

    fn shutdown(&mut self) {
        let registry = self.poll.registry();
        // handlers attached after the shutdown request
        while let Ok(cmd) = self.cmd_rx.try_recv() {
            if let Command::Attach(_, mut handler) = cmd {
                handler.close(registry, CloseReason::Shutdown);
            }
        }
        for (_, mut handler) in self.handlers.drain() {
            handler.close(registry, CloseReason::Shutdown);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
