// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service modules: per-module mailbox and worker thread.
//!
//! The bus calls subscribers synchronously on whatever thread publishes,
//! usually a reactor. A [`ServiceModule`] turns that into asynchronous
//! delivery: its bus callbacks only push into a bounded mailbox, and one
//! worker thread drains the mailbox and runs the module's invokers.
//!
//! ```text
//!  reactor threads          bus            module
//!  ---------------    ----------------    ---------------------------------
//!  publish(name) ---> callback: push ---> [mailbox] --> worker --> invoker
//!  tick thread   ---> callback: push -------^                  \-> timers
//! ```
//!
//! Invokers and timers of one module never run concurrently.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::bus::{SubscriptionId, TopicBus};
use crate::error::{Error, Result};
use crate::protocol::{Message, TimeTick, TIME_TICK_NOTIFICATION};
use crate::timer::{FiredTimer, TimerId, TimerManager};

/// Default mailbox capacity.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 102_400;

/// How long the worker blocks on an empty mailbox before rechecking `running`.
const MAILBOX_WAIT: Duration = Duration::from_millis(500);

/// Unit of work queued for a module.
#[derive(Clone, Debug)]
pub enum Mail {
    Message(Arc<Message>),
    Tick(u64),
}

/// Handed to invokers; gives access to the module's timers and the bus.
pub struct ModuleContext<'a> {
    name: &'a str,
    bus: &'a Arc<TopicBus>,
    timers: &'a mut TimerManager,
}

impl ModuleContext<'_> {
    pub fn module_name(&self) -> &str {
        self.name
    }

    pub fn bus(&self) -> &Arc<TopicBus> {
        self.bus
    }

    /// See [`TimerManager::add_timer`].
    pub fn add_timer(&mut self, name: &str, delay_ms: u64, period_ms: u64, repeat: u64) -> TimerId {
        self.timers.add_timer(name, delay_ms, period_ms, repeat, "")
    }

    pub fn remove_timer(&mut self, id: TimerId) -> bool {
        self.timers.remove_timer(id)
    }
}

pub type MessageInvoker = Box<dyn FnMut(&mut ModuleContext<'_>, &Arc<Message>) -> Result<()> + Send>;
pub type TimerInvoker = Box<dyn FnMut(&mut ModuleContext<'_>, &FiredTimer) -> Result<()> + Send>;

struct Mailbox {
    queue: Mutex<VecDeque<Mail>>,
    ready: Condvar,
    capacity: usize,
}

impl Mailbox {
    fn push(&self, mail: Mail) -> Result<()> {
        let mut queue = self.queue.lock();
        if queue.len() >= self.capacity {
            return Err(Error::QueueFull(self.capacity));
        }
        queue.push_back(mail);
        drop(queue);
        self.ready.notify_one();
        Ok(())
    }

    fn pop(&self, wait: Duration) -> Option<Mail> {
        let mut queue = self.queue.lock();
        if queue.is_empty() {
            let _ = self.ready.wait_for(&mut queue, wait);
        }
        queue.pop_front()
    }

    fn len(&self) -> usize {
        self.queue.lock().len()
    }
}

struct Core {
    messages: HashMap<String, MessageInvoker>,
    timers: HashMap<String, TimerInvoker>,
    timer_mgr: TimerManager,
}

/// Named module with one worker thread.
pub struct ServiceModule {
    name: String,
    bus: Arc<TopicBus>,
    mailbox: Arc<Mailbox>,
    core: Arc<Mutex<Core>>,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    subscriptions: Mutex<Vec<SubscriptionId>>,
}

impl ServiceModule {
    /// New module; `tick_interval` must match the [`crate::timer::TickSource`]
    /// publishing on `bus`.
    pub fn new(name: &str, bus: Arc<TopicBus>, tick_interval: Duration) -> Self {
        Self::with_capacity(name, bus, tick_interval, DEFAULT_MAILBOX_CAPACITY)
    }

    pub fn with_capacity(
        name: &str,
        bus: Arc<TopicBus>,
        tick_interval: Duration,
        capacity: usize,
    ) -> Self {
        Self {
            name: name.to_string(),
            bus,
            mailbox: Arc::new(Mailbox {
                queue: Mutex::new(VecDeque::new()),
                ready: Condvar::new(),
                capacity,
            }),
            core: Arc::new(Mutex::new(Core {
                messages: HashMap::new(),
                timers: HashMap::new(),
                timer_mgr: TimerManager::new(tick_interval),
            })),
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn mailbox_len(&self) -> usize {
        self.mailbox.len()
    }

    /// Run `invoker` for every message published under `msg_name`.
    ///
    /// Rebinding a name replaces the previous invoker. Invokers run with the
    /// module locked: they must use their [`ModuleContext`] rather than call
    /// back into the module.
    pub fn bind_message<F>(&self, msg_name: &str, invoker: F)
    where
        F: FnMut(&mut ModuleContext<'_>, &Arc<Message>) -> Result<()> + Send + 'static,
    {
        let mut subs = self.subscriptions.lock();
        let fresh = self
            .core
            .lock()
            .messages
            .insert(msg_name.to_string(), Box::new(invoker))
            .is_none();
        if fresh && self.is_running() {
            subs.push(self.subscribe_message(msg_name));
        }
    }

    /// Run `invoker` whenever a timer named `timer_name` fires.
    pub fn bind_timer<F>(&self, timer_name: &str, invoker: F)
    where
        F: FnMut(&mut ModuleContext<'_>, &FiredTimer) -> Result<()> + Send + 'static,
    {
        self.core
            .lock()
            .timers
            .insert(timer_name.to_string(), Box::new(invoker));
    }

    /// Schedule a timer; see [`TimerManager::add_timer`].
    pub fn add_timer(&self, name: &str, delay_ms: u64, period_ms: u64, repeat: u64) -> TimerId {
        self.core
            .lock()
            .timer_mgr
            .add_timer(name, delay_ms, period_ms, repeat, "")
    }

    pub fn remove_timer(&self, id: TimerId) -> bool {
        self.core.lock().timer_mgr.remove_timer(id)
    }

    /// Queue `mail` directly, bypassing the bus.
    pub fn post(&self, mail: Mail) -> Result<()> {
        self.mailbox.push(mail)
    }

    /// Subscribe the bound names and spawn the worker. Idempotent.
    pub fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }
        let mut subs = self.subscriptions.lock();
        self.running.store(true, Ordering::Release);

        let mailbox = Arc::clone(&self.mailbox);
        let core = Arc::clone(&self.core);
        let running = Arc::clone(&self.running);
        let bus = Arc::clone(&self.bus);
        let name = self.name.clone();
        let spawned = thread::Builder::new()
            .name(format!("dbc-mod-{}", self.name))
            .spawn(move || run_worker(&name, &bus, &mailbox, &core, &running));
        let join = match spawned {
            Ok(join) => join,
            Err(e) => {
                self.running.store(false, Ordering::Release);
                return Err(e.into());
            }
        };
        *worker = Some(join);

        let names: Vec<String> = self.core.lock().messages.keys().cloned().collect();
        for msg_name in &names {
            subs.push(self.subscribe_message(msg_name));
        }
        let mailbox = Arc::clone(&self.mailbox);
        let module = self.name.clone();
        subs.push(
            self.bus
                .subscribe::<TimeTick, _>(TIME_TICK_NOTIFICATION, move |tick| {
                    if let Err(e) = mailbox.push(Mail::Tick(tick.0)) {
                        log::warn!("[MODULE] {} dropped tick {}: {}", module, tick.0, e);
                    }
                }),
        );
        log::info!("[MODULE] {} started ({} message bindings)", self.name, names.len());
        Ok(())
    }

    /// Unsubscribe, stop and join the worker. Idempotent.
    ///
    /// Mail still queued when the worker exits is discarded.
    pub fn stop(&self) {
        let Some(join) = self.worker.lock().take() else {
            return;
        };
        for id in self.subscriptions.lock().drain(..) {
            self.bus.unsubscribe_id(id);
        }
        self.running.store(false, Ordering::Release);
        self.mailbox.ready.notify_all();
        if join.join().is_err() {
            log::error!("[MODULE] {} worker panicked", self.name);
        }
        let dropped = {
            let mut queue = self.mailbox.queue.lock();
            let n = queue.len();
            queue.clear();
            n
        };
        log::info!("[MODULE] {} stopped ({} queued mails dropped)", self.name, dropped);
    }

    fn subscribe_message(&self, msg_name: &str) -> SubscriptionId {
        let mailbox = Arc::clone(&self.mailbox);
        let module = self.name.clone();
        self.bus
            .subscribe::<Arc<Message>, _>(msg_name, move |msg: &Arc<Message>| {
                if let Err(e) = mailbox.push(Mail::Message(Arc::clone(msg))) {
                    log::warn!("[MODULE] {} dropped {}: {}", module, msg.name(), e);
                }
            })
    }
}

fn run_worker(
    name: &str,
    bus: &Arc<TopicBus>,
    mailbox: &Mailbox,
    core: &Mutex<Core>,
    running: &AtomicBool,
) {
    while running.load(Ordering::Acquire) {
        let Some(mail) = mailbox.pop(MAILBOX_WAIT) else {
            continue;
        };
        let mut guard = core.lock();
        let Core {
            messages,
            timers,
            timer_mgr,
        } = &mut *guard;

        match mail {
            Mail::Message(msg) => {
                let Some(invoker) = messages.get_mut(msg.name()) else {
                    log::trace!("[MODULE] {} has no invoker for {}", name, msg.name());
                    continue;
                };
                let mut ctx = ModuleContext {
                    name,
                    bus,
                    timers: timer_mgr,
                };
                if let Err(e) = invoker(&mut ctx, &msg) {
                    log::warn!("[MODULE] {} failed on {} from {}: {}", name, msg.name(), msg.src_sid, e);
                }
            }
            Mail::Tick(tick) => {
                for fired in timer_mgr.process(tick) {
                    let Some(invoker) = timers.get_mut(&fired.name) else {
                        log::debug!("[MODULE] {} timer {} has no invoker", name, fired.name);
                        continue;
                    };
                    let mut ctx = ModuleContext {
                        name,
                        bus,
                        timers: timer_mgr,
                    };
                    if let Err(e) = invoker(&mut ctx, &fired) {
                        log::warn!("[MODULE] {} timer {} failed: {}", name, fired.name, e);
                    }
                }
            }
        }
    }
}

impl Drop for ServiceModule {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ServiceModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceModule")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .field("mailbox", &self.mailbox_len())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
