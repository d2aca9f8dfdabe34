//! ---
//! sarge_section: "01-core-lifecycle"
//! sarge_subsection: "module"
//! sarge_type: "source"
//! sarge_scope: "code"
//! sarge_description: "Synchronous ordered signal bus."
//! sarge_version: "v0.0.0-prealpha"
//! sarge_owner: "tbd"
//! ---
//! Lifecycle signals and the bus plugins subscribe to.
//!
//! Dispatch runs on the publisher's thread, strictly in subscription order,
//! and stops at the first failing handler.
use std::collections::HashMap;

use sarge_config::DeclaredConfig;
use sarge_logging::{sarge_debug, sarge_error, LogContext};
use strum::{AsRefStr, Display};

use crate::appcfg::AppCfg;
use crate::error::{Result, SargeError};
use crate::layout::{HomeLayout, InstancePaths};

/// Named lifecycle points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum Signal {
    /// Home is being initialised.
    Initializing,
    /// Plugins fill the context and may rewrite the working config.
    Configuring,
    /// Context is complete; last chance to act before the supervisor call.
    WillStart,
    /// The supervisor confirmed the stop.
    HasStopped,
    /// Folders are about to be removed.
    WillBeDestroyed,
}

/// Read-only view of an instance.
#[derive(Debug, Clone, Copy)]
pub struct InstanceView<'a> {
    pub id: &'a str,
    pub config: &'a DeclaredConfig,
    pub paths: &'a InstancePaths,
    pub layout: &'a HomeLayout,
}

/// What `configuring` handlers receive.
#[derive(Debug)]
pub struct LaunchContext<'a> {
    pub id: &'a str,
    pub paths: &'a InstancePaths,
    pub layout: &'a HomeLayout,
    /// Working copy of the declared config; discarded after the start.
    pub config: &'a mut DeclaredConfig,
    pub appcfg: &'a mut AppCfg,
}

/// Payload of one dispatch.
#[derive(Debug)]
pub enum Event<'a> {
    Initializing {
        layout: &'a HomeLayout,
    },
    Configuring(LaunchContext<'a>),
    WillStart {
        instance: InstanceView<'a>,
        appcfg: &'a mut AppCfg,
    },
    HasStopped(InstanceView<'a>),
    WillBeDestroyed(InstanceView<'a>),
}

impl Event<'_> {
    pub fn signal(&self) -> Signal {
        match self {
            Event::Initializing { .. } => Signal::Initializing,
            Event::Configuring(_) => Signal::Configuring,
            Event::WillStart { .. } => Signal::WillStart,
            Event::HasStopped(_) => Signal::HasStopped,
            Event::WillBeDestroyed(_) => Signal::WillBeDestroyed,
        }
    }

    pub fn instance_id(&self) -> Option<&str> {
        match self {
            Event::Initializing { .. } => None,
            Event::Configuring(ctx) => Some(ctx.id),
            Event::WillStart { instance, .. }
            | Event::HasStopped(instance)
            | Event::WillBeDestroyed(instance) => Some(instance.id),
        }
    }
}

pub type Handler = Box<dyn Fn(&mut Event<'_>) -> anyhow::Result<()> + Send + Sync>;

struct Subscriber {
    name: String,
    handler: Handler,
}

/// Signal → ordered subscribers. Built once at registry boot.
#[derive(Default)]
pub struct SignalBus {
    subscribers: HashMap<Signal, Vec<Subscriber>>,
}

impl SignalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `handler` to the subscribers of `signal`.
    pub fn subscribe<F>(&mut self, signal: Signal, name: impl Into<String>, handler: F)
    where
        F: Fn(&mut Event<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribers.entry(signal).or_default().push(Subscriber {
            name: name.into(),
            handler: Box::new(handler),
        });
    }

    /// Subscriber names for `signal`, in dispatch order.
    pub fn subscribers(&self, signal: Signal) -> Vec<&str> {
        self.subscribers
            .get(&signal)
            .map(|subs| subs.iter().map(|sub| sub.name.as_str()).collect())
            .unwrap_or_default()
    }

    /// Run every handler for the event's signal against the same payload.
    pub fn publish(&self, event: &mut Event<'_>) -> Result<()> {
        let signal = event.signal();
        let Some(subscribers) = self.subscribers.get(&signal) else {
            return Ok(());
        };
        let instance = event.instance_id().map(str::to_owned);
        let mut ctx = LogContext::new().with_signal(signal.as_ref());
        if let Some(id) = instance.as_deref() {
            ctx = ctx.with_instance(id);
        }
        for subscriber in subscribers {
            sarge_debug!(context = ctx, "dispatching to {}", subscriber.name);
            if let Err(source) = (subscriber.handler)(&mut *event) {
                sarge_error!(context = ctx, "handler {} failed: {:#}", subscriber.name, source);
                return Err(SargeError::Plugin {
                    signal,
                    handler: subscriber.name.clone(),
                    source,
                });
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for SignalBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: HashMap<_, _> = self
            .subscribers
            .iter()
            .map(|(signal, subs)| (signal.as_ref(), subs.len()))
            .collect();
        f.debug_struct("SignalBus").field("subscribers", &counts).finish()
    }
}
