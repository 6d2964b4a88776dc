//! Typed publish/subscribe over one duplex channel to the target.
//!
//! A bridge belongs to exactly one [`Generation`]. Inbound envelopes are
//! dispatched to handlers in registration order; outbound sends go through
//! an unbounded queue that the transport drains in order.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};
use vdt_core::bridge_ipc::{Envelope, EventName};

use crate::SessionError;

/// One connect-to-reload lifetime. Zero is never issued.
pub type Generation = u64;

pub type Handler<C> = Box<dyn FnMut(&mut C, &Value) -> Result<(), SessionError> + Send>;

struct Listener<C> {
    handler: Handler<C>,
    once: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchReport {
    pub handled: usize,
    pub faults: usize,
}

/// Cloneable send half handed to handlers.
#[derive(Debug, Clone)]
pub struct BridgeSender {
    generation: Generation,
    outbound: mpsc::UnboundedSender<Envelope>,
}

impl BridgeSender {
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Fire-and-forget. A closed transport drops the envelope silently.
    pub fn send(&self, event: EventName, payload: Value) {
        if self.outbound.send(Envelope::new(event, payload)).is_err() {
            debug!(
                event = "bridge_send_dropped",
                generation = self.generation,
                name = event.as_str()
            );
        }
    }
}

pub struct Bridge<C> {
    generation: Generation,
    listeners: HashMap<EventName, Vec<Listener<C>>>,
    sender: BridgeSender,
    live: bool,
}

impl<C> Bridge<C> {
    pub fn new(generation: Generation, outbound: mpsc::UnboundedSender<Envelope>) -> Self {
        Self {
            generation,
            listeners: HashMap::new(),
            sender: BridgeSender {
                generation,
                outbound,
            },
            live: true,
        }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    pub fn sender(&self) -> BridgeSender {
        self.sender.clone()
    }

    pub fn on(&mut self, event: EventName, handler: Handler<C>) {
        self.register(event, handler, false);
    }

    pub fn once(&mut self, event: EventName, handler: Handler<C>) {
        self.register(event, handler, true);
    }

    pub fn send(&self, event: EventName, payload: Value) {
        if !self.live {
            trace!(
                event = "bridge_send_after_teardown",
                generation = self.generation,
                name = event.as_str()
            );
            return;
        }
        self.sender.send(event, payload);
    }

    pub fn listener_count(&self, event: EventName) -> usize {
        self.listeners.get(&event).map(Vec::len).unwrap_or(0)
    }

    pub fn total_listeners(&self) -> usize {
        self.listeners.values().map(Vec::len).sum()
    }

    /// Drops every registration and marks the bridge dead; later deliveries
    /// are ignored even if the channel keeps emitting.
    pub fn remove_all_listeners(&mut self) {
        let removed = self.total_listeners();
        self.listeners.clear();
        self.live = false;
        debug!(
            event = "bridge_listeners_cleared",
            generation = self.generation,
            removed
        );
    }

    /// Runs every handler registered for the envelope's event. A failing
    /// handler is logged and does not stop the others.
    pub fn emit(&mut self, envelope: &Envelope, ctx: &mut C) -> DispatchReport {
        let mut report = DispatchReport::default();
        if !self.live {
            trace!(
                event = "bridge_delivery_after_teardown",
                generation = self.generation,
                name = %envelope.event
            );
            return report;
        }
        let Some(name) = envelope.name() else {
            debug!(
                event = "bridge_unknown_event",
                generation = self.generation,
                name = %envelope.event
            );
            return report;
        };
        if name.is_outbound_only() {
            debug!(event = "bridge_echoed_command", name = name.as_str());
            return report;
        }
        let Some(listeners) = self.listeners.remove(&name) else {
            trace!(event = "bridge_unhandled_event", name = name.as_str());
            return report;
        };

        let mut retained = Vec::with_capacity(listeners.len());
        for mut listener in listeners {
            report.handled += 1;
            if let Err(err) = (listener.handler)(ctx, &envelope.payload) {
                report.faults += 1;
                warn!(
                    event = "bridge_handler_error",
                    generation = self.generation,
                    name = name.as_str(),
                    error = %err
                );
            }
            if !listener.once {
                retained.push(listener);
            }
        }
        if !retained.is_empty() {
            self.listeners.insert(name, retained);
        }
        report
    }

    fn register(&mut self, event: EventName, handler: Handler<C>, once: bool) {
        self.listeners
            .entry(event)
            .or_default()
            .push(Listener { handler, once });
    }
}
