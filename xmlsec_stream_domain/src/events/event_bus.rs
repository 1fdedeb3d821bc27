// /////////////////////////////////////////////////////////////////////////////
// Streaming XML Security
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Security Event Bus
//!
//! Synchronous fan-out of security events to registered listeners, in
//! registration order. The bus is a per-document object: documents
//! processed concurrently get independent buses, and the only process-wide
//! state in the engine remains the algorithm registry.
//!
//! ## Dispatch Discipline
//!
//! Listeners must not mutate the registration list during a dispatch.
//! Registration and deregistration requested while a dispatch is running
//! are deferred and applied after the outermost dispatch returns, so a
//! listener adding another listener never changes the current fan-out.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use uuid::Uuid;

use super::SecurityEvent;

/// Receives every security event of one document, synchronously.
pub trait SecurityEventListener {
    fn on_security_event(&self, event: &SecurityEvent);
}

/// Handle for deregistering a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(Uuid);

enum DeferredOp {
    Register(ListenerId, Rc<dyn SecurityEventListener>),
    Deregister(ListenerId),
}

/// Per-document synchronous event bus.
#[derive(Default)]
pub struct SecurityEventBus {
    listeners: RefCell<Vec<(ListenerId, Rc<dyn SecurityEventListener>)>>,
    dispatch_depth: Cell<u32>,
    deferred: RefCell<Vec<DeferredOp>>,
}

impl SecurityEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener; it sees every event dispatched after the
    /// current dispatch (if any) completes.
    pub fn register(&self, listener: Rc<dyn SecurityEventListener>) -> ListenerId {
        let id = ListenerId(Uuid::new_v4());
        if self.dispatch_depth.get() > 0 {
            self.deferred.borrow_mut().push(DeferredOp::Register(id, listener));
        } else {
            self.listeners.borrow_mut().push((id, listener));
        }
        id
    }

    /// Deregisters a listener. During a dispatch the removal is deferred.
    pub fn deregister(&self, id: ListenerId) {
        if self.dispatch_depth.get() > 0 {
            self.deferred.borrow_mut().push(DeferredOp::Deregister(id));
        } else {
            self.listeners.borrow_mut().retain(|(lid, _)| *lid != id);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }

    /// Dispatches one event to all listeners in registration order.
    pub fn dispatch(&self, event: &SecurityEvent) {
        // Snapshot so listener callbacks never observe a borrowed list.
        let snapshot: Vec<Rc<dyn SecurityEventListener>> = self
            .listeners
            .borrow()
            .iter()
            .map(|(_, l)| Rc::clone(l))
            .collect();

        self.dispatch_depth.set(self.dispatch_depth.get() + 1);
        for listener in snapshot {
            listener.on_security_event(event);
        }
        self.dispatch_depth.set(self.dispatch_depth.get() - 1);

        if self.dispatch_depth.get() == 0 {
            let ops = std::mem::take(&mut *self.deferred.borrow_mut());
            let mut listeners = self.listeners.borrow_mut();
            for op in ops {
                match op {
                    DeferredOp::Register(id, l) => listeners.push((id, l)),
                    DeferredOp::Deregister(id) => listeners.retain(|(lid, _)| *lid != id),
                }
            }
        }
    }
}
