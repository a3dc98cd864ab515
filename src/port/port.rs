//! The owner-thread endpoint handle.
//!
//! A [`Port`] exposes the user-facing operations on one side of a channel
//! and drives delivery of incoming messages. Ports are cheap to clone and
//! deliberately `!Send`: an endpoint belongs to exactly one thread, and
//! the only way to move one is to [`detach`](Port::detach) its state and
//! [`adopt`](Port::adopt) it into a fresh port on the target thread.
//!
//! Delivery is cooperative. The embedder's event loop reacts to the
//! port's [`AsyncHandle`] being signalled by calling
//! [`process_messages`](Port::process_messages) on the owner thread; the
//! loop drains the queue one message at a time and never holds any lock
//! across user code.

use std::cell::RefCell;
use std::mem;
use std::rc::Rc;
use std::sync::Arc;

use crate::env::{AsyncHandle, Environment};
use crate::error::{Error, ErrorKind, Result};
use crate::message::Message;
use crate::port::channel::ConstructKind;
use crate::port::data::PortData;
use crate::value::Value;

type OnMessage = Box<dyn FnMut(Option<Value>)>;

struct PortState {
    /// `None` after close or detach.
    data: Option<Arc<PortData>>,
    /// `None` after close.
    handle: Option<Arc<dyn AsyncHandle>>,
    env: Arc<dyn Environment>,
    on_message: Option<OnMessage>,
}

impl Drop for PortState {
    fn drop(&mut self) {
        // The shared state must never be left pointing at a dead owner.
        if let Some(data) = self.data.take() {
            data.clear_owner();
        }
    }
}

/// Owner-thread handle to one side of an entangled pair.
#[derive(Clone)]
pub struct Port {
    state: Rc<RefCell<PortState>>,
}

impl Port {
    /// Creates a fresh, unentangled port on the current thread.
    ///
    /// `handle` is the wake-up capability bound to this thread's event
    /// loop; it stays bound for as long as the port owns its state.
    #[must_use]
    pub fn new(env: Arc<dyn Environment>, handle: Arc<dyn AsyncHandle>) -> Self {
        let data = PortData::new();
        data.attach_owner(Arc::clone(&handle));
        Self {
            state: Rc::new(RefCell::new(PortState {
                data: Some(data),
                handle: Some(handle),
                env,
                on_message: None,
            })),
        }
    }

    /// Creates a port and runs `init` with it once, before returning.
    pub fn with_init(
        env: Arc<dyn Environment>,
        handle: Arc<dyn AsyncHandle>,
        init: impl FnOnce(&Self),
    ) -> Self {
        let port = Self::new(env, handle);
        init(&port);
        port
    }

    /// Binding-level constructor: refuses plain calls.
    pub fn construct(
        kind: ConstructKind,
        env: Arc<dyn Environment>,
        handle: Arc<dyn AsyncHandle>,
    ) -> Result<Self> {
        match kind {
            ConstructKind::Construct => Ok(Self::new(env, handle)),
            ConstructKind::Call => Err(Error::new(ErrorKind::ConstructCallRequired)
                .with_context("port constructor requires construct invocation")),
        }
    }

    /// Attaches pre-existing state to a fresh port on the current thread.
    ///
    /// If the adopted state has pending messages, the new owner's handle
    /// is signalled so delivery begins on this thread.
    #[must_use]
    pub fn adopt(
        env: Arc<dyn Environment>,
        handle: Arc<dyn AsyncHandle>,
        data: Arc<PortData>,
    ) -> Self {
        data.attach_owner(Arc::clone(&handle));
        tracing::debug!("adopted detached port state");
        Self {
            state: Rc::new(RefCell::new(PortState {
                data: Some(data),
                handle: Some(handle),
                env,
                on_message: None,
            })),
        }
    }

    fn require_data(&self) -> Result<Arc<PortData>> {
        self.state
            .borrow()
            .data
            .clone()
            .ok_or_else(|| Error::new(ErrorKind::ClosedPort).with_context("port is closed"))
    }

    fn require_handle(&self) -> Result<Arc<dyn AsyncHandle>> {
        self.state
            .borrow()
            .handle
            .clone()
            .ok_or_else(|| Error::new(ErrorKind::ClosedPort).with_context("port is closed"))
    }

    /// Serializes `value` and posts it to the entangled sibling.
    ///
    /// Serialization and transfer-list errors surface synchronously; a
    /// missing sibling swallows the message without error. Buffers named
    /// in `transfer_list` arrive detached on this side once the call
    /// returns successfully.
    pub fn post_message(&self, value: &Value, transfer_list: &[Value]) -> Result<()> {
        let data = self.require_data()?;
        let env = Arc::clone(&self.state.borrow().env);

        let mut message = Message::default();
        message.serialize(env.as_ref(), value, transfer_list)?;
        data.send_to_sibling(message);
        Ok(())
    }

    /// Binding-level post: `args[0]` is the value, `args[1]` an optional
    /// transfer list.
    ///
    /// Fails with [`ErrorKind::ClosedPort`] on a closed port and
    /// [`ErrorKind::MissingArgs`] when no value is supplied. A second
    /// argument that is not a list is ignored, matching the loose binding
    /// surface.
    pub fn post_message_args(&self, args: &[Value]) -> Result<()> {
        if self.state.borrow().data.is_none() {
            return Err(Error::new(ErrorKind::ClosedPort).with_context("port is closed"));
        }
        let Some(value) = args.first() else {
            return Err(Error::new(ErrorKind::MissingArgs)
                .with_context("not enough arguments to post_message"));
        };
        let transfer_list: &[Value] = match args.get(1) {
            Some(Value::List(items)) => items,
            _ => &[],
        };
        self.post_message(value, transfer_list)
    }

    /// Enables delivery of queued and future messages.
    pub fn start(&self) -> Result<()> {
        self.require_data()?.start();
        Ok(())
    }

    /// Disables delivery. Messages keep queueing; a wake-up already in
    /// flight will observe the flag and yield without draining.
    pub fn stop(&self) -> Result<()> {
        self.require_data()?.stop();
        Ok(())
    }

    /// Closes the port: releases the wake handle, clears the owner
    /// back-reference, and breaks the entanglement. Idempotent.
    pub fn close(&self) {
        let (data, handle) = {
            let mut state = self.state.borrow_mut();
            (state.data.take(), state.handle.take())
        };
        let Some(data) = data else {
            return;
        };
        data.clear_owner();
        data.disentangle();
        drop(handle);
        tracing::debug!("port closed");
    }

    /// Yields ownership of the shared state so it can move to another
    /// thread. This port is unusable afterwards.
    pub fn detach(&self) -> Result<Arc<PortData>> {
        let mut state = self.state.borrow_mut();
        let data = state
            .data
            .take()
            .ok_or_else(|| Error::new(ErrorKind::ClosedPort).with_context("port is closed"))?;
        data.clear_owner();
        tracing::debug!("port detached");
        Ok(data)
    }

    /// Installs the delivery callback. Each delivered message invokes it
    /// once; a message whose decode failed passes `None`.
    pub fn set_on_message(&self, callback: impl FnMut(Option<Value>) + 'static) {
        self.state.borrow_mut().on_message = Some(Box::new(callback));
    }

    /// Removes the delivery callback.
    pub fn clear_on_message(&self) {
        self.state.borrow_mut().on_message = None;
    }

    /// Returns true iff the paired endpoint is gone.
    pub fn is_sibling_closed(&self) -> Result<bool> {
        Ok(self.require_data()?.is_sibling_closed())
    }

    /// Makes the wake handle keep the owner loop alive.
    pub fn ref_(&self) -> Result<()> {
        self.require_handle()?.ref_();
        Ok(())
    }

    /// Stops the wake handle from keeping the owner loop alive.
    pub fn unref(&self) -> Result<()> {
        self.require_handle()?.unref();
        Ok(())
    }

    /// Whether the wake handle currently keeps the owner loop alive.
    pub fn has_ref(&self) -> Result<bool> {
        Ok(self.require_handle()?.has_ref())
    }

    /// Approximate memory retained by this port, including queued
    /// messages.
    #[must_use]
    pub fn self_size(&self) -> usize {
        let state = self.state.borrow();
        let queued = state
            .data
            .as_ref()
            .map_or(0, |d| mem::size_of::<PortData>() + d.queued_bytes());
        mem::size_of::<PortState>() + queued
    }

    fn trigger_async(&self) {
        if let Some(handle) = &self.state.borrow().handle {
            handle.signal();
        }
    }

    /// Drives delivery on the owner thread.
    ///
    /// Invoked by the event loop when the port's handle was signalled.
    /// Drains the queue while delivery is enabled, decoding each message
    /// in the owner's domain and invoking the callback with the value. No
    /// lock is held across user code, and ownership of the state is
    /// re-checked every iteration because a callback may close or detach
    /// the port.
    pub fn process_messages(&self) {
        loop {
            let (data, env) = {
                let state = self.state.borrow();
                match &state.data {
                    Some(data) => (Arc::clone(data), Arc::clone(&state.env)),
                    None => return,
                }
            };

            let Some(mut message) = data.dequeue() else {
                break;
            };

            if !env.can_invoke_user_code() {
                // Shutdown in progress: nothing to do but drain.
                tracing::trace!("discarding message during shutdown drain");
                continue;
            }

            let value = match message.deserialize(env.as_ref()) {
                Ok(value) => Some(value),
                Err(err) => {
                    tracing::debug!(error = %err, "failed to deserialize incoming message");
                    None
                }
            };
            let decode_failed = value.is_none();

            let callback = self.state.borrow_mut().on_message.take();
            match callback {
                Some(mut callback) => {
                    callback(value);
                    let mut state = self.state.borrow_mut();
                    if state.on_message.is_none() {
                        state.on_message = Some(callback);
                    }
                }
                None => {
                    // Nobody to deliver to; the popped message is gone.
                    // Try again later in case a callback gets installed.
                    self.trigger_async();
                    return;
                }
            }

            if decode_failed {
                // The failed message was already dropped; resume the rest
                // of the queue on a later turn.
                self.trigger_async();
                return;
            }
        }

        let should_close = self.state.borrow().data.as_ref().is_some_and(|data| {
            data.is_sibling_closed() && !data.has_queued()
        });
        if should_close {
            tracing::debug!("sibling closed and queue drained; closing port");
            self.close();
        }
    }

    /// Links two fresh ports. Used by the channel factory.
    pub(crate) fn entangle(a: &Self, b: &Self) {
        let da = a.state.borrow().data.clone().expect("fresh port has data");
        let db = b.state.borrow().data.clone().expect("fresh port has data");
        PortData::entangle(&da, &db);
    }
}

impl std::fmt::Debug for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("Port")
            .field("open", &state.data.is_some())
            .field("has_callback", &state.on_message.is_some())
            .finish_non_exhaustive()
    }
}
