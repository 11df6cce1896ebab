//! Adapters fed from another thread
//!
//! Acquisition that has to block (reading a device node, talking to a
//! nesting host) runs on its own thread and sends events through a calloop
//! channel. The receiving [`AdapterQueue`] is registered with the event loop,
//! so a send wakes the loop and the events land in the adapter's inbox for
//! the next poll. This is the only place events cross threads.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use calloop::channel::{self, Channel, Event, Sender};
use calloop::{LoopHandle, RegistrationToken};
use log::{debug, trace};

use super::{AdapterKind, BackendAdapter, BackendEvent, Committed, LocalHandle};
use crate::renderer::{ComposedFrame, RenderError};

/// Presents frames for a [`QueuedAdapter`]
pub type Presenter = Box<dyn FnMut(LocalHandle, &ComposedFrame) -> Result<Committed, RenderError>>;

type Inbox = Rc<RefCell<VecDeque<BackendEvent>>>;

/// An adapter whose events arrive through a calloop channel
pub struct QueuedAdapter {
    kind: AdapterKind,
    name: String,
    inbox: Inbox,
    presenter: Presenter,
}

/// Loop side of a [`QueuedAdapter`]'s channel
///
/// Nothing reaches the adapter until this is registered with an event loop.
pub struct AdapterQueue {
    name: String,
    channel: Channel<BackendEvent>,
    inbox: Weak<RefCell<VecDeque<BackendEvent>>>,
}

impl AdapterQueue {
    /// Insert the channel into an event loop
    pub fn register<D>(
        self,
        handle: &LoopHandle<'static, D>,
    ) -> Result<RegistrationToken, calloop::Error> {
        let Self {
            name,
            channel,
            inbox,
        } = self;
        handle
            .insert_source(channel, move |event, _, _| match event {
                Event::Msg(event) => match inbox.upgrade() {
                    Some(inbox) => inbox.borrow_mut().push_back(event),
                    None => trace!("{}: adapter gone, dropping {:?}", name, event),
                },
                Event::Closed => debug!("{}: acquisition thread hung up", name),
            })
            .map_err(|e| e.error)
    }
}

impl std::fmt::Debug for AdapterQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterQueue")
            .field("name", &self.name)
            .field("adapter_alive", &(self.inbox.strong_count() > 0))
            .finish()
    }
}

impl QueuedAdapter {
    /// Create an adapter, the sender its acquisition thread uses, and the
    /// queue to register with the event loop
    pub fn new(
        kind: AdapterKind,
        name: impl Into<String>,
        presenter: Presenter,
    ) -> (Self, Sender<BackendEvent>, AdapterQueue) {
        let name = name.into();
        let (sender, channel) = channel::channel();
        let inbox = Inbox::default();
        let queue = AdapterQueue {
            name: name.clone(),
            channel,
            inbox: Rc::downgrade(&inbox),
        };
        let adapter = Self {
            kind,
            name,
            inbox,
            presenter,
        };
        (adapter, sender, queue)
    }
}

impl BackendAdapter for QueuedAdapter {
    fn kind(&self) -> AdapterKind {
        self.kind
    }

    fn name(&self) -> &str {
        &self.name
    }

    /// Whatever the loop has delivered so far; never waits
    fn poll(&mut self) -> Box<dyn Iterator<Item = BackendEvent> + '_> {
        let events: Vec<BackendEvent> = self.inbox.borrow_mut().drain(..).collect();
        Box::new(events.into_iter())
    }

    fn submit_frame(
        &mut self,
        output: LocalHandle,
        frame: &ComposedFrame,
    ) -> Result<Committed, RenderError> {
        trace!("{}: presenting frame {} on {}", self.name, frame.seq, output);
        (self.presenter)(output, frame)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use calloop::EventLoop;

    use super::*;
    use crate::compositor::{DeviceCapabilities, DeviceInfo};

    fn discard() -> Presenter {
        Box::new(|_: LocalHandle, frame: &ComposedFrame| {
            Ok(Committed {
                seq: frame.seq,
                time: 0,
            })
        })
    }

    #[test]
    fn test_events_from_another_thread() {
        let mut event_loop = EventLoop::<()>::try_new().unwrap();
        let (mut adapter, sender, queue) =
            QueuedAdapter::new(AdapterKind::Libinput, "libinput", discard());
        queue.register(&event_loop.handle()).unwrap();

        let worker = thread::spawn(move || {
            sender
                .send(BackendEvent::DeviceAdded {
                    handle: 7,
                    info: DeviceInfo::new("touchpad", DeviceCapabilities::POINTER),
                })
                .unwrap();
            sender.send(BackendEvent::Heartbeat).unwrap();
        });
        worker.join().unwrap();

        // Nothing arrives before the loop has run
        assert_eq!(adapter.poll().count(), 0);
        event_loop
            .dispatch(Some(Duration::from_secs(1)), &mut ())
            .unwrap();

        let events: Vec<_> = adapter.poll().collect();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], BackendEvent::DeviceAdded { handle: 7, .. }));
        assert_eq!(events[1], BackendEvent::Heartbeat);
        assert_eq!(adapter.poll().count(), 0);
    }

    #[test]
    fn test_events_after_adapter_dropped_are_discarded() {
        let mut event_loop = EventLoop::<()>::try_new().unwrap();
        let (adapter, sender, queue) =
            QueuedAdapter::new(AdapterKind::NestedWayland, "nested", discard());
        queue.register(&event_loop.handle()).unwrap();
        drop(adapter);

        sender.send(BackendEvent::Heartbeat).unwrap();
        event_loop
            .dispatch(Some(Duration::ZERO), &mut ())
            .unwrap();
    }

    #[test]
    fn test_send_after_queue_dropped_fails() {
        let (_adapter, sender, queue) = QueuedAdapter::new(AdapterKind::Drm, "card0", discard());
        drop(queue);
        assert!(sender.send(BackendEvent::Heartbeat).is_err());
    }
}
