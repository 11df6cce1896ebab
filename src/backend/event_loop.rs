//! Event loop integration
//!
//! Drives a [`Compositor`] from calloop. Each turn sleeps until the next
//! frame or heartbeat deadline, or until a queued adapter's channel has
//! events, then runs one compositor dispatch.

use std::time::{Duration, Instant};

use calloop::{EventLoop as CalLoop, LoopHandle, RegistrationToken};
use log::{debug, error, warn};

use super::AdapterQueue;
use crate::compositor::Compositor;

/// Waymux event loop wrapper
pub struct EventLoop {
    /// Calloop event loop
    event_loop: CalLoop<'static, Compositor>,
}

impl EventLoop {
    /// Create a new event loop
    pub fn new() -> anyhow::Result<Self> {
        let event_loop = CalLoop::try_new()?;
        Ok(Self { event_loop })
    }

    /// Get a handle to register event sources
    pub fn handle(&self) -> LoopHandle<'static, Compositor> {
        self.event_loop.handle()
    }

    /// Deliver a queued adapter's channel through this loop
    pub fn insert_queue(&self, queue: AdapterQueue) -> anyhow::Result<RegistrationToken> {
        Ok(queue.register(&self.event_loop.handle())?)
    }

    /// Wait for sources for at most `timeout`
    pub fn dispatch(
        &mut self,
        timeout: Option<Duration>,
        compositor: &mut Compositor,
    ) -> anyhow::Result<()> {
        self.event_loop.dispatch(timeout, compositor)?;
        Ok(())
    }

    /// Run until the compositor requests shutdown
    pub fn run(&mut self, compositor: &mut Compositor) -> anyhow::Result<()> {
        debug!("Starting event loop");

        while compositor.is_running() {
            let timeout = compositor
                .next_wakeup()
                .map(|at| at.saturating_duration_since(Instant::now()));
            if let Err(e) = self.dispatch(timeout, compositor) {
                error!("Event loop error: {}", e);
                return Err(e);
            }

            let report = match compositor.dispatch(Instant::now()) {
                Ok(report) => report,
                Err(e) => {
                    error!("Fatal compositor error: {}", e);
                    return Err(e.into());
                }
            };
            for err in &report.errors {
                warn!("{}", err);
            }
        }

        debug!("Event loop stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{AdapterKind, BackendEvent, Committed, LocalHandle, QueuedAdapter};
    use crate::compositor::{OutputInfo, OutputMode};
    use crate::config::Config;
    use crate::renderer::ComposedFrame;
    use calloop::timer::{TimeoutAction, Timer};

    #[test]
    fn test_event_loop_new() {
        let event_loop = EventLoop::new();
        assert!(event_loop.is_ok());
    }

    #[test]
    fn test_event_loop_dispatch() {
        let mut event_loop = EventLoop::new().unwrap();
        let mut compositor = Compositor::new(Config::default());
        // Dispatch with zero timeout should return immediately
        let result = event_loop.dispatch(Some(Duration::ZERO), &mut compositor);
        assert!(result.is_ok());
    }

    #[test]
    fn test_run_until_shutdown() {
        let mut event_loop = EventLoop::new().unwrap();
        let mut compositor = Compositor::new(Config::default());
        event_loop
            .handle()
            .insert_source(
                Timer::from_duration(Duration::from_millis(5)),
                |_, _, compositor| {
                    compositor.request_shutdown();
                    TimeoutAction::Drop
                },
            )
            .unwrap();

        event_loop.run(&mut compositor).unwrap();
        assert!(!compositor.is_running());
    }

    #[test]
    fn test_queued_adapter_wakes_loop() {
        let mut event_loop = EventLoop::new().unwrap();
        let mut compositor = Compositor::new(Config::default());
        let (adapter, sender, queue) = QueuedAdapter::new(
            AdapterKind::NestedWayland,
            "nested",
            Box::new(|_: LocalHandle, _: &ComposedFrame| {
                Ok(Committed { seq: 1, time: 0 })
            }),
        );
        event_loop.insert_queue(queue).unwrap();
        compositor.attach_adapter(Box::new(adapter), Instant::now());

        let worker = std::thread::spawn(move || {
            sender
                .send(BackendEvent::OutputAdded {
                    handle: 1,
                    info: OutputInfo::new("WL-1", OutputMode::new(800, 600, 60_000)),
                })
                .unwrap();
        });
        worker.join().unwrap();

        let start = Instant::now();
        event_loop
            .dispatch(Some(Duration::from_secs(5)), &mut compositor)
            .unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));

        compositor.dispatch(Instant::now()).unwrap();
        assert_eq!(compositor.layout().len(), 1);
    }
}
