//! Frame scheduling
//!
//! Each output runs its own little state machine:
//!
//! ```text
//! Idle -> DamagePending -> Rendering -> Committing -> Idle
//!              ^                            |
//!              +------ transient error -----+
//! ```
//!
//! Damage arriving while an output is idle schedules a deadline on the
//! output's refresh grid, no sooner than the coalescing window. Damage
//! arriving before that deadline is merged into the same frame. All deadlines
//! live in one priority queue; rescheduling an output bumps its generation
//! and older queue entries are skipped when they surface.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};
use thiserror::Error;

use super::RenderError;
use crate::backend::Committed;
use crate::compositor::OutputId;
use crate::error::{ObjectKind, StaleReference};
use crate::utils::{Rectangle, Region};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    DamagePending,
    Rendering,
    Committing,
    /// Failed for good; frames are skipped until the output changes
    Degraded,
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Stale(#[from] StaleReference),
    #[error("output {output:?} cannot do that while {from:?}")]
    InvalidTransition { output: OutputId, from: FrameState },
}

/// Frame timing of one output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameTimer {
    pub last_commit: Option<Instant>,
    pub next_deadline: Option<Instant>,
}

/// A render pass the compositor should run now
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    pub output: OutputId,
    /// Per-output frame number
    pub seq: u64,
    /// Output-local damage accumulated since the last commit
    pub damage: Region,
}

/// What became of a submitted frame
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    Committed { seq: u64, repaired: Region },
    /// Damage restored, another attempt is scheduled
    Retrying { attempt: u32 },
    Degraded,
}

#[derive(Debug)]
struct OutputSlot {
    state: FrameState,
    timer: FrameTimer,
    interval: Duration,
    pending: Region,
    in_flight: Region,
    failures: u32,
    generation: u64,
    frame_seq: u64,
}

/// Drives frame timing for every output
#[derive(Debug)]
pub struct FrameScheduler {
    outputs: HashMap<OutputId, OutputSlot>,
    deadlines: BinaryHeap<Reverse<(Instant, OutputId, u64)>>,
    coalesce_window: Duration,
    retry_limit: u32,
}

impl FrameScheduler {
    pub fn new(coalesce_window: Duration, retry_limit: u32) -> Self {
        Self {
            outputs: HashMap::new(),
            deadlines: BinaryHeap::new(),
            coalesce_window,
            retry_limit,
        }
    }

    /// Start tracking an output
    pub fn add_output(&mut self, output: OutputId, interval: Duration) {
        debug!("Scheduler: tracking {:?} at {:?} per frame", output, interval);
        self.outputs.insert(
            output,
            OutputSlot {
                state: FrameState::Idle,
                timer: FrameTimer::default(),
                interval,
                pending: Region::new(),
                in_flight: Region::new(),
                failures: 0,
                generation: 0,
                frame_seq: 0,
            },
        );
    }

    /// Stop tracking an output; queued deadlines for it are dropped lazily
    pub fn remove_output(&mut self, output: OutputId) -> Result<(), StaleReference> {
        self.outputs
            .remove(&output)
            .map(|_| ())
            .ok_or(StaleReference::new(ObjectKind::Output, output.0))
    }

    /// New refresh interval after a mode change
    pub fn set_interval(&mut self, output: OutputId, interval: Duration) -> Result<(), StaleReference> {
        self.slot_mut(output)?.interval = interval;
        Ok(())
    }

    /// Accumulate output-local damage
    pub fn damage(&mut self, output: OutputId, rect: Rectangle, now: Instant) -> Result<(), SchedulerError> {
        let coalesce = self.coalesce_window;
        let slot = self.slot_mut(output)?;
        slot.pending.add(rect);
        trace!("Damage {:?} on {:?} while {:?}", rect, output, slot.state);

        if slot.state == FrameState::Idle {
            slot.state = FrameState::DamagePending;
            let deadline = aligned_deadline(slot, now, coalesce);
            self.schedule(output, deadline);
        }
        Ok(())
    }

    /// Outputs whose deadline has passed, moved to `Rendering`
    ///
    /// Yields at most one request per output.
    pub fn due(&mut self, now: Instant) -> Vec<RenderRequest> {
        let mut requests = Vec::new();
        while let Some(Reverse((deadline, output, generation))) = self.deadlines.peek().copied() {
            if deadline > now {
                break;
            }
            self.deadlines.pop();

            let Some(slot) = self.outputs.get_mut(&output) else {
                continue;
            };
            if slot.generation != generation || slot.state != FrameState::DamagePending {
                continue;
            }
            slot.state = FrameState::Rendering;
            slot.timer.next_deadline = None;
            slot.frame_seq += 1;
            let mut damage = std::mem::take(&mut slot.in_flight);
            damage.union(&slot.pending.take());
            slot.in_flight = damage.clone();
            requests.push(RenderRequest {
                output,
                seq: slot.frame_seq,
                damage,
            });
        }
        requests
    }

    /// The frame has been composed and handed to the adapter
    pub fn frame_composed(&mut self, output: OutputId) -> Result<(), SchedulerError> {
        let slot = self.slot_mut(output)?;
        if slot.state != FrameState::Rendering {
            return Err(SchedulerError::InvalidTransition {
                output,
                from: slot.state,
            });
        }
        slot.state = FrameState::Committing;
        Ok(())
    }

    /// Record the adapter's verdict on a frame
    ///
    /// Damage only counts as repaired after a full commit.
    pub fn frame_committed(
        &mut self,
        output: OutputId,
        result: Result<Committed, &RenderError>,
        now: Instant,
    ) -> Result<FrameOutcome, SchedulerError> {
        let coalesce = self.coalesce_window;
        let retry_limit = self.retry_limit;
        let slot = self.slot_mut(output)?;
        if slot.state != FrameState::Committing {
            return Err(SchedulerError::InvalidTransition {
                output,
                from: slot.state,
            });
        }

        let outcome = match result {
            Ok(_) => {
                slot.timer.last_commit = Some(now);
                slot.failures = 0;
                let repaired = slot.in_flight.take();
                if slot.pending.is_empty() {
                    slot.state = FrameState::Idle;
                    FrameOutcome::Committed {
                        seq: slot.frame_seq,
                        repaired,
                    }
                } else {
                    slot.state = FrameState::DamagePending;
                    let seq = slot.frame_seq;
                    let deadline = aligned_deadline(slot, now, coalesce);
                    self.schedule(output, deadline);
                    FrameOutcome::Committed { seq, repaired }
                }
            }
            Err(err) => {
                slot.failures += 1;
                let restored = slot.in_flight.take();
                slot.pending.union(&restored);

                if !err.is_transient() || slot.failures >= retry_limit {
                    warn!(
                        "Output {:?} degraded after {} failed frame(s): {}",
                        output, slot.failures, err
                    );
                    slot.state = FrameState::Degraded;
                    slot.timer.next_deadline = None;
                    slot.generation += 1;
                    FrameOutcome::Degraded
                } else {
                    debug!(
                        "Frame on {:?} failed ({}), retry {}/{}",
                        output, err, slot.failures, retry_limit
                    );
                    slot.state = FrameState::DamagePending;
                    let attempt = slot.failures;
                    let deadline = now + slot.interval;
                    self.schedule(output, deadline);
                    FrameOutcome::Retrying { attempt }
                }
            }
        };
        Ok(outcome)
    }

    /// Leave the degraded state, e.g. after a mode change
    pub fn clear_degraded(&mut self, output: OutputId, now: Instant) -> Result<(), StaleReference> {
        let coalesce = self.coalesce_window;
        let slot = self.slot_mut(output)?;
        if slot.state != FrameState::Degraded {
            return Ok(());
        }
        info!("Output {:?} recovered from degraded state", output);
        slot.failures = 0;
        if slot.pending.is_empty() {
            slot.state = FrameState::Idle;
        } else {
            slot.state = FrameState::DamagePending;
            let deadline = aligned_deadline(slot, now, coalesce);
            self.schedule(output, deadline);
        }
        Ok(())
    }

    /// Earliest live deadline
    pub fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(Reverse((deadline, output, generation))) = self.deadlines.peek().copied() {
            let live = self
                .outputs
                .get(&output)
                .is_some_and(|slot| slot.generation == generation && slot.state == FrameState::DamagePending);
            if live {
                return Some(deadline);
            }
            self.deadlines.pop();
        }
        None
    }

    pub fn state(&self, output: OutputId) -> Option<FrameState> {
        self.outputs.get(&output).map(|slot| slot.state)
    }

    pub fn timer(&self, output: OutputId) -> Option<FrameTimer> {
        self.outputs.get(&output).map(|slot| slot.timer)
    }

    /// Damage not yet handed to a render pass
    pub fn pending_damage(&self, output: OutputId) -> Option<&Region> {
        self.outputs.get(&output).map(|slot| &slot.pending)
    }

    fn schedule(&mut self, output: OutputId, deadline: Instant) {
        if let Some(slot) = self.outputs.get_mut(&output) {
            slot.generation += 1;
            slot.timer.next_deadline = Some(deadline);
            self.deadlines
                .push(Reverse((deadline, output, slot.generation)));
            trace!("Frame for {:?} scheduled at {:?}", output, deadline);
        }
    }

    fn slot_mut(&mut self, output: OutputId) -> Result<&mut OutputSlot, StaleReference> {
        self.outputs
            .get_mut(&output)
            .ok_or(StaleReference::new(ObjectKind::Output, output.0))
    }
}

/// First refresh boundary after the coalescing window
fn aligned_deadline(slot: &OutputSlot, now: Instant, coalesce: Duration) -> Instant {
    let earliest = now + coalesce;
    let Some(last) = slot.timer.last_commit else {
        return earliest;
    };
    if slot.interval.is_zero() || earliest <= last {
        return earliest.max(last);
    }
    let interval = slot.interval.as_nanos();
    let elapsed = (earliest - last).as_nanos();
    let frames = elapsed.div_ceil(interval);
    let offset = interval.saturating_mul(frames);
    last + Duration::from_nanos(u64::try_from(offset).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: Duration = Duration::from_micros(16_667);
    const COALESCE: Duration = Duration::from_millis(1);

    fn scheduler() -> (FrameScheduler, OutputId) {
        let mut scheduler = FrameScheduler::new(COALESCE, 3);
        let output = OutputId::new();
        scheduler.add_output(output, FRAME);
        (scheduler, output)
    }

    fn committed() -> Committed {
        Committed { seq: 1, time: 0 }
    }

    #[test]
    fn test_damage_schedules_after_coalesce_window() {
        let (mut scheduler, output) = scheduler();
        let now = Instant::now();
        scheduler
            .damage(output, Rectangle::new(0, 0, 10, 10), now)
            .unwrap();

        assert_eq!(scheduler.state(output), Some(FrameState::DamagePending));
        assert_eq!(scheduler.next_deadline(), Some(now + COALESCE));
        assert!(scheduler.due(now).is_empty());
    }

    #[test]
    fn test_two_damages_one_render_pass() {
        let (mut scheduler, output) = scheduler();
        let now = Instant::now();
        let r1 = Rectangle::new(0, 0, 100, 100);
        let r2 = Rectangle::new(200, 200, 50, 50);
        scheduler.damage(output, r1, now).unwrap();
        scheduler
            .damage(output, r2, now + Duration::from_micros(500))
            .unwrap();

        let requests = scheduler.due(now + FRAME);
        assert_eq!(requests.len(), 1);
        assert!(requests[0].damage.covers(r1));
        assert!(requests[0].damage.covers(r2));
        assert_eq!(requests[0].damage.area(), r1.area() + r2.area());
        assert!(scheduler.due(now + FRAME * 2).is_empty());
    }

    #[test]
    fn test_deadline_aligned_to_refresh() {
        let (mut scheduler, output) = scheduler();
        let start = Instant::now();
        scheduler
            .damage(output, Rectangle::new(0, 0, 1, 1), start)
            .unwrap();
        scheduler.due(start + COALESCE);
        scheduler.frame_composed(output).unwrap();
        scheduler
            .frame_committed(output, Ok(committed()), start + COALESCE)
            .unwrap();

        let later = start + COALESCE + Duration::from_millis(3);
        scheduler
            .damage(output, Rectangle::new(0, 0, 1, 1), later)
            .unwrap();
        assert_eq!(scheduler.next_deadline(), Some(start + COALESCE + FRAME));
    }

    #[test]
    fn test_damage_during_render_schedules_next_frame() {
        let (mut scheduler, output) = scheduler();
        let now = Instant::now();
        scheduler
            .damage(output, Rectangle::new(0, 0, 10, 10), now)
            .unwrap();
        let first = scheduler.due(now + COALESCE);
        assert_eq!(first.len(), 1);

        scheduler
            .damage(output, Rectangle::new(50, 50, 10, 10), now + COALESCE)
            .unwrap();
        assert_eq!(scheduler.state(output), Some(FrameState::Rendering));

        scheduler.frame_composed(output).unwrap();
        let outcome = scheduler
            .frame_committed(output, Ok(committed()), now + COALESCE)
            .unwrap();
        assert!(matches!(outcome, FrameOutcome::Committed { seq: 1, .. }));
        assert_eq!(scheduler.state(output), Some(FrameState::DamagePending));

        let second = scheduler.due(now + FRAME * 2);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].damage.rects(), &[Rectangle::new(50, 50, 10, 10)]);
        assert_eq!(second[0].seq, 2);
    }

    #[test]
    fn test_transient_failure_restores_damage() {
        let (mut scheduler, output) = scheduler();
        let now = Instant::now();
        let rect = Rectangle::new(0, 0, 10, 10);
        scheduler.damage(output, rect, now).unwrap();
        scheduler.due(now + COALESCE);
        scheduler.frame_composed(output).unwrap();

        let err = RenderError::Transient("busy".into());
        let outcome = scheduler
            .frame_committed(output, Err(&err), now + COALESCE)
            .unwrap();
        assert_eq!(outcome, FrameOutcome::Retrying { attempt: 1 });
        assert_eq!(scheduler.state(output), Some(FrameState::DamagePending));
        assert!(scheduler.pending_damage(output).unwrap().covers(rect));

        let retry = scheduler.due(now + COALESCE + FRAME);
        assert_eq!(retry.len(), 1);
        assert!(retry[0].damage.covers(rect));
    }

    #[test]
    fn test_degraded_after_retry_limit() {
        let (mut scheduler, output) = scheduler();
        let mut now = Instant::now();
        scheduler
            .damage(output, Rectangle::new(0, 0, 10, 10), now)
            .unwrap();
        let err = RenderError::Transient("busy".into());

        let mut outcomes = Vec::new();
        for _ in 0..3 {
            now += FRAME * 2;
            assert_eq!(scheduler.due(now).len(), 1);
            scheduler.frame_composed(output).unwrap();
            outcomes.push(scheduler.frame_committed(output, Err(&err), now).unwrap());
        }
        assert_eq!(outcomes.last(), Some(&FrameOutcome::Degraded));
        assert_eq!(scheduler.state(output), Some(FrameState::Degraded));

        // Frames are skipped while degraded
        scheduler
            .damage(output, Rectangle::new(20, 20, 10, 10), now)
            .unwrap();
        assert!(scheduler.due(now + FRAME * 10).is_empty());
        assert_eq!(scheduler.next_deadline(), None);

        scheduler.clear_degraded(output, now).unwrap();
        assert_eq!(scheduler.state(output), Some(FrameState::DamagePending));
        assert_eq!(scheduler.due(now + FRAME * 2).len(), 1);
    }

    #[test]
    fn test_persistent_failure_degrades_immediately() {
        let (mut scheduler, output) = scheduler();
        let now = Instant::now();
        scheduler
            .damage(output, Rectangle::new(0, 0, 10, 10), now)
            .unwrap();
        scheduler.due(now + COALESCE);
        scheduler.frame_composed(output).unwrap();

        let err = RenderError::Persistent("connector gone".into());
        let outcome = scheduler.frame_committed(output, Err(&err), now).unwrap();
        assert_eq!(outcome, FrameOutcome::Degraded);
    }

    #[test]
    fn test_invalid_transition() {
        let (mut scheduler, output) = scheduler();
        assert!(matches!(
            scheduler.frame_composed(output),
            Err(SchedulerError::InvalidTransition {
                from: FrameState::Idle,
                ..
            })
        ));
    }

    #[test]
    fn test_removed_output_is_stale() {
        let (mut scheduler, output) = scheduler();
        let now = Instant::now();
        scheduler
            .damage(output, Rectangle::new(0, 0, 10, 10), now)
            .unwrap();
        scheduler.remove_output(output).unwrap();

        assert!(scheduler.due(now + FRAME).is_empty());
        assert!(matches!(
            scheduler.damage(output, Rectangle::new(0, 0, 1, 1), now),
            Err(SchedulerError::Stale(_))
        ));
    }
}
