//! Fail-safe timer engine.
//!
//! Holds at most one pending revert per pin plus one deferred system
//! action (restart / sleep).  The main loop calls [`Scheduler::tick`]
//! every iteration; due entries are handed to a [`SchedulerDelegate`],
//! which performs the hardware write or chip action.  The scheduler never
//! touches hardware itself and does not care whether a client is connected.
//!
//! ```text
//!   per pin:
//!
//!          write_pin(timeout)             write_pin(timeout)
//!   ┌──────┐ ───────────────▶ ┌───────┐ ──────────────────┐
//!   │ Idle │                  │ Armed │  keep revert value │
//!   └──────┘ ◀─────────────── └───────┘ ◀─────────────────┘
//!        deadline reached / setup_pin     new deadline
//!
//!   write_pin without timeout leaves an Armed pin Armed.
//! ```

use embedded_hal::digital::PinState;
use log::{debug, info};

use crate::app::ports::SchedulerDelegate;
use crate::pins::MAX_CONFIGURED_PINS;

// ═══════════════════════════════════════════════════════════════
//  Scheduled entry types
// ═══════════════════════════════════════════════════════════════

/// A scheduled restore of a pin to the level it held before a timed write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRevert {
    pub pin: u8,
    pub revert_value: PinState,
    /// Monotonic milliseconds since boot.
    pub deadline_ms: u64,
}

/// Chip-level actions deferred so the triggering response is sent first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemAction {
    /// Hard restart (`reset`, or after an `update` switched the boot slot).
    Restart,
    /// Enter light or deep sleep.
    Sleep { time_ms: u64, deep: bool },
}

impl SystemAction {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Restart => "restart",
            Self::Sleep { deep: true, .. } => "deep sleep",
            Self::Sleep { deep: false, .. } => "light sleep",
        }
    }
}

/// Whether [`Scheduler::arm_revert`] created a new entry or moved an
/// existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Armed {
    New(PendingRevert),
    Rearmed(PendingRevert),
}

impl Armed {
    pub fn entry(&self) -> PendingRevert {
        match self {
            Self::New(e) | Self::Rearmed(e) => *e,
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Scheduler engine
// ═══════════════════════════════════════════════════════════════

/// The fail-safe scheduler.
///
/// Reverts are kept sorted by deadline, latest first, so the earliest
/// entry is always at the end and fires with a `pop()`.
#[derive(Default)]
pub struct Scheduler {
    reverts: heapless::Vec<PendingRevert, MAX_CONFIGURED_PINS>,
    system: Option<(u64, SystemAction)>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm (or re-arm) the fail-safe for `pin`.
    ///
    /// `current` is the level the pin holds right now, before the write
    /// that requested the timeout.  If the pin is already armed, the
    /// originally captured level is kept and only the deadline moves, so
    /// a chain of timed writes always falls back to the level held before
    /// the first of them.
    ///
    /// Returns the rejected entry if the table is full.
    pub fn arm_revert(
        &mut self,
        pin: u8,
        current: PinState,
        deadline_ms: u64,
    ) -> Result<Armed, PendingRevert> {
        if let Some(idx) = self.position(pin) {
            let existing = self.reverts.swap_remove(idx);
            let entry = PendingRevert {
                deadline_ms,
                ..existing
            };
            // Slot just freed, cannot fail.
            let _ = self.reverts.push(entry);
            self.sort();
            debug!(
                "Scheduler: pin {} re-armed, deadline {} -> {}",
                pin, existing.deadline_ms, deadline_ms
            );
            return Ok(Armed::Rearmed(entry));
        }

        let entry = PendingRevert {
            pin,
            revert_value: current,
            deadline_ms,
        };
        self.reverts.push(entry)?;
        self.sort();
        debug!("Scheduler: pin {} armed, deadline {}", pin, deadline_ms);
        Ok(Armed::New(entry))
    }

    /// Drop the fail-safe for `pin`, if any.
    pub fn cancel_revert(&mut self, pin: u8) -> Option<PendingRevert> {
        let idx = self.position(pin)?;
        let entry = self.reverts.swap_remove(idx);
        self.sort();
        Some(entry)
    }

    /// The armed revert for `pin`, if any.
    pub fn pending_revert(&self, pin: u8) -> Option<&PendingRevert> {
        self.reverts.iter().find(|r| r.pin == pin)
    }

    /// Number of armed reverts.
    pub fn armed_count(&self) -> usize {
        self.reverts.len()
    }

    /// Queue a system action.  A newer request replaces an older one,
    /// which is returned.
    pub fn schedule_system(&mut self, action: SystemAction, due_ms: u64) -> Option<SystemAction> {
        info!("Scheduler: {} queued for t={}ms", action.label(), due_ms);
        self.system.replace((due_ms, action)).map(|(_, a)| a)
    }

    /// The queued system action, if any.
    pub fn pending_system(&self) -> Option<(u64, SystemAction)> {
        self.system
    }

    /// Earliest revert deadline.
    pub fn next_revert_deadline(&self) -> Option<u64> {
        self.reverts.last().map(|r| r.deadline_ms)
    }

    /// Earliest deadline of anything queued.
    pub fn next_deadline(&self) -> Option<u64> {
        let system = self.system.map(|(due, _)| due);
        match (self.next_revert_deadline(), system) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Fire everything due at `now_ms`.
    ///
    /// Reverts fire in deadline order and are removed before the delegate
    /// runs, so a failed restore is never retried.  The system action, if
    /// due, runs after all reverts.  Returns the number of reverts fired.
    pub fn tick(&mut self, now_ms: u64, delegate: &mut dyn SchedulerDelegate) -> usize {
        let mut fired = 0;
        while self.reverts.last().is_some_and(|r| r.deadline_ms <= now_ms) {
            if let Some(revert) = self.reverts.pop() {
                info!(
                    "Scheduler: pin {} fail-safe due (deadline {}ms, now {}ms)",
                    revert.pin, revert.deadline_ms, now_ms
                );
                delegate.on_revert_due(revert);
                fired += 1;
            }
        }

        if let Some((due, action)) = self.system {
            if due <= now_ms {
                self.system = None;
                delegate.on_system_action_due(action);
            }
        }
        fired
    }

    fn position(&self, pin: u8) -> Option<usize> {
        self.reverts.iter().position(|r| r.pin == pin)
    }

    fn sort(&mut self) {
        self.reverts
            .sort_unstable_by(|a, b| b.deadline_ms.cmp(&a.deadline_ms));
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════
