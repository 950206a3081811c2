//! GPIO service: the hexagonal core.
//!
//! [`GpioService`] owns the pin registry, the fail-safe scheduler and the
//! boot marker.  It executes validated [`Command`]s and fires due reverts.
//! All I/O flows through the port bundle passed in at call sites, so the
//! whole service runs against mock adapters in tests.
//!
//! ```text
//!   Command ──▶ ┌─────────────────────────────┐ ──▶ EventSink
//!               │         GpioService          │
//!  GpioPort ◀──│  Registry · Scheduler · A/B  │──▶ SystemPort
//!               └─────────────────────────────┘
//! ```

use embedded_hal::digital::PinState;
use log::{info, warn};

use crate::config::ServerConfig;
use crate::diagnostics::{self, FailsafeStats, MetricsInput, Reason, RevertFailure, RuntimeMetrics};
use crate::error::{PreconditionError, Result};
use crate::pins::is_usable_gpio;
use crate::scheduler::{Armed, PendingRevert, Scheduler, SystemAction};
use crate::update::UpdateManager;

use super::commands::{Action, Command, PinMode};
use super::events::AppEvent;
use super::ports::{EventSink, GpioPort, SchedulerDelegate, StoragePort, SystemPort};
use super::registry::PinRegistry;

// ───────────────────────────────────────────────────────────────
// Port bundle
// ───────────────────────────────────────────────────────────────

/// Driven adapters the service needs for one call.
pub struct Ports<'a> {
    pub gpio: &'a mut dyn GpioPort,
    pub system: &'a mut dyn SystemPort,
    pub storage: &'a mut dyn StoragePort,
    pub sink: &'a mut dyn EventSink,
}

// ───────────────────────────────────────────────────────────────
// Replies
// ───────────────────────────────────────────────────────────────

/// Action-specific part of a success response.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Echo only.
    Ack,
    /// `read_pin` result.
    Value(PinState),
    /// `get_resource_info` snapshot.
    Info(Box<RuntimeMetrics>),
    /// `get_version`.
    Version(&'static str),
    /// `list_actions`.
    Actions(&'static [Action]),
}

// ───────────────────────────────────────────────────────────────
// GpioService
// ───────────────────────────────────────────────────────────────

pub struct GpioService {
    registry: PinRegistry,
    scheduler: Scheduler,
    update: UpdateManager,
    failsafe: FailsafeStats,
    board: heapless::String<32>,
    system_action_delay_ms: u64,
    commands_handled: u32,
    last_panic: Option<Reason>,
}

impl GpioService {
    pub fn new(config: &ServerConfig, update: UpdateManager) -> Self {
        Self {
            registry: PinRegistry::new(),
            scheduler: Scheduler::new(),
            update,
            failsafe: FailsafeStats::default(),
            board: config.board.clone(),
            system_action_delay_ms: u64::from(config.system_action_delay_ms),
            commands_handled: 0,
            last_panic: None,
        }
    }

    /// Report a panic from the previous boot through `get_resource_info`.
    pub fn set_last_panic(&mut self, reason: Option<Reason>) {
        self.last_panic = reason;
    }

    // ── Command handling ──────────────────────────────────────

    /// Execute one validated command received at `now_ms`.
    pub fn execute(&mut self, cmd: Command, now_ms: u64, ports: &mut Ports<'_>) -> Result<Reply> {
        self.commands_handled = self.commands_handled.wrapping_add(1);

        match cmd {
            Command::SetupPin { pin, mode, value } => {
                self.setup_pin(pin, mode, value, ports)?;
                Ok(Reply::Ack)
            }
            Command::WritePin {
                pin,
                value,
                timeout_ms,
            } => {
                self.write_pin(pin, value, timeout_ms, now_ms, ports)?;
                Ok(Reply::Ack)
            }
            Command::ReadPin { pin } => {
                self.registry.get(pin)?;
                let level = ports.gpio.read(pin)?;
                self.registry.set_value(pin, level)?;
                Ok(Reply::Value(level))
            }
            Command::Ping => Ok(Reply::Ack),
            Command::Reset => {
                self.schedule(SystemAction::Restart, now_ms, ports);
                Ok(Reply::Ack)
            }
            Command::Sleep { time_ms, deep } => {
                let armed = self.scheduler.armed_count();
                if deep && armed > 0 {
                    return Err(PreconditionError::FailsafeArmed(armed).into());
                }
                self.schedule(SystemAction::Sleep { time_ms, deep }, now_ms, ports);
                Ok(Reply::Ack)
            }
            Command::GetResourceInfo => Ok(Reply::Info(Box::new(self.metrics(now_ms)))),
            Command::GetVersion => Ok(Reply::Version(env!("CARGO_PKG_VERSION"))),
            Command::ListActions => Ok(Reply::Actions(&Action::ALL)),
            Command::Update => {
                self.update.request_update(ports.storage)?;
                self.schedule(SystemAction::Restart, now_ms, ports);
                Ok(Reply::Ack)
            }
        }
    }

    fn setup_pin(
        &mut self,
        pin: u8,
        mode: PinMode,
        value: Option<PinState>,
        ports: &mut Ports<'_>,
    ) -> Result<()> {
        if !is_usable_gpio(i64::from(pin)) {
            return Err(PreconditionError::InvalidPin(i64::from(pin)).into());
        }
        if value.is_some() && mode == PinMode::Input {
            return Err(PreconditionError::ValueOnInput(pin).into());
        }
        if !self.registry.has_room_for(pin) {
            return Err(PreconditionError::RegistryFull.into());
        }

        ports.gpio.configure(pin, mode)?;
        let level = match value {
            Some(level) => {
                ports.gpio.write(pin, level)?;
                level
            }
            None => ports.gpio.read(pin)?,
        };

        // Only a setup the hardware accepted cancels an armed revert.
        if self.scheduler.cancel_revert(pin).is_some() {
            ports.sink.emit(&AppEvent::RevertCancelled { pin });
        }
        self.registry.configure(pin, mode, level)?;
        ports.sink.emit(&AppEvent::PinConfigured { pin, mode });
        Ok(())
    }

    fn write_pin(
        &mut self,
        pin: u8,
        value: PinState,
        timeout_ms: Option<u64>,
        now_ms: u64,
        ports: &mut Ports<'_>,
    ) -> Result<()> {
        let previous = self.registry.output(pin)?.value;

        ports.gpio.write(pin, value)?;
        self.registry.set_value(pin, value)?;
        ports.sink.emit(&AppEvent::PinWritten { pin, value });

        let Some(timeout_ms) = timeout_ms else {
            return Ok(());
        };
        let deadline_ms = now_ms.saturating_add(timeout_ms);
        let armed = self
            .scheduler
            .arm_revert(pin, previous, deadline_ms)
            .map_err(|_| PreconditionError::RegistryFull)?;
        if let Armed::Rearmed(_) = armed {
            info!("Pin {} fail-safe extended to t={}ms", pin, deadline_ms);
        }
        let entry = armed.entry();
        ports.sink.emit(&AppEvent::RevertArmed {
            pin,
            revert_to: entry.revert_value,
            deadline_ms: entry.deadline_ms,
        });
        Ok(())
    }

    fn schedule(&mut self, action: SystemAction, now_ms: u64, ports: &mut Ports<'_>) {
        let due_ms = now_ms.saturating_add(self.system_action_delay_ms);
        if let Some(replaced) = self.scheduler.schedule_system(action, due_ms) {
            warn!("Pending {} replaced by {}", replaced.label(), action.label());
        }
        ports.sink.emit(&AppEvent::SystemActionScheduled {
            action: action.label(),
            due_ms,
        });
    }

    // ── Periodic work ─────────────────────────────────────────

    /// Fire due reverts, then run a due system action.  Called every loop
    /// iteration regardless of connection state.  Returns the number of
    /// reverts fired.
    pub fn tick(&mut self, now_ms: u64, ports: &mut Ports<'_>) -> usize {
        let (fired, action) = self.fire_due(now_ms, ports);
        if let Some(action) = action {
            self.run_system_action(action, now_ms, ports);
        }
        fired
    }

    fn fire_due(&mut self, now_ms: u64, ports: &mut Ports<'_>) -> (usize, Option<SystemAction>) {
        let mut runner = RevertRunner {
            registry: &mut self.registry,
            stats: &mut self.failsafe,
            ports,
            now_ms,
            due_action: None,
        };
        let fired = self.scheduler.tick(now_ms, &mut runner);
        (fired, runner.due_action)
    }

    fn run_system_action(&mut self, action: SystemAction, now_ms: u64, ports: &mut Ports<'_>) {
        match action {
            SystemAction::Restart => {
                info!("Restarting");
                ports.system.restart();
            }
            SystemAction::Sleep { time_ms, deep: true } => {
                let armed = self.scheduler.armed_count();
                if armed > 0 {
                    warn!("Deep sleep dropped: {} fail-safe timer(s) armed since request", armed);
                    return;
                }
                info!("Deep sleep for {}ms", time_ms);
                ports.system.deep_sleep(time_ms);
            }
            SystemAction::Sleep {
                time_ms,
                deep: false,
            } => self.light_sleep(time_ms, now_ms, ports),
        }
    }

    /// Light sleep in slices that end at the next revert deadline, firing
    /// reverts after every wake.
    fn light_sleep(&mut self, time_ms: u64, now_ms: u64, ports: &mut Ports<'_>) {
        info!("Light sleep for {}ms", time_ms);
        let mut now = now_ms;
        let end = now_ms.saturating_add(time_ms);
        while now < end {
            let slice_end = self
                .scheduler
                .next_revert_deadline()
                .map_or(end, |deadline| deadline.clamp(now + 1, end));
            ports.system.light_sleep(slice_end - now);
            now = slice_end;

            let (_, action) = self.fire_due(now, ports);
            if let Some(action) = action {
                // Nothing else can queue during sleep; keep it for the next tick.
                self.scheduler.schedule_system(action, now);
            }
        }
    }

    // ── Queries ───────────────────────────────────────────────

    /// Snapshot for `get_resource_info`.
    pub fn metrics(&self, now_ms: u64) -> RuntimeMetrics {
        RuntimeMetrics::collect(MetricsInput {
            board: &self.board,
            uptime_ms: now_ms,
            pins_configured: self.registry.len(),
            commands_handled: self.commands_handled,
            failsafe: FailsafeStats {
                armed: self.scheduler.armed_count(),
                ..self.failsafe.clone()
            },
            last_panic: self.last_panic.clone(),
        })
    }

    pub fn registry(&self) -> &PinRegistry {
        &self.registry
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn failsafe_stats(&self) -> &FailsafeStats {
        &self.failsafe
    }

    pub fn update(&self) -> &UpdateManager {
        &self.update
    }

    pub fn update_mut(&mut self) -> &mut UpdateManager {
        &mut self.update
    }

    /// Earliest pending deadline, for sizing the idle wait.
    pub fn next_deadline(&self) -> Option<u64> {
        self.scheduler.next_deadline()
    }
}

// ───────────────────────────────────────────────────────────────
// Scheduler bridge
// ───────────────────────────────────────────────────────────────

/// Applies due reverts to hardware and registry.  System actions are
/// handed back to the service so they run after the scheduler is released.
struct RevertRunner<'r, 'a> {
    registry: &'r mut PinRegistry,
    stats: &'r mut FailsafeStats,
    ports: &'r mut Ports<'a>,
    now_ms: u64,
    due_action: Option<SystemAction>,
}

impl SchedulerDelegate for RevertRunner<'_, '_> {
    fn on_revert_due(&mut self, revert: PendingRevert) {
        let PendingRevert {
            pin, revert_value, ..
        } = revert;

        match self.ports.gpio.write(pin, revert_value) {
            Ok(()) => {
                let _ = self.registry.set_value(pin, revert_value);
                self.stats.fired = self.stats.fired.wrapping_add(1);
                self.ports.sink.emit(&AppEvent::RevertFired {
                    pin,
                    value: revert_value,
                });
            }
            Err(error) => {
                warn!("Pin {} fail-safe restore failed: {}", pin, error);
                self.stats.failed = self.stats.failed.wrapping_add(1);
                self.stats.last_failure = Some(RevertFailure {
                    pin,
                    uptime_ms: self.now_ms,
                    error: diagnostics::bounded(&error.to_string()),
                });
                self.ports.sink.emit(&AppEvent::RevertFailed { pin, error });
            }
        }
    }

    fn on_system_action_due(&mut self, action: SystemAction) {
        self.due_action = Some(action);
    }
}
