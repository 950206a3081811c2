//! A/B image boot marker with automatic rollback.
//!
//! The flash holds two immutable application images (slots `A` and `B`).
//! A persisted [`BootMarker`] records which slot is active, which one was
//! active before, and whether the active image has proven itself.
//!
//! ```text
//!   stage(version)      image written to the inactive slot (external transport)
//!   request_update()    staged slot becomes active in Trial, old slot kept as previous
//!   ── restart ──
//!   on_boot()           Trial: count the attempt, or roll back past the limit
//!   confirm()           server is up: Trial → Confirmed
//! ```
//!
//! Rollback never patches anything: it marks `previous` active and restarts.
//! On ESP-IDF the slots are the two OTA partitions and the decision is
//! mirrored into otadata through the bootloader API.

use core::fmt;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::app::ports::{StorageError, StoragePort};

/// NVS namespace for the boot marker.
pub const BOOT_NAMESPACE: &str = "boot";
const MARKER_KEY: &str = "marker";

/// Upper bound for a serialized marker.
const MARKER_BUF_SIZE: usize = 128;

/// Maximum length of an image version string.
pub const MAX_VERSION_LEN: usize = 16;

pub type Version = heapless::String<MAX_VERSION_LEN>;

// ── Error type ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateError {
    /// `update` requested but no image has been staged.
    NothingStaged,
    /// The running image is still on trial; confirm it before staging another.
    AwaitingConfirmation,
    /// Version string longer than [`MAX_VERSION_LEN`].
    VersionTooLong,
    /// No OTA partition backs the requested slot (device only).
    NoPartition,
    /// Bootloader refused the new boot slot (device only).
    BootSelectFailed(i32),
    /// Marker could not be persisted.
    Storage(StorageError),
}

impl fmt::Display for UpdateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NothingStaged => write!(f, "no staged image to boot"),
            Self::AwaitingConfirmation => write!(f, "running image not yet confirmed"),
            Self::VersionTooLong => write!(f, "version string too long"),
            Self::NoPartition => write!(f, "no OTA partition for slot"),
            Self::BootSelectFailed(rc) => write!(f, "set boot partition failed (rc={rc})"),
            Self::Storage(e) => write!(f, "boot marker storage: {e}"),
        }
    }
}

impl From<StorageError> for UpdateError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

// ── Marker ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Slot {
    A,
    B,
}

impl Slot {
    pub fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }

    fn index(self) -> usize {
        match self {
            Self::A => 0,
            Self::B => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageState {
    /// The active image reached a running server at least once.
    Confirmed,
    /// Freshly switched to; `attempts` boots so far without confirmation.
    Trial { attempts: u8 },
}

/// Persisted boot selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootMarker {
    pub active: Slot,
    pub previous: Option<Slot>,
    pub state: ImageState,
    /// Slot holding a complete image that has not been booted yet.
    pub staged: Option<Slot>,
    /// Image version per slot (`[A, B]`).
    pub versions: [Option<Version>; 2],
}

impl BootMarker {
    /// Marker for a board that has only ever run `version` from slot A.
    pub fn factory(version: &str) -> Self {
        let mut v = Version::new();
        for c in version.chars() {
            if v.push(c).is_err() {
                break;
            }
        }
        Self {
            active: Slot::A,
            previous: None,
            state: ImageState::Confirmed,
            staged: None,
            versions: [Some(v), None],
        }
    }

    pub fn version(&self, slot: Slot) -> Option<&str> {
        self.versions[slot.index()].as_deref()
    }
}

/// What the boot check decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootDecision {
    /// Confirmed image, nothing to do.
    Normal,
    /// Trial image booting for the `attempt`-th time.
    Trial { attempt: u8 },
    /// Trial image exhausted its attempts; `to` is active again and the
    /// caller must restart.
    RolledBack { from: Slot, to: Slot },
}

// ── Manager ───────────────────────────────────────────────────

pub struct UpdateManager {
    marker: BootMarker,
    max_trial_boots: u8,
}

impl UpdateManager {
    /// Load the marker, or create the factory marker for `running_version`
    /// if none exists or it cannot be decoded.
    pub fn load(storage: &dyn StoragePort, running_version: &str, max_trial_boots: u8) -> Self {
        let mut buf = [0u8; MARKER_BUF_SIZE];
        let marker = match storage.read(BOOT_NAMESPACE, MARKER_KEY, &mut buf) {
            Ok(len) => match postcard::from_bytes::<BootMarker>(&buf[..len]) {
                Ok(m) => m,
                Err(_) => {
                    warn!("Update: boot marker corrupted, assuming factory image");
                    BootMarker::factory(running_version)
                }
            },
            Err(StorageError::NotFound) => {
                info!("Update: no boot marker, factory image {}", running_version);
                BootMarker::factory(running_version)
            }
            Err(e) => {
                warn!("Update: boot marker read failed ({}), assuming factory image", e);
                BootMarker::factory(running_version)
            }
        };
        Self {
            marker,
            max_trial_boots: max_trial_boots.max(1),
        }
    }

    pub fn marker(&self) -> &BootMarker {
        &self.marker
    }

    /// Whether a staged image is waiting for `update`.
    pub fn has_staged(&self) -> bool {
        self.marker.staged.is_some()
    }

    /// Version of the active image.
    pub fn active_version(&self) -> Option<&str> {
        self.marker.version(self.marker.active)
    }

    /// Boot-time check.  Call once, before the server starts.
    pub fn on_boot(&mut self, storage: &mut dyn StoragePort) -> Result<BootDecision, UpdateError> {
        let ImageState::Trial { attempts } = self.marker.state else {
            return Ok(BootDecision::Normal);
        };

        let Some(previous) = self.marker.previous else {
            warn!("Update: trial image without a previous slot, confirming");
            self.marker.state = ImageState::Confirmed;
            self.persist(storage)?;
            return Ok(BootDecision::Normal);
        };

        if attempts >= self.max_trial_boots {
            let from = self.marker.active;
            warn!(
                "Update: slot {:?} failed to confirm after {} boots, rolling back to {:?}",
                from, attempts, previous
            );
            self.marker.active = previous;
            self.marker.previous = None;
            self.marker.state = ImageState::Confirmed;
            self.marker.staged = None;
            self.persist(storage)?;
            return Ok(BootDecision::RolledBack { from, to: previous });
        }

        let attempt = attempts + 1;
        self.marker.state = ImageState::Trial { attempts: attempt };
        self.persist(storage)?;
        info!(
            "Update: trial boot {}/{} of slot {:?}",
            attempt, self.max_trial_boots, self.marker.active
        );
        Ok(BootDecision::Trial { attempt })
    }

    /// Record that the inactive slot now holds a complete image.
    pub fn stage(&mut self, storage: &mut dyn StoragePort, version: &str) -> Result<Slot, UpdateError> {
        if matches!(self.marker.state, ImageState::Trial { .. }) {
            return Err(UpdateError::AwaitingConfirmation);
        }
        let mut v = Version::new();
        v.push_str(version).map_err(|_| UpdateError::VersionTooLong)?;

        let target = self.marker.active.other();
        self.marker.versions[target.index()] = Some(v);
        self.marker.staged = Some(target);
        self.persist(storage)?;
        info!("Update: staged {} in slot {:?}", version, target);
        Ok(target)
    }

    /// Switch the boot selection to the staged image in trial state.  The
    /// caller schedules the restart.
    ///
    /// The trial marker is persisted before the bootloader is pointed at
    /// the new slot, so the new image never boots without a trial count.
    /// On failure the previous marker is restored.
    pub fn request_update(&mut self, storage: &mut dyn StoragePort) -> Result<Slot, UpdateError> {
        let target = self.marker.staged.ok_or(UpdateError::NothingStaged)?;
        let saved = self.marker.clone();

        self.marker.previous = Some(self.marker.active);
        self.marker.active = target;
        self.marker.state = ImageState::Trial { attempts: 0 };
        self.marker.staged = None;
        if let Err(e) = self.persist(storage) {
            self.marker = saved;
            return Err(e);
        }

        if let Err(e) = platform_select_boot(target) {
            warn!("Update: boot select for slot {:?} failed ({}), keeping {:?}", target, e, saved.active);
            self.marker = saved;
            if let Err(restore) = self.persist(storage) {
                warn!("Update: restoring boot marker failed ({})", restore);
            }
            return Err(e);
        }
        info!(
            "Update: slot {:?} ({}) selected for trial boot",
            target,
            self.marker.version(target).unwrap_or("?")
        );
        Ok(target)
    }

    /// Mark the running trial image good.  Returns `true` if anything changed.
    pub fn confirm(&mut self, storage: &mut dyn StoragePort) -> Result<bool, UpdateError> {
        if self.marker.state == ImageState::Confirmed {
            return Ok(false);
        }
        self.marker.state = ImageState::Confirmed;
        self.persist(storage)?;
        platform_mark_valid();
        info!("Update: slot {:?} confirmed", self.marker.active);
        Ok(true)
    }

    fn persist(&self, storage: &mut dyn StoragePort) -> Result<(), UpdateError> {
        let bytes = postcard::to_allocvec(&self.marker).map_err(|_| StorageError::IoError)?;
        storage.write(BOOT_NAMESPACE, MARKER_KEY, &bytes)?;
        Ok(())
    }
}

// ── Bootloader bridge ─────────────────────────────────────────

/// Point otadata at `slot` (`A` = `ota_0`, `B` = `ota_1`).
#[cfg(target_os = "espidf")]
fn platform_select_boot(slot: Slot) -> Result<(), UpdateError> {
    use esp_idf_sys::*;
    let subtype = esp_partition_subtype_t_ESP_PARTITION_SUBTYPE_APP_OTA_0 + slot.index() as u32;
    // SAFETY: partition table lookup plus an otadata write, main task only.
    unsafe {
        let partition =
            esp_partition_find_first(esp_partition_type_t_ESP_PARTITION_TYPE_APP, subtype, core::ptr::null());
        if partition.is_null() {
            return Err(UpdateError::NoPartition);
        }
        let rc = esp_ota_set_boot_partition(partition);
        if rc != ESP_OK as i32 {
            return Err(UpdateError::BootSelectFailed(rc));
        }
    }
    Ok(())
}

#[cfg(not(target_os = "espidf"))]
thread_local! {
    static SIM_BOOT_SLOT: core::cell::Cell<Option<Slot>> = const { core::cell::Cell::new(None) };
    static SIM_SELECT_FAILS: core::cell::Cell<bool> = const { core::cell::Cell::new(false) };
}

#[cfg(not(target_os = "espidf"))]
fn platform_select_boot(slot: Slot) -> Result<(), UpdateError> {
    if SIM_SELECT_FAILS.with(core::cell::Cell::get) {
        return Err(UpdateError::BootSelectFailed(-1));
    }
    SIM_BOOT_SLOT.with(|s| s.set(Some(slot)));
    Ok(())
}

/// Slot the simulated bootloader was last pointed at on this thread.
#[cfg(not(target_os = "espidf"))]
pub fn sim_boot_slot() -> Option<Slot> {
    SIM_BOOT_SLOT.with(core::cell::Cell::get)
}

/// Make the simulated bootloader reject boot selection on this thread.
#[cfg(not(target_os = "espidf"))]
pub fn sim_fail_boot_select(fail: bool) {
    SIM_SELECT_FAILS.with(|f| f.set(fail));
}

#[cfg(target_os = "espidf")]
fn platform_mark_valid() {
    match esp_ota::mark_app_valid() {
        Ok(()) => info!("Update: firmware marked valid (rollback cancelled)"),
        Err(e) => warn!("Update: mark_app_valid failed: {:?}", e),
    }
}

#[cfg(not(target_os = "espidf"))]
fn platform_mark_valid() {}

/// Restart into `to`, the slot the marker names after a rollback.
///
/// otadata is pointed at `to` explicitly: the bootloader's own rollback
/// only applies while the running image is still pending verification.
#[cfg(target_os = "espidf")]
pub fn restart_after_rollback(to: Slot) -> ! {
    warn!("Update: rebooting into slot {:?}", to);
    if let Err(e) = platform_select_boot(to) {
        warn!("Update: rollback boot select failed ({})", e);
    }
    // SAFETY: does not return.
    unsafe { esp_idf_sys::esp_restart() }
}

#[cfg(not(target_os = "espidf"))]
pub fn restart_after_rollback(to: Slot) -> ! {
    if let Err(e) = platform_select_boot(to) {
        warn!("Update: rollback boot select failed ({})", e);
    }
    panic!("rollback restart into slot {to:?} (simulation: no real hardware reset)");
}

// ── Tests ─────────────────────────────────────────────────────
