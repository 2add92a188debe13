// SPDX-License-Identifier: MPL-2.0

//! Keeping coupled sets consistent across CPU hotplug.
//!
//! The online count of a set may only change while no CPU of the set is in
//! the rendezvous. A transition therefore disables coupled idle on the set
//! when it is prepared, and enables it again when it completes or is
//! canceled. The online count is recounted only for completed transitions.

use crate::{coupled::CoupledSet, platform::IdlePlatform, prelude::*, CoupledIdle};

/// A CPU hotplug transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum HotplugAction {
    /// The CPU has come online.
    Online = 0x0002,
    /// The CPU is about to come online.
    UpPrepare = 0x0003,
    /// Bringing the CPU online has failed.
    UpCanceled = 0x0004,
    /// The CPU is about to go offline.
    DownPrepare = 0x0005,
    /// Taking the CPU offline has failed.
    DownFailed = 0x0006,
    /// The CPU has gone offline.
    Dead = 0x0007,
}

impl HotplugAction {
    /// Set on actions delivered while tasks are frozen, e.g., on suspend.
    pub const TASKS_FROZEN: u32 = 0x0010;
}

impl TryFrom<u32> for HotplugAction {
    type Error = Error;

    fn try_from(code: u32) -> Result<Self> {
        let action = match code & !Self::TASKS_FROZEN {
            0x0002 => Self::Online,
            0x0003 => Self::UpPrepare,
            0x0004 => Self::UpCanceled,
            0x0005 => Self::DownPrepare,
            0x0006 => Self::DownFailed,
            0x0007 => Self::Dead,
            _ => return Err(Error::InvalidArgs),
        };
        Ok(action)
    }
}

/// The answer to a hotplug notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyResult {
    Ok,
}

impl<P: IdlePlatform> CoupledIdle<P> {
    /// Reacts to a hotplug transition of `cpu`.
    ///
    /// Never vetoes the transition. Running without coupled idle for a while
    /// is always acceptable.
    ///
    /// A completion only drops a disable that a prepare took. Completions
    /// without one are logged and otherwise ignored.
    pub fn cpu_notify(&self, action: HotplugAction, cpu: CpuId) -> NotifyResult {
        let _guard = self.lock.lock();

        let Some(set) = self.coupled_set(cpu) else {
            return NotifyResult::Ok;
        };

        match action {
            HotplugAction::UpPrepare | HotplugAction::DownPrepare => {
                self.mark_disabled(&set);
            }
            HotplugAction::Online | HotplugAction::Dead => match self.update_online_count(&set) {
                Ok(_) => self.allow_after_transition(&set, cpu, action),
                Err(err) => {
                    log::warn!(
                        "{}: {:?} without a prepared transition: {:?}",
                        cpu,
                        action,
                        err
                    );
                }
            },
            HotplugAction::UpCanceled | HotplugAction::DownFailed => {
                self.allow_after_transition(&set, cpu, action);
            }
        }
        log::debug!(
            "{}: {:?}, {} online, disable count {}",
            cpu,
            action,
            set.online_count(),
            set.disable_count()
        );

        NotifyResult::Ok
    }

    /// Reacts to a raw hotplug notification code.
    ///
    /// Codes of transitions that do not concern coupled idle are ignored.
    pub fn cpu_notify_raw(&self, code: u32, cpu: CpuId) -> NotifyResult {
        match HotplugAction::try_from(code) {
            Ok(action) => self.cpu_notify(action, cpu),
            Err(_) => NotifyResult::Ok,
        }
    }

    fn allow_after_transition(&self, set: &CoupledSet, cpu: CpuId, action: HotplugAction) {
        if self.clear_disabled(set).is_err() {
            log::warn!("{}: {:?} without a prepared transition", cpu, action);
        }
    }
}
