// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Protected-memory state of the MCU.

use ispmcu_abi::MailboxMessage;

use super::{HookContext, LifecycleHook, SubdevError};

const NAME: &str = "protection-state";

/// Protection state as last agreed with the MCU.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Protection {
    /// The MCU may access unprotected memory.
    #[default]
    Unprotected,
    /// The MCU runs in protected mode.
    Protected,
}

/// Requests protected mode while the MCU runs.
#[derive(Debug, Default)]
pub struct ProtectionState {
    state: Protection,
}

impl ProtectionState {
    /// Creates the subdevice in the unprotected state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> Protection {
        self.state
    }
}

impl LifecycleHook for ProtectionState {
    fn name(&self) -> &'static str {
        NAME
    }

    fn prepare(&mut self, _ctx: HookContext<'_>) -> Result<(), SubdevError> {
        Ok(())
    }

    fn start(&mut self, ctx: HookContext<'_>) -> Result<(), SubdevError> {
        ctx.platform
            .send_message(&MailboxMessage::protection(true))
            .map_err(|source| SubdevError::Platform { name: NAME, source })?;
        self.state = Protection::Protected;
        Ok(())
    }

    fn stop(&mut self, ctx: HookContext<'_>, crashed: bool) {
        if !crashed {
            if let Err(err) = ctx.platform.send_message(&MailboxMessage::protection(false)) {
                tracing::warn!(error = %err, "protection release not delivered");
            }
        }
        self.state = Protection::Unprotected;
    }

    fn unprepare(&mut self, _ctx: HookContext<'_>) {}
}
