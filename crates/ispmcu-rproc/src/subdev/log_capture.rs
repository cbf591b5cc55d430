// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! MCU log trace capture.

use ispmcu_abi::CarveoutName;

use super::{HookContext, LifecycleHook, SubdevError};
use crate::carveout::Carveout;

/// Reads the text log the MCU writes into the `isp0log` carveout.
///
/// Start only looks the carveout up; binding it is the supervisor's job. If
/// it is not bound, log capture stays unavailable and start still succeeds.
#[derive(Debug, Default)]
pub struct LogCapture {
    carveout: Option<Carveout>,
    crash_log: Option<String>,
}

impl LogCapture {
    /// Creates an inactive log capture.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true while the log buffer is readable.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        self.carveout.is_some()
    }

    /// Current log text up to the first NUL.
    #[must_use]
    pub fn snapshot(&self) -> Option<String> {
        read_text(self.carveout.as_ref()?)
    }

    /// Log text saved when the MCU last crashed.
    #[must_use]
    pub fn crash_log(&self) -> Option<&str> {
        self.crash_log.as_deref()
    }
}

fn read_text(carveout: &Carveout) -> Option<String> {
    let mut bytes = vec![0u8; carveout.len()];
    carveout.memory().read(0, &mut bytes).ok()?;
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    Some(String::from_utf8_lossy(&bytes[..end]).into_owned())
}

impl LifecycleHook for LogCapture {
    fn name(&self) -> &'static str {
        "log-capture"
    }

    fn prepare(&mut self, _ctx: HookContext<'_>) -> Result<(), SubdevError> {
        Ok(())
    }

    fn start(&mut self, ctx: HookContext<'_>) -> Result<(), SubdevError> {
        self.carveout = ctx.carveouts.lookup(CarveoutName::LOG_TRACE);
        if self.carveout.is_none() {
            tracing::info!("no log trace carveout, log capture unavailable");
        }
        Ok(())
    }

    fn stop(&mut self, _ctx: HookContext<'_>, crashed: bool) {
        let carveout = self.carveout.take();
        if crashed {
            self.crash_log = carveout.as_ref().and_then(read_text);
        }
    }

    fn unprepare(&mut self, _ctx: HookContext<'_>) {}
}
