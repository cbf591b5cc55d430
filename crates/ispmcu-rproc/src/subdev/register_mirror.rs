// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Register mirror.

use ispmcu_abi::{ADDR_ANY, CarveoutName};

use super::{HookContext, LifecycleHook, SubdevError};
use crate::carveout::Carveout;

const NAME: &str = "register-mirror";

/// Host shadow of MCU-visible 32-bit registers kept in `isp0regs`.
///
/// The shadow is pushed to shared memory on start and read back on a
/// graceful stop. After a crash the shared copy is not trusted and the
/// shadow keeps its last known values.
#[derive(Debug)]
pub struct RegisterMirror {
    shadow: Vec<u32>,
    carveout: Option<Carveout>,
}

impl RegisterMirror {
    /// Creates a mirror of `words` zeroed registers.
    #[must_use]
    pub fn new(words: usize) -> Self {
        Self {
            shadow: vec![0; words],
            carveout: None,
        }
    }

    /// Host copy of the registers.
    #[must_use]
    pub fn shadow(&self) -> &[u32] {
        &self.shadow
    }

    /// Sets a register in the host copy; takes effect at the next start.
    pub fn set(&mut self, index: usize, value: u32) -> bool {
        self.shadow
            .get_mut(index)
            .map(|slot| *slot = value)
            .is_some()
    }

    const fn byte_len(&self) -> usize {
        self.shadow.len() * 4
    }
}

impl LifecycleHook for RegisterMirror {
    fn name(&self) -> &'static str {
        NAME
    }

    fn prepare(&mut self, ctx: HookContext<'_>) -> Result<(), SubdevError> {
        let (carveout, _) = ctx
            .carveouts
            .bind_checked(CarveoutName::REGISTER_MIRROR, ADDR_ANY, self.byte_len())
            .map_err(|source| SubdevError::Carveout { name: NAME, source })?;
        self.carveout = Some(carveout);
        Ok(())
    }

    fn start(&mut self, _ctx: HookContext<'_>) -> Result<(), SubdevError> {
        let Some(carveout) = &self.carveout else {
            return Ok(());
        };
        let bytes: Vec<u8> = self.shadow.iter().flat_map(|word| word.to_le_bytes()).collect();
        carveout
            .memory()
            .write(0, &bytes)
            .map_err(|source| SubdevError::Memory { name: NAME, source })
    }

    fn stop(&mut self, _ctx: HookContext<'_>, crashed: bool) {
        if crashed {
            tracing::debug!("MCU crashed, register mirror not read back");
            return;
        }
        let Some(carveout) = &self.carveout else {
            return;
        };
        let mut bytes = vec![0u8; self.byte_len()];
        if let Err(err) = carveout.memory().read(0, &mut bytes) {
            tracing::warn!(error = %err, "register mirror read back failed");
            return;
        }
        for (word, chunk) in self.shadow.iter_mut().zip(bytes.chunks_exact(4)) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
    }

    fn unprepare(&mut self, _ctx: HookContext<'_>) {
        self.carveout = None;
    }
}
