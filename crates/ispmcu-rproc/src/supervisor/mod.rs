// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Remote processor supervisor.
//!
//! The [`Supervisor`] owns every other component of one MCU instance and
//! drives the externally visible lifecycle:
//!
//! ```text
//!            boot                          stop
//! Offline ────────▶ Booting ──▶ Running ────────▶ Stopping ──▶ Offline
//!    ▲                 │           │                  ▲
//!    └──── failure ────┘           └──▶ Crashed ──────┘
//! ```
//!
//! Boot, stop and recovery are serialized by one lifecycle lock. A boot
//! request while anything but Offline is rejected, never queued.
//!
//! # Boot
//!
//! 1. Power rails and clocks
//! 2. Parse the resource table
//! 3. Bind the log trace carveout (fatal if missing)
//! 4. Publish board information
//! 5. Create and register virtual devices (failures drop the device)
//! 6. Prepare subdevices, then bind device buffers
//! 7. Release the MCU reset
//! 8. Start subdevices, open the mailbox, enable its interrupt
//! 9. Hand the devices to the transport consumer
//!
//! # Stop
//!
//! Stop closes the mailbox and waits for every queued kick and message to
//! finish before any ring is freed. It then detaches consumers, stops
//! devices and subdevices, puts the MCU into reset, releases the devices,
//! drops the table and powers down.


use std::fmt;
use std::sync::{Arc, Weak};
use std::thread;

use ispmcu_abi::rsc::{Le32, Le64};
use ispmcu_abi::{CarveoutName, MailboxMessage, MessageType};
use parking_lot::Mutex;

use crate::carveout::CarveoutRegistry;
use crate::config::RprocConfig;
use crate::error::RprocError;
use crate::mailbox::{Dispatch, MailboxDispatcher, MailboxError};
use crate::platform::{Platform, RegionAllocator};
use crate::stats::{Stats, StatsSnapshot};
use crate::subdev::{
    HookContext, LogCapture, ProtectionState, RegisterMirror, Subdevice, SubdeviceCoordinator,
};
use crate::table::{ResourceTable, SharedTable};
use crate::vdev::{TransportConsumer, VdevHandle, VirtualDevice};
use crate::virtqueue::VirtqueueManager;

/// Externally observable processor state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RprocState {
    /// Powered down, MCU in reset.
    Offline,
    /// Boot sequence in progress.
    Booting,
    /// MCU running, devices handed out.
    Running,
    /// The MCU reported a crash; waiting for stop or recovery.
    Crashed,
    /// Stop sequence in progress.
    Stopping,
}

#[derive(Debug)]
enum PowerSwitch {
    Rail(String),
    Clock(String),
}

/// State touched only while holding the control lock.
struct Control {
    table: Option<SharedTable>,
    vdevs: Vec<VdevHandle>,
    probed: Vec<usize>,
    subdevs: SubdeviceCoordinator,
    powered: Vec<PowerSwitch>,
    reset_released: bool,
    irq_enabled: bool,
}

struct Shared {
    config: RprocConfig,
    image: Vec<u8>,
    platform: Arc<dyn Platform>,
    consumer: Arc<dyn TransportConsumer>,
    carveouts: Arc<CarveoutRegistry>,
    virtqueues: Arc<VirtqueueManager>,
    mailbox: MailboxDispatcher,
    stats: Arc<Stats>,
    state: Mutex<RprocState>,
    /// Serializes boot, stop and recovery.
    lifecycle: Mutex<()>,
    control: Mutex<Control>,
}

/// Supervisor of one remote processor instance.
///
/// Dropping the supervisor stops the processor and releases its carveouts.
pub struct Supervisor {
    shared: Arc<Shared>,
}

impl Supervisor {
    /// Creates an offline supervisor.
    ///
    /// `table` is the resource table image the firmware was built with. It
    /// is parsed afresh on every boot.
    pub fn new(
        config: RprocConfig,
        table: Vec<u8>,
        platform: Arc<dyn Platform>,
        regions: Arc<dyn RegionAllocator>,
        consumer: Arc<dyn TransportConsumer>,
    ) -> Result<Self, RprocError> {
        let stats = Arc::new(Stats::new());
        let carveouts = Arc::new(CarveoutRegistry::new(regions));
        let virtqueues = Arc::new(VirtqueueManager::new(
            carveouts.clone(),
            platform.clone(),
            stats.clone(),
        ));
        let mailbox = MailboxDispatcher::new(&config, virtqueues.clone(), stats.clone())?;

        let mut subdevs = SubdeviceCoordinator::new();
        subdevs.register(Subdevice::LogCapture(LogCapture::new()));
        if config.has_register_mirror() {
            subdevs.register(Subdevice::RegisterMirror(RegisterMirror::new(
                config.register_mirror_words,
            )));
        }
        subdevs.register(Subdevice::ProtectionState(ProtectionState::new()));

        let shared = Arc::new(Shared {
            config,
            image: table,
            platform,
            consumer,
            carveouts,
            virtqueues,
            mailbox,
            stats,
            state: Mutex::new(RprocState::Offline),
            lifecycle: Mutex::new(()),
            control: Mutex::new(Control {
                table: None,
                vdevs: Vec::new(),
                probed: Vec::new(),
                subdevs,
                powered: Vec::new(),
                reset_released: false,
                irq_enabled: false,
            }),
        });

        let weak = Arc::downgrade(&shared);
        shared.mailbox.register_reserved(
            MessageType::CRASH,
            "supervisor",
            Arc::new(move |message: &MailboxMessage| {
                if let Some(shared) = weak.upgrade() {
                    let reason = format!("MCU reported crash {:#x}", message.payload[0]);
                    Shared::report_crash(&shared, &reason);
                }
            }),
        )?;

        Ok(Self { shared })
    }

    /// Boots the processor.
    ///
    /// Fails with [`RprocError::AlreadyActive`] unless Offline. On any other
    /// error the partial boot is undone and the processor stays Offline.
    pub fn boot(&self) -> Result<(), RprocError> {
        let _lifecycle = match self.shared.lifecycle.try_lock() {
            Some(guard) => guard,
            None => {
                let state = self.state();
                if state != RprocState::Offline {
                    return Err(RprocError::AlreadyActive { state });
                }
                // A stop of an offline processor or a boot about to leave
                // Offline; either is short, the state check below decides.
                self.shared.lifecycle.lock()
            }
        };
        let state = self.state();
        if state != RprocState::Offline {
            return Err(RprocError::AlreadyActive { state });
        }
        self.shared.boot_locked(&mut self.shared.control.lock())
    }

    /// Stops the processor. Stopping an offline processor does nothing.
    ///
    /// Returns only after all deferred mailbox work has finished.
    pub fn stop(&self) {
        let _lifecycle = self.shared.lifecycle.lock();
        self.shared.stop_locked(&mut self.shared.control.lock());
    }

    /// Stops and boots again.
    pub fn recover(&self) -> Result<(), RprocError> {
        self.shared.recover()
    }

    /// Marks a running processor as crashed.
    ///
    /// With `auto_recovery` configured a recovery thread restarts it.
    /// Returns false if the processor was not running.
    pub fn report_crash(&self, reason: &str) -> bool {
        Shared::report_crash(&self.shared, reason)
    }

    /// Entry point for the inbound mailbox interrupt.
    pub fn on_mailbox(&self, words: &[u32]) -> Dispatch {
        self.shared.mailbox.on_receive(words)
    }

    /// Installs a handler for a user message type.
    pub fn register_handler<F>(
        &self,
        kind: MessageType,
        owner: &'static str,
        handler: F,
    ) -> Result<(), MailboxError>
    where
        F: Fn(&MailboxMessage) + Send + Sync + 'static,
    {
        self.shared.mailbox.register(kind, owner, handler)
    }

    /// Removes a handler. Once this returns it is never invoked again.
    pub fn unregister_handler(&self, kind: MessageType) -> bool {
        self.shared.mailbox.unregister(kind)
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> RprocState {
        self.shared.state()
    }

    /// A live virtual device.
    #[must_use]
    pub fn vdev(&self, index: usize) -> Option<VdevHandle> {
        self.shared
            .control
            .lock()
            .vdevs
            .iter()
            .find(|vdev| vdev.index() == index)
            .cloned()
    }

    /// Indices of the live virtual devices.
    #[must_use]
    pub fn vdev_indices(&self) -> Vec<usize> {
        self.shared
            .control
            .lock()
            .vdevs
            .iter()
            .map(|vdev| vdev.index())
            .collect()
    }

    /// Notify ids of all allocated rings, ascending.
    #[must_use]
    pub fn notify_ids(&self) -> Vec<u32> {
        self.shared.virtqueues.notify_ids()
    }

    /// Highest notify id handed out since creation.
    #[must_use]
    pub fn max_notify_id(&self) -> Option<u32> {
        self.shared.virtqueues.max_notify_id()
    }

    /// Bound carveouts.
    #[must_use]
    pub fn carveouts(&self) -> &CarveoutRegistry {
        &self.shared.carveouts
    }

    /// Copy of the live resource table, as the MCU sees it.
    #[must_use]
    pub fn table_snapshot(&self) -> Option<Vec<u8>> {
        let control = self.shared.control.lock();
        let table = control.table.as_ref()?;
        let bytes = table.lock().as_bytes().to_vec();
        Some(bytes)
    }

    /// Current MCU log text, while log capture is live.
    #[must_use]
    pub fn trace_snapshot(&self) -> Option<String> {
        self.shared
            .control
            .lock()
            .subdevs
            .log_capture()
            .and_then(LogCapture::snapshot)
    }

    /// MCU log text saved at the last crash.
    #[must_use]
    pub fn crash_log(&self) -> Option<String> {
        self.shared
            .control
            .lock()
            .subdevs
            .log_capture()
            .and_then(|log| log.crash_log().map(str::to_owned))
    }

    /// Sets a register in the host shadow; pushed to the MCU on next start.
    ///
    /// Returns false without a register mirror or for an index out of range.
    pub fn set_register(&self, index: usize, value: u32) -> bool {
        self.shared
            .control
            .lock()
            .subdevs
            .register_mirror_mut()
            .is_some_and(|mirror| mirror.set(index, value))
    }

    /// Host shadow of the mirrored registers.
    #[must_use]
    pub fn registers(&self) -> Option<Vec<u32>> {
        self.shared
            .control
            .lock()
            .subdevs
            .register_mirror_mut()
            .map(|mirror| mirror.shadow().to_vec())
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Stops the processor and releases every carveout.
    pub fn shutdown(&self) {
        self.stop();
        self.shared.carveouts.release_all();
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("name", &self.shared.config.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Lifecycle
// =============================================================================

impl Shared {
    fn state(&self) -> RprocState {
        *self.state.lock()
    }

    fn set_state(&self, state: RprocState) {
        *self.state.lock() = state;
        tracing::info!(rproc = %self.config.name, ?state, "state changed");
    }

    fn ctx(&self) -> HookContext<'_> {
        HookContext {
            carveouts: &self.carveouts,
            platform: &*self.platform,
        }
    }

    fn boot_locked(&self, control: &mut Control) -> Result<(), RprocError> {
        self.set_state(RprocState::Booting);
        if let Err(err) = self.start_up(control) {
            tracing::error!(rproc = %self.config.name, error = %err, "boot failed");
            self.tear_down(control, false);
            self.set_state(RprocState::Offline);
            return Err(err);
        }

        self.stats.record_boot();
        self.set_state(RprocState::Running);

        for vdev in &control.vdevs {
            match self.consumer.probe(vdev.clone()) {
                Ok(()) => control.probed.push(vdev.index()),
                Err(err) => {
                    tracing::warn!(device = vdev.index(), error = %err, "consumer rejected device");
                }
            }
        }
        Ok(())
    }

    fn start_up(&self, control: &mut Control) -> Result<(), RprocError> {
        self.power_up(control)?;

        let table: SharedTable = Arc::new(Mutex::new(ResourceTable::parse(&self.image)?));
        control.table = Some(table.clone());

        self.bind_traces(&table)?;
        self.publish_board_info(&table);

        let locations: Vec<_> = table.lock().vdevs().collect();
        for location in locations {
            match VirtualDevice::create(
                &table,
                location,
                &self.virtqueues,
                &self.carveouts,
                self.config.supported_features,
            ) {
                Ok(vdev) => control.vdevs.push(vdev),
                Err(err) => {
                    tracing::warn!(
                        device = location.device_index(),
                        error = %err,
                        "virtual device skipped"
                    );
                }
            }
        }
        control.vdevs.retain(|vdev| {
            vdev.register()
                .inspect_err(|err| tracing::warn!(device = vdev.index(), error = %err, "register failed"))
                .is_ok()
        });

        control.subdevs.prepare(self.ctx())?;
        control.vdevs.retain(|vdev| {
            vdev.prepare()
                .inspect_err(|err| {
                    tracing::warn!(device = vdev.index(), error = %err, "virtual device skipped");
                })
                .is_ok()
        });

        self.platform.release_reset()?;
        control.reset_released = true;

        control.subdevs.start(self.ctx())?;

        self.mailbox.resume();
        self.platform.set_irq(self.config.mailbox_irq, true);
        control.irq_enabled = true;
        Ok(())
    }

    fn bind_traces(&self, table: &SharedTable) -> Result<(), RprocError> {
        let mut table = table.lock();
        let locations: Vec<_> = table.traces().collect();
        for location in locations {
            let Some(entry) = table.trace_mut(location) else {
                continue;
            };
            // The log region has a fixed name; the entry's own name is a label.
            tracing::debug!(label = ?entry.name_str(), "binding log trace");
            let (carveout, offset) = self
                .carveouts
                .bind_checked(
                    CarveoutName::LOG_TRACE,
                    entry.device_address.get(),
                    entry.len.get() as usize,
                )
                .map_err(RprocError::LogCarveout)?;
            entry.device_address = Le32::new(carveout.device_address().wrapping_add(offset as u32));
        }
        Ok(())
    }

    fn publish_board_info(&self, table: &SharedTable) {
        let rate = |name: &str| self.platform.clock_rate(name).unwrap_or(0);
        let (mcu, uart, timer) = (
            rate(&self.config.mcu_clock),
            rate(&self.config.uart_clock),
            rate(&self.config.timer_clock),
        );
        let now = self.platform.time_ns();

        let mut table = table.lock();
        let locations: Vec<_> = table.board_infos().collect();
        for location in locations {
            if let Some(entry) = table.board_info_mut(location) {
                entry.mcu_clock = Le32::new(mcu);
                entry.uart_clock = Le32::new(uart);
                entry.timer_clock = Le32::new(timer);
                entry.time_offset = Le64::new(now);
            }
        }
    }

    fn stop_locked(&self, control: &mut Control) {
        let crashed = {
            let state = self.state.lock();
            match *state {
                RprocState::Offline => return,
                RprocState::Crashed => true,
                _ => false,
            }
        };
        self.set_state(RprocState::Stopping);
        self.tear_down(control, crashed);
        self.set_state(RprocState::Offline);
    }

    /// Undoes whatever part of the boot sequence has run.
    fn tear_down(&self, control: &mut Control, crashed: bool) {
        self.mailbox.quiesce();
        if control.irq_enabled {
            self.platform.set_irq(self.config.mailbox_irq, false);
            control.irq_enabled = false;
        }
        // Strict barrier: no kick or handler may still touch a ring.
        self.mailbox.flush();

        for index in control.probed.drain(..).rev() {
            self.consumer.remove(index);
        }
        for vdev in control.vdevs.iter().rev() {
            vdev.stop();
        }
        control.subdevs.stop(self.ctx(), crashed);

        if control.reset_released {
            self.platform.assert_reset();
            control.reset_released = false;
        }

        // Dropping the last handles frees the rings and resets their table
        // fields while the table is still reachable.
        control.vdevs.clear();
        control.table = None;

        control.subdevs.unprepare(self.ctx());
        self.power_down(control);
    }

    fn power_up(&self, control: &mut Control) -> Result<(), RprocError> {
        for rail in &self.config.rails {
            self.platform.set_rail(rail, true)?;
            control.powered.push(PowerSwitch::Rail(rail.clone()));
        }
        for clock in &self.config.clocks {
            self.platform.set_clock(clock, true)?;
            control.powered.push(PowerSwitch::Clock(clock.clone()));
        }
        Ok(())
    }

    fn power_down(&self, control: &mut Control) {
        while let Some(switch) = control.powered.pop() {
            let result = match &switch {
                PowerSwitch::Rail(name) => self.platform.set_rail(name, false),
                PowerSwitch::Clock(name) => self.platform.set_clock(name, false),
            };
            if let Err(err) = result {
                tracing::warn!(?switch, error = %err, "power down failed");
            }
        }
    }

    fn recover(&self) -> Result<(), RprocError> {
        let _lifecycle = self.lifecycle.lock();
        let state = self.state();
        if !matches!(state, RprocState::Running | RprocState::Crashed) {
            return Err(RprocError::NotRunning { state });
        }
        tracing::info!(rproc = %self.config.name, "recovering");
        let mut control = self.control.lock();
        self.stop_locked(&mut control);
        self.boot_locked(&mut control)
    }

    fn report_crash(this: &Arc<Self>, reason: &str) -> bool {
        {
            let mut state = this.state.lock();
            if *state != RprocState::Running {
                tracing::debug!(state = ?*state, reason, "crash report ignored");
                return false;
            }
            *state = RprocState::Crashed;
        }
        this.stats.record_crash();
        tracing::error!(rproc = %this.config.name, reason, "remote processor crashed");

        if this.config.auto_recovery {
            let weak: Weak<Self> = Arc::downgrade(this);
            let spawned = thread::Builder::new()
                .name(format!("{}-recovery", this.config.name))
                .spawn(move || {
                    let Some(shared) = weak.upgrade() else {
                        return;
                    };
                    if let Err(err) = shared.recover() {
                        tracing::error!(error = %err, "recovery failed");
                    }
                });
            if let Err(err) = spawned {
                tracing::error!(error = %err, "could not start recovery");
            }
        }
        true
    }
}
