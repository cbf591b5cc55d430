// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Supervisor-level errors.
//!
//! Every error here is fatal for the operation that returned it. Device
//! scoped failures never reach this type; they are logged and the device is
//! left out.


use crate::carveout::CarveoutError;
use crate::mailbox::MailboxError;
use crate::platform::PlatformError;
use crate::subdev::SubdevError;
use crate::supervisor::RprocState;
use crate::table::TableError;

/// Errors returned by [`Supervisor`](crate::Supervisor).
#[derive(Debug, thiserror::Error)]
pub enum RprocError {
    /// Boot requested while the processor is not offline.
    #[error("remote processor already active ({state:?})")]
    AlreadyActive {
        /// State at the time of the request.
        state: RprocState,
    },
    /// The operation needs a running or crashed processor.
    #[error("remote processor not running ({state:?})")]
    NotRunning {
        /// State at the time of the request.
        state: RprocState,
    },
    /// The resource table failed validation.
    #[error("malformed resource table")]
    MalformedTable(#[from] TableError),
    /// The log trace carveout advertised by the table is unusable.
    #[error("log trace carveout unavailable")]
    LogCarveout(#[source] CarveoutError),
    /// A subdevice hook failed.
    #[error("subdevice failed")]
    Subdevice(#[from] SubdevError),
    /// A clock, rail or the reset line failed.
    #[error("platform control failed")]
    Platform(#[from] PlatformError),
    /// The mailbox could not be set up.
    #[error("mailbox setup failed")]
    Mailbox(#[from] MailboxError),
}
