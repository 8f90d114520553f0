// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::error::{Error, panic_message};

use super::lifecycle::finish;
use super::{Device, Termination, TerminationReason};

/// Runs a device to completion.
///
/// The run loop executes on its own task. If it fails or panics, the failure
/// is raised as an exception alert and the device aborts.
pub async fn supervise(device: Device) -> Termination {
    let alerts = device.alerts().clone();
    let status = device.context().status().clone();
    let max_wait = device.shutdown_timeout();

    let error = match tokio::spawn(device.run()).await {
        Ok(Ok(termination)) => return termination,
        Ok(Err(e)) => e,
        Err(join) if join.is_panic() => Error::Panicked(panic_message(join.into_panic().as_ref())),
        Err(join) => Error::Panicked(join.to_string()),
    };

    alerts.exception("device run loop", &error);
    finish(&alerts, &status, TerminationReason::Abort, error.to_string(), max_wait).await
}
