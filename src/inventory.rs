/*
 * SPDX-FileCopyrightText: Copyright (c) 2023 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
 * SPDX-License-Identifier: MIT
 *
 * Permission is hereby granted, free of charge, to any person obtaining a
 * copy of this software and associated documentation files (the "Software"),
 * to deal in the Software without restriction, including without limitation
 * the rights to use, copy, modify, merge, publish, distribute, sublicense,
 * and/or sell copies of the Software, and to permit persons to whom the
 * Software is furnished to do so, subject to the following conditions:
 *
 * The above copyright notice and this permission notice shall be included in
 * all copies or substantial portions of the Software.
 *
 * THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
 * IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
 * FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL
 * THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
 * LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
 * FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
 * DEALINGS IN THE SOFTWARE.
 */
use serde::Serialize;
use tracing::warn;

use crate::{
    model::{PowerState, SoftwareInventory},
    redfish::RedfishClient,
    BmcError,
};

/// What a device reports about itself over Redfish.
#[derive(Debug, Default, Clone, Serialize)]
pub struct Device {
    pub vendor: String,
    pub model: String,
    pub serial: String,
    pub bios: Option<FirmwareVersion>,
    pub bmc: Option<FirmwareVersion>,
    pub enclosures: Vec<Enclosure>,
    pub processors: Option<Processors>,
    pub memory_gib: Option<f64>,
    pub power_state: Option<PowerState>,
    pub status: Option<String>,
}

#[derive(Debug, Default, Clone, Serialize, PartialEq)]
pub struct FirmwareVersion {
    pub id: String,
    pub installed: Option<String>,
    pub previous: Option<String>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct Enclosure {
    pub id: String,
    pub chassis_type: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub serial: Option<String>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct Processors {
    pub count: Option<i64>,
    pub model: Option<String>,
}

/// Installed and previous versions of one component, from the firmware
/// inventory. A row counts when its Id says Installed or Previous and either
/// its Id contains `resource_id` or its Name is `label`, ignoring case.
/// Without a matching row, `own_version` is reported as installed.
pub fn firmware_version(
    inventory: &[SoftwareInventory],
    resource_id: &str,
    label: &str,
    own_version: Option<&str>,
) -> FirmwareVersion {
    let mut version = FirmwareVersion {
        id: resource_id.to_string(),
        ..Default::default()
    };
    for row in inventory {
        let matches = (!resource_id.is_empty() && row.id.contains(resource_id))
            || row.name.eq_ignore_ascii_case(label);
        if !matches {
            continue;
        }
        if row.id.contains("Installed") && version.installed.is_none() {
            version.installed = row.version.clone();
        } else if row.id.contains("Previous") && version.previous.is_none() {
            version.previous = row.version.clone();
        }
    }
    if version.installed.is_none() {
        version.installed = own_version.map(str::to_string);
    }
    version
}

// best_effort turns a collector error into a warning unless the caller
// asked for collection to fail.
fn best_effort<T: Default>(
    fail_on_error: bool,
    what: &str,
    res: Result<T, BmcError>,
) -> Result<T, BmcError> {
    match res {
        Ok(v) => Ok(v),
        Err(e) if fail_on_error => Err(e),
        Err(e) => {
            warn!("Inventory: skipping {what}: {e}");
            Ok(T::default())
        }
    }
}

impl RedfishClient {
    /// Collects systems, chassis, managers and firmware inventory into one
    /// record. Unless `fail_on_error`, a failing collector only leaves its
    /// part of the record empty.
    pub async fn inventory(&self, fail_on_error: bool) -> Result<Device, BmcError> {
        self.session_active().await?;
        let mut device = Device::default();

        let firmware = best_effort(
            fail_on_error,
            "firmware inventory",
            self.firmware_inventory().await,
        )?;
        best_effort(
            fail_on_error,
            "systems",
            self.collect_systems(&mut device, &firmware).await,
        )?;
        best_effort(
            fail_on_error,
            "chassis",
            self.collect_chassis(&mut device).await,
        )?;
        best_effort(
            fail_on_error,
            "managers",
            self.collect_managers(&mut device, &firmware).await,
        )?;
        Ok(device)
    }

    async fn collect_systems(
        &self,
        device: &mut Device,
        firmware: &[SoftwareInventory],
    ) -> Result<(), BmcError> {
        let systems = self.systems().await?;
        let Some(system) = systems.first() else {
            return Ok(());
        };
        device.vendor = system.manufacturer.clone().unwrap_or_default();
        device.model = system.model.clone().unwrap_or_default();
        device.serial = system.serial_number.clone().unwrap_or_default();
        device.power_state = system.power_state;
        device.status = system
            .status
            .as_ref()
            .and_then(|s| s.health)
            .map(|h| h.to_string());
        device.processors = system.processor_summary.as_ref().map(|p| Processors {
            count: p.count,
            model: p.model.clone(),
        });
        device.memory_gib = system
            .memory_summary
            .as_ref()
            .and_then(|m| m.total_system_memory_gib);
        device.bios = Some(firmware_version(
            firmware,
            "BIOS",
            "BIOS",
            system.bios_version.as_deref(),
        ));
        Ok(())
    }

    async fn collect_chassis(&self, device: &mut Device) -> Result<(), BmcError> {
        device.enclosures = self
            .chassis()
            .await?
            .into_iter()
            .map(|c| Enclosure {
                id: c.id,
                chassis_type: c.chassis_type,
                manufacturer: c.manufacturer,
                model: c.model,
                serial: c.serial_number,
            })
            .collect();
        Ok(())
    }

    async fn collect_managers(
        &self,
        device: &mut Device,
        firmware: &[SoftwareInventory],
    ) -> Result<(), BmcError> {
        let managers = self.managers().await?;
        if let Some(manager) = managers.first() {
            device.bmc = Some(firmware_version(
                firmware,
                &manager.id,
                "BMC",
                manager.firmware_version.as_deref(),
            ));
        }
        Ok(())
    }
}
