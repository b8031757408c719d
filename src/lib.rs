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
use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

pub mod model;

mod error;
pub mod firmware;
pub mod inventory;
mod jsonmap;
pub mod multipart;
pub mod network;
pub mod redfish;
pub mod supermicro;
pub mod task_state;

pub use error::BmcError;
pub use firmware::{InstallMethod, TASKS_PATH};
pub use inventory::Device;
pub use model::{PowerState, ResetType, Task, UpdateParameters};
pub use network::{Endpoint, HttpTransport, HttpTransportBuilder, REDFISH_ENDPOINT};
pub use redfish::{RedfishClient, RedfishClientBuilder, Session};
pub use task_state::{convert_task_state, task_state_active, FirmwareTaskStatus, TaskState};

/// A firmware component that can be updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
pub enum Component {
    #[serde(rename = "BIOS")]
    Bios,
    #[serde(rename = "BMC")]
    Bmc,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Component::Bios => f.write_str("BIOS"),
            Component::Bmc => f.write_str("BMC"),
        }
    }
}

impl FromStr for Component {
    type Err = BmcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BIOS" => Ok(Component::Bios),
            "BMC" => Ok(Component::Bmc),
            _ => Err(BmcError::NotSupported(format!(
                "firmware install for component {s}"
            ))),
        }
    }
}

/// `on|off|soft|reset|cycle`, as accepted by [`RedfishClient::power_set`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum PowerAction {
    On,
    /// Immediate, like pulling the plug.
    Off,
    /// Graceful shutdown through the OS.
    Soft,
    Reset,
    Cycle,
}

impl fmt::Display for PowerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PowerAction::On => "on",
            PowerAction::Off => "off",
            PowerAction::Soft => "soft",
            PowerAction::Reset => "reset",
            PowerAction::Cycle => "cycle",
        };
        f.write_str(s)
    }
}

/// A step the caller runs, in order, to install firmware on a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FirmwareInstallStep {
    /// Power the host off before uploading.
    PowerOffHost,
    Upload,
    /// Poll the upload (verify) task until it is done.
    UploadStatus,
    InstallUploaded,
    /// Poll the install task until it is done.
    InstallStatus,
}

impl fmt::Display for FirmwareInstallStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
