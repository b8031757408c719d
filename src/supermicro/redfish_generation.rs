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

// X12 and X13 boards install firmware through Redfish, with Supermicro OEM
// options in the multipart UpdateParameters.

use std::{path::Path, time::Duration};

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::info;

use super::{service_client::ServiceClient, BmcQueryor, Family};
use crate::{
    model::{
        oem::{
            supermicro::{BiosUpdateOptions, BmcUpdateOptions, FirmwareUpdateOptions},
            UpdateParametersOem,
        },
        UpdateParameters,
    },
    task_state::{FirmwareTaskStatus, TaskState},
    BmcError, Component, FirmwareInstallStep,
};

/// Uploads shorter than this are not attempted.
pub const MIN_UPLOAD_TIME: Duration = Duration::from_secs(5 * 60);

const BIOS_TARGET: &str = "/redfish/v1/Systems/1/Bios";
const BMC_TARGET: &str = "/redfish/v1/Managers/1";
const ON_START_UPDATE_REQUEST: &str = "OnStartUpdateRequest";
const ALREADY_IN_UPDATE_MODE: &str = "OemFirmwareAlreadyInUpdateMode";

#[derive(Debug, Clone)]
pub struct RedfishGeneration {
    family: Family,
    model: String,
}

impl RedfishGeneration {
    pub fn new(family: Family, model: impl Into<String>) -> Self {
        Self {
            family,
            model: model.into(),
        }
    }

    pub fn family(&self) -> Family {
        self.family
    }

    pub async fn probe(sc: &ServiceClient) -> Result<String, BmcError> {
        let (vendor, model) = sc.redfish().device_vendor_model().await?;
        if model.is_empty() {
            return Err(BmcError::ModelUnknown(format!(
                "{vendor} system has no model"
            )));
        }
        Ok(model)
    }

    /// Multipart `UpdateParameters` for `component`: staged only, installed
    /// by a later StartUpdate.
    pub fn update_parameters(&self, component: Component) -> UpdateParameters {
        let x13 = self.family == Family::X13;
        let (target, options) = match component {
            Component::Bios => (
                BIOS_TARGET,
                FirmwareUpdateOptions {
                    bios: Some(BiosUpdateOptions {
                        preserve_me: false,
                        preserve_nvram: false,
                        preserve_smbios: true,
                        preserve_bootconf: true,
                        backup_bios: x13.then_some(false),
                    }),
                    bmc: None,
                },
            ),
            Component::Bmc => (
                BMC_TARGET,
                FirmwareUpdateOptions {
                    bios: None,
                    bmc: Some(BmcUpdateOptions {
                        preserve_cfg: true,
                        preserve_sdr: true,
                        preserve_ssl: true,
                        backup_bmc: x13.then_some(true),
                    }),
                },
            ),
        };
        UpdateParameters {
            targets: vec![target.to_string()],
            operation_apply_time: Some(ON_START_UPDATE_REQUEST.to_string()),
            oem: Some(UpdateParametersOem {
                supermicro: Some(options),
            }),
        }
    }
}

/// The BMC refuses a new image while a previous one is still staged.
fn already_in_update_mode(e: BmcError) -> BmcError {
    let msg = e.to_string();
    if msg.contains(ALREADY_IN_UPDATE_MODE) {
        BmcError::ColdResetRequired(msg)
    } else {
        e
    }
}

#[async_trait]
impl BmcQueryor for RedfishGeneration {
    fn device_model(&self) -> &str {
        &self.model
    }

    async fn query_device_model(&self, sc: &ServiceClient) -> Result<String, BmcError> {
        Self::probe(sc).await
    }

    fn supports_install(&self, _component: Component) -> bool {
        true
    }

    fn firmware_install_steps(&self, component: Component) -> Vec<FirmwareInstallStep> {
        let mut steps = vec![
            FirmwareInstallStep::Upload,
            FirmwareInstallStep::UploadStatus,
            FirmwareInstallStep::InstallUploaded,
            FirmwareInstallStep::InstallStatus,
        ];
        if component == Component::Bios {
            steps.insert(0, FirmwareInstallStep::PowerOffHost);
        }
        steps
    }

    async fn firmware_upload(
        &self,
        sc: &ServiceClient,
        component: Component,
        path: &Path,
        deadline: Instant,
    ) -> Result<String, BmcError> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining < MIN_UPLOAD_TIME {
            return Err(BmcError::DeadlineInsufficient {
                remaining,
                required: MIN_UPLOAD_TIME,
            });
        }
        let redfish = sc.redfish();
        if let Some(task) = redfish.firmware_install_task_queued(component).await? {
            return Err(BmcError::FirmwareTaskActive(task.info()));
        }
        let params = self.update_parameters(component);
        let id = redfish
            .firmware_upload(path, &params, deadline)
            .await
            .map_err(already_in_update_mode)?;
        info!("{component} image uploaded to {}, verify task {id}", self.model);
        Ok(id)
    }

    async fn firmware_install_uploaded(
        &self,
        sc: &ServiceClient,
        _component: Component,
        upload_task_id: &str,
    ) -> Result<String, BmcError> {
        let redfish = sc.redfish();
        let task = redfish.task(upload_task_id).await?;
        if task.state() != TaskState::Complete || !task.status().eq_ignore_ascii_case("OK") {
            return Err(BmcError::FirmwareVerifyTask(task.info()));
        }
        let started = redfish
            .start_update_for_uploaded_firmware()
            .await
            .map_err(already_in_update_mode)?;
        match self.family {
            Family::X13 => Ok(upload_task_id.to_string()),
            _ => started.ok_or_else(|| {
                BmcError::TaskNotFound(format!(
                    "StartUpdate after upload task {upload_task_id} returned no task"
                ))
            }),
        }
    }

    async fn firmware_task_status(
        &self,
        sc: &ServiceClient,
        _component: Component,
        task_id: &str,
    ) -> Result<FirmwareTaskStatus, BmcError> {
        if task_id.is_empty() {
            return Err(BmcError::InstallStatusUnavailable(
                "no task ID to poll".to_string(),
            ));
        }
        sc.redfish().task_status(task_id).await
    }
}
