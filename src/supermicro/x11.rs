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

// X11 boards: firmware goes through the web interface's cgi endpoints, not
// Redfish. Every step is a separate request and the BMC keeps the state.

use std::path::Path;

use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::time::Instant;
use tracing::{debug, info};

use super::{
    service_client::{looks_like_html, IpmiResponse, ServiceClient},
    BmcQueryor,
};
use crate::{
    model::oem::supermicro::{FruInfoReply, UpgradeProgress},
    multipart::MultipartForm,
    task_state::{FirmwareTaskStatus, TaskState},
    BmcError, Component, FirmwareInstallStep,
};

const BIOS_UPLOAD: &str = "cgi/bios_upload.cgi";
const BMC_UPLOAD: &str = "cgi/oem_firmware_upload.cgi";
const OP: &str = "cgi/op.cgi";
const UPGRADE_PROCESS: &str = "cgi/upgrade_process.cgi";

const BIOS_INSTALL_TRIGGER: &str = "op=main_biosupdate&_=";
const BMC_INSTALL_TRIGGER: &str =
    "op=main_fwupdate&preserve_config=1&preserve_sdr=1&preserve_ssl=1&_=";

/// Where a BIOS update stands, from one `upgrade_process.cgi` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BiosPhase {
    /// Image uploaded, install never started. Only a cold reset clears it.
    UploadedOnly,
    /// Nothing in flight. Either done or never started.
    Idle,
    /// Flash written, needs finalizing.
    Flashed,
    Flashing,
    Unrecognized { status: i64, percent: i64 },
}

impl From<UpgradeProgress> for BiosPhase {
    fn from(p: UpgradeProgress) -> Self {
        match (p.status, p.percent) {
            (0, 1) => BiosPhase::UploadedOnly,
            (0, 0) => BiosPhase::Idle,
            (0, 100) => BiosPhase::Flashed,
            (8, _) => BiosPhase::Flashing,
            (status, percent) => BiosPhase::Unrecognized { status, percent },
        }
    }
}

/// BMC updates only report a percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BmcPhase {
    Done,
    Preparing,
    Flashing,
}

impl From<UpgradeProgress> for BmcPhase {
    fn from(p: UpgradeProgress) -> Self {
        match p.percent {
            0 | 100 => BmcPhase::Done,
            1 | 2 => BmcPhase::Preparing,
            _ => BmcPhase::Flashing,
        }
    }
}

/// Decodes an `upgrade_process.cgi` reply. The login page in its place means
/// the web session is gone.
pub fn parse_upgrade_progress(body: &str) -> Result<UpgradeProgress, BmcError> {
    if looks_like_html(body) {
        return Err(BmcError::SessionExpired(format!(
            "{UPGRADE_PROCESS} answered with a web page"
        )));
    }
    quick_xml::de::from_str(body).map_err(|e| BmcError::XmlDeserializeError {
        url: UPGRADE_PROCESS.to_string(),
        body: body.to_string(),
        source: e,
    })
}

#[derive(Debug, Clone)]
pub struct X11 {
    model: String,
}

impl X11 {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }

    /// Board model from the FRU. Anything that is not a FRU reply means this
    /// BMC has no XML API.
    pub async fn probe(sc: &ServiceClient) -> Result<String, BmcError> {
        let response = match sc.ipmi_query("FRU_INFO", "(0,0)").await {
            Err(BmcError::SessionExpired(e)) => return Err(BmcError::LegacyApiUnsupported(e)),
            r => r?,
        };
        let reply: FruInfoReply = quick_xml::de::from_str(&response.body)
            .map_err(|e| BmcError::LegacyApiUnsupported(format!("FRU_INFO: {e}")))?;
        reply
            .board_model()
            .map(str::to_string)
            .ok_or_else(|| {
                BmcError::ModelUnknown(format!("no board model in FRU: {}", response.body))
            })
    }

    /// Runs an op and checks `element`'s `RES`. `cold_reset_res` is the value
    /// meaning another session still holds the update.
    async fn ipmi_expect(
        sc: &ServiceClient,
        op: &str,
        r: &str,
        element: &str,
        ok_res: &str,
        cold_reset_res: Option<&str>,
    ) -> Result<IpmiResponse, BmcError> {
        let response = sc.ipmi_query(op, r).await?;
        let reply = response.reply()?;
        let res = reply.attr(element, "RES");
        match res {
            Some(res) if res == ok_res => Ok(response),
            Some(res) if Some(res) == cold_reset_res => Err(BmcError::ColdResetRequired(format!(
                "{op} returned {element} RES={res}, firmware update mode held by another session"
            ))),
            _ => Err(response.unexpected()),
        }
    }

    async fn lock_upload(sc: &ServiceClient) -> Result<(), BmcError> {
        Self::ipmi_expect(
            sc,
            "LOCK_UPLOAD_FW",
            "(0,0)",
            "LOCK_FW_UPLOAD",
            "1",
            Some("0"),
        )
        .await?;
        Ok(())
    }

    async fn upload_image(
        sc: &ServiceClient,
        endpoint: &str,
        part: &str,
        path: &Path,
        deadline: Instant,
    ) -> Result<(), BmcError> {
        let timeout = deadline.saturating_duration_since(Instant::now());
        if timeout.is_zero() {
            return Err(BmcError::FirmwareUpload(
                "deadline passed before upload started".to_string(),
            ));
        }
        let form = MultipartForm::new()
            .file(part, path)
            .await?
            .text_field("CSRF_TOKEN", sc.csrf_token().to_string());
        info!("Uploading {} to {endpoint}", path.display());
        let response = sc.upload_multipart(endpoint, form, timeout).await?;
        if response.status_code != StatusCode::OK {
            return Err(BmcError::FirmwareUpload(format!(
                "{endpoint} returned {}: {}",
                response.status_code,
                response.text()
            )));
        }
        Ok(())
    }

    async fn upload_bios(
        sc: &ServiceClient,
        path: &Path,
        deadline: Instant,
    ) -> Result<(), BmcError> {
        Self::ipmi_expect(
            sc,
            "COMPONENT_UPDATE_MISC",
            "(0,0)",
            "COMPONENT_UPDATE_MISC",
            "-1",
            Some("0"),
        )
        .await?;
        Self::lock_upload(sc).await?;
        Self::ipmi_expect(
            sc,
            "BIOS_UPDATE_START",
            "(1,0)",
            "BIOS_UPDATE_START",
            "1",
            None,
        )
        .await?;
        Self::upload_image(sc, BIOS_UPLOAD, "bios_rom", path, deadline).await?;
        Self::ipmi_expect(sc, "BIOS_UPDATE_CHECK", "(0,0)", "CHECK", "0", None)
            .await
            .map_err(|e| BmcError::FirmwareUpload(format!("uploaded BIOS image rejected: {e}")))?;
        Ok(())
    }

    async fn upload_bmc(
        sc: &ServiceClient,
        path: &Path,
        deadline: Instant,
    ) -> Result<(), BmcError> {
        Self::lock_upload(sc).await?;
        Self::upload_image(sc, BMC_UPLOAD, "fw_image", path, deadline).await?;
        let response = sc.ipmi_query("UPLOAD_FW_VERSION", "(0,0)").await?;
        let reply = response.reply()?;
        match reply.attr("FW_VERSION", "NEW").filter(|v| !v.is_empty()) {
            Some(new) => {
                info!(
                    "BMC image accepted, version {new} (running {})",
                    reply.attr("FW_VERSION", "OLD").unwrap_or("unknown")
                );
                Ok(())
            }
            None => Err(BmcError::FirmwareUpload(format!(
                "uploaded BMC image rejected: {}",
                response.body
            ))),
        }
    }

    /// The BMC starts flashing and never answers, so running out of time is
    /// the expected outcome.
    async fn trigger_install(sc: &ServiceClient, form: &str) -> Result<(), BmcError> {
        match sc
            .post_form(OP, form, Some(sc.install_trigger_timeout()))
            .await
        {
            Err(e) if e.is_timeout() => {
                debug!("Install trigger timed out, install running");
                Ok(())
            }
            Err(e) => Err(BmcError::FirmwareInstall(e.to_string())),
            Ok(r) if r.status_code.is_success() => Ok(()),
            Ok(r) => Err(BmcError::FirmwareInstall(format!(
                "{OP} returned {}: {}",
                r.status_code,
                r.text()
            ))),
        }
    }

    async fn upgrade_progress(
        sc: &ServiceClient,
        component: Component,
    ) -> Result<UpgradeProgress, BmcError> {
        let form = match component {
            Component::Bios => "fwtype=1&_=",
            Component::Bmc => "fwtype=0&_=",
        };
        let response = sc.post_form(UPGRADE_PROCESS, form, None).await?;
        if response.status_code != StatusCode::OK {
            return Err(BmcError::UnexpectedResponse {
                payload: form.to_string(),
                body: response.text(),
                status_code: response.status_code,
            });
        }
        parse_upgrade_progress(&response.text())
    }

    async fn bios_status(sc: &ServiceClient) -> Result<FirmwareTaskStatus, BmcError> {
        let progress = Self::upgrade_progress(sc, Component::Bios).await?;
        let info = format!("status: {}, percent: {}", progress.status, progress.percent);
        match BiosPhase::from(progress) {
            BiosPhase::UploadedOnly => Err(BmcError::TaskColdResetRequired(
                FirmwareTaskStatus::new(
                    TaskState::Failed,
                    format!("BIOS image uploaded but install never started ({info})"),
                ),
            )),
            BiosPhase::Idle => {
                let response = sc.ipmi_query("COMPONENT_UPDATE_MISC", "(1,0)").await?;
                let state = if response.reply()?.res() == Some("1") {
                    TaskState::PowerCycleHost
                } else {
                    TaskState::Complete
                };
                Ok(FirmwareTaskStatus::new(state, info))
            }
            BiosPhase::Flashed => {
                sc.ipmi_query("BIOS_UPDATE_DONE", "(0,0)").await?;
                sc.ipmi_query("COMPONENT_UPDATE_MISC", "(1,1)").await?;
                info!("BIOS flashed, host power cycle pending");
                Ok(FirmwareTaskStatus::new(TaskState::PowerCycleHost, info))
            }
            BiosPhase::Flashing => Ok(FirmwareTaskStatus::new(TaskState::Running, info)),
            BiosPhase::Unrecognized { .. } => Ok(FirmwareTaskStatus::new(TaskState::Unknown, info)),
        }
    }

    async fn bmc_status(sc: &ServiceClient) -> Result<FirmwareTaskStatus, BmcError> {
        let progress = Self::upgrade_progress(sc, Component::Bmc).await?;
        let info = format!("status: {}, percent: {}", progress.status, progress.percent);
        let state = match BmcPhase::from(progress) {
            BmcPhase::Done => TaskState::Complete,
            BmcPhase::Preparing => TaskState::Initializing,
            BmcPhase::Flashing => TaskState::Running,
        };
        Ok(FirmwareTaskStatus::new(state, info))
    }
}

#[async_trait]
impl BmcQueryor for X11 {
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
        match component {
            Component::Bios => vec![
                FirmwareInstallStep::PowerOffHost,
                FirmwareInstallStep::Upload,
                FirmwareInstallStep::InstallUploaded,
                FirmwareInstallStep::InstallStatus,
            ],
            Component::Bmc => vec![
                FirmwareInstallStep::Upload,
                FirmwareInstallStep::InstallUploaded,
                FirmwareInstallStep::InstallStatus,
            ],
        }
    }

    async fn firmware_upload(
        &self,
        sc: &ServiceClient,
        component: Component,
        path: &Path,
        deadline: Instant,
    ) -> Result<String, BmcError> {
        match component {
            Component::Bios => Self::upload_bios(sc, path, deadline).await?,
            Component::Bmc => Self::upload_bmc(sc, path, deadline).await?,
        }
        Ok(String::new())
    }

    async fn firmware_install_uploaded(
        &self,
        sc: &ServiceClient,
        component: Component,
        _upload_task_id: &str,
    ) -> Result<String, BmcError> {
        match component {
            Component::Bios => {
                Self::ipmi_expect(sc, "BIOS_OPTION", "(0,0,1)", "BIOS_OPTION", "1", None).await?;
                Self::trigger_install(sc, BIOS_INSTALL_TRIGGER).await?;
            }
            Component::Bmc => Self::trigger_install(sc, BMC_INSTALL_TRIGGER).await?,
        }
        info!("{component} install started on {}", self.model);
        Ok(String::new())
    }

    async fn firmware_task_status(
        &self,
        sc: &ServiceClient,
        component: Component,
        _task_id: &str,
    ) -> Result<FirmwareTaskStatus, BmcError> {
        match component {
            Component::Bios => Self::bios_status(sc).await,
            Component::Bmc => Self::bmc_status(sc).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(status: i64, percent: i64) -> UpgradeProgress {
        UpgradeProgress { status, percent }
    }

    #[test]
    fn test_bios_phase_table() {
        assert_eq!(BiosPhase::from(progress(0, 1)), BiosPhase::UploadedOnly);
        assert_eq!(BiosPhase::from(progress(0, 0)), BiosPhase::Idle);
        assert_eq!(BiosPhase::from(progress(0, 100)), BiosPhase::Flashed);
        assert_eq!(BiosPhase::from(progress(8, 0)), BiosPhase::Flashing);
        assert_eq!(BiosPhase::from(progress(8, 57)), BiosPhase::Flashing);
        assert_eq!(
            BiosPhase::from(progress(3, 20)),
            BiosPhase::Unrecognized {
                status: 3,
                percent: 20
            }
        );
        assert_eq!(
            BiosPhase::from(progress(0, 50)),
            BiosPhase::Unrecognized {
                status: 0,
                percent: 50
            }
        );
    }

    #[test]
    fn test_bmc_phase_thresholds() {
        assert_eq!(BmcPhase::from(progress(0, 0)), BmcPhase::Done);
        assert_eq!(BmcPhase::from(progress(0, 100)), BmcPhase::Done);
        assert_eq!(BmcPhase::from(progress(0, 1)), BmcPhase::Preparing);
        assert_eq!(BmcPhase::from(progress(0, 2)), BmcPhase::Preparing);
        assert_eq!(BmcPhase::from(progress(0, 3)), BmcPhase::Flashing);
        assert_eq!(BmcPhase::from(progress(0, 99)), BmcPhase::Flashing);
    }

    #[test]
    fn test_parse_upgrade_progress() {
        let p = parse_upgrade_progress(
            "<?xml version=\"1.0\"?>\n<IPMI><status>0</status><percent>100</percent></IPMI>",
        )
        .unwrap();
        assert_eq!(p, progress(0, 100));
    }

    #[test]
    fn test_parse_upgrade_progress_html_is_session_expired() {
        let page = "<!DOCTYPE html><html><head><title>Login</title></head>\
                    <body><status>8</status></body></html>";
        assert!(matches!(
            parse_upgrade_progress(page),
            Err(BmcError::SessionExpired(_))
        ));
    }

    #[test]
    fn test_install_steps() {
        let x11 = X11::new("X11SCM-F");
        assert_eq!(x11.device_model(), "X11SCM-F");
        assert_eq!(
            x11.firmware_install_steps(Component::Bios)[0],
            FirmwareInstallStep::PowerOffHost
        );
        assert!(!x11
            .firmware_install_steps(Component::Bmc)
            .contains(&FirmwareInstallStep::UploadStatus));
    }
}
