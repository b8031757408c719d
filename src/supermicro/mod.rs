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

// Supermicro BMCs. X11 boards install firmware through the web interface,
// X12 and X13 through Redfish. Which one we talk to is found by probing.

use std::{fmt, path::Path};

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    inventory::Device, model::ResetType, task_state::FirmwareTaskStatus, BmcError, Component,
    FirmwareInstallStep, PowerState,
};

mod redfish_generation;
pub mod service_client;
mod x11;

pub use redfish_generation::{RedfishGeneration, MIN_UPLOAD_TIME};
pub use service_client::{ServiceClient, ServiceClientBuilder};
pub use x11::{parse_upgrade_progress, BiosPhase, BmcPhase, X11};

/// Motherboard generation, named after the model prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    X11,
    X12,
    X13,
}

impl Family {
    /// Order generations are probed in.
    pub const PROBE_ORDER: [Family; 3] = [Family::X11, Family::X12, Family::X13];

    pub fn as_str(&self) -> &'static str {
        match self {
            Family::X11 => "X11",
            Family::X12 => "X12",
            Family::X13 => "X13",
        }
    }

    /// Case-insensitive prefix match on the board model.
    pub fn matches(&self, model: &str) -> bool {
        let prefix = self.as_str();
        model
            .trim()
            .get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What every generation can do for firmware install.
#[async_trait]
pub trait BmcQueryor {
    fn device_model(&self) -> &str;

    /// Reads the model from the BMC.
    async fn query_device_model(&self, sc: &ServiceClient) -> Result<String, BmcError>;

    fn supports_install(&self, component: Component) -> bool;

    fn firmware_install_steps(&self, component: Component) -> Vec<FirmwareInstallStep>;

    /// Uploads the image and returns the task to poll, empty if the
    /// generation has none.
    async fn firmware_upload(
        &self,
        sc: &ServiceClient,
        component: Component,
        path: &Path,
        deadline: Instant,
    ) -> Result<String, BmcError>;

    async fn firmware_install_uploaded(
        &self,
        sc: &ServiceClient,
        component: Component,
        upload_task_id: &str,
    ) -> Result<String, BmcError>;

    async fn firmware_task_status(
        &self,
        sc: &ServiceClient,
        component: Component,
        task_id: &str,
    ) -> Result<FirmwareTaskStatus, BmcError>;
}

/// Probes each family in [`Family::PROBE_ORDER`] until one reads a model
/// with its prefix.
///
/// `LegacyApiUnsupported` moves on to the next family, any other error is
/// returned as is.
pub async fn detect_family<'a, F>(mut probe: F) -> Result<(Family, String), BmcError>
where
    F: FnMut(Family) -> BoxFuture<'a, Result<String, BmcError>>,
{
    let mut models = Vec::new();
    for family in Family::PROBE_ORDER {
        match probe(family).await {
            Ok(model) if family.matches(&model) => return Ok((family, model)),
            Ok(model) => {
                debug!("{family} probe read model {model}, not a {family} board");
                models.push(model);
            }
            Err(e) if e.is_legacy_api_unsupported() => debug!("{family} probe: {e}"),
            Err(e) => return Err(e),
        }
    }
    if models.is_empty() {
        Err(BmcError::ModelUnknown(
            "no generation probe returned a model".to_string(),
        ))
    } else {
        models.dedup();
        Err(BmcError::ModelUnsupported(models.join(", ")))
    }
}

#[derive(Debug, Clone)]
pub enum Generation {
    X11(X11),
    X12(RedfishGeneration),
    X13(RedfishGeneration),
}

impl Generation {
    pub fn new(family: Family, model: String) -> Self {
        match family {
            Family::X11 => Generation::X11(X11::new(model)),
            Family::X12 => Generation::X12(RedfishGeneration::new(family, model)),
            Family::X13 => Generation::X13(RedfishGeneration::new(family, model)),
        }
    }

    pub async fn detect(sc: &ServiceClient) -> Result<Self, BmcError> {
        let (family, model) = detect_family(|family| match family {
            Family::X11 => X11::probe(sc).boxed(),
            Family::X12 | Family::X13 => RedfishGeneration::probe(sc).boxed(),
        })
        .await?;
        Ok(Self::new(family, model))
    }

    pub fn family(&self) -> Family {
        match self {
            Generation::X11(_) => Family::X11,
            Generation::X12(_) => Family::X12,
            Generation::X13(_) => Family::X13,
        }
    }
}

#[async_trait]
impl BmcQueryor for Generation {
    fn device_model(&self) -> &str {
        match self {
            Generation::X11(g) => g.device_model(),
            Generation::X12(g) | Generation::X13(g) => g.device_model(),
        }
    }

    async fn query_device_model(&self, sc: &ServiceClient) -> Result<String, BmcError> {
        match self {
            Generation::X11(g) => g.query_device_model(sc).await,
            Generation::X12(g) | Generation::X13(g) => g.query_device_model(sc).await,
        }
    }

    fn supports_install(&self, component: Component) -> bool {
        match self {
            Generation::X11(g) => g.supports_install(component),
            Generation::X12(g) | Generation::X13(g) => g.supports_install(component),
        }
    }

    fn firmware_install_steps(&self, component: Component) -> Vec<FirmwareInstallStep> {
        match self {
            Generation::X11(g) => g.firmware_install_steps(component),
            Generation::X12(g) | Generation::X13(g) => g.firmware_install_steps(component),
        }
    }

    async fn firmware_upload(
        &self,
        sc: &ServiceClient,
        component: Component,
        path: &Path,
        deadline: Instant,
    ) -> Result<String, BmcError> {
        match self {
            Generation::X11(g) => g.firmware_upload(sc, component, path, deadline).await,
            Generation::X12(g) | Generation::X13(g) => {
                g.firmware_upload(sc, component, path, deadline).await
            }
        }
    }

    async fn firmware_install_uploaded(
        &self,
        sc: &ServiceClient,
        component: Component,
        upload_task_id: &str,
    ) -> Result<String, BmcError> {
        match self {
            Generation::X11(g) => {
                g.firmware_install_uploaded(sc, component, upload_task_id)
                    .await
            }
            Generation::X12(g) | Generation::X13(g) => {
                g.firmware_install_uploaded(sc, component, upload_task_id)
                    .await
            }
        }
    }

    async fn firmware_task_status(
        &self,
        sc: &ServiceClient,
        component: Component,
        task_id: &str,
    ) -> Result<FirmwareTaskStatus, BmcError> {
        match self {
            Generation::X11(g) => g.firmware_task_status(sc, component, task_id).await,
            Generation::X12(g) | Generation::X13(g) => {
                g.firmware_task_status(sc, component, task_id).await
            }
        }
    }
}

/// A logged in Supermicro BMC, bound to its generation.
pub struct Client {
    service: ServiceClient,
    generation: Generation,
}

impl Client {
    /// Logs in and detects the generation. The session is closed again if
    /// detection fails.
    pub async fn open(mut service: ServiceClient) -> Result<Self, BmcError> {
        service.open().await?;
        match Generation::detect(&service).await {
            Ok(generation) => {
                info!(
                    "Detected {} board {}",
                    generation.family(),
                    generation.device_model()
                );
                Ok(Self {
                    service,
                    generation,
                })
            }
            Err(e) => {
                if let Err(close_err) = service.close().await {
                    warn!("Logout after failed detection: {close_err}");
                }
                Err(e)
            }
        }
    }

    pub async fn close(&mut self) -> Result<(), BmcError> {
        self.service.close().await
    }

    pub fn service(&self) -> &ServiceClient {
        &self.service
    }

    pub fn generation(&self) -> &Generation {
        &self.generation
    }

    pub fn device_model(&self) -> &str {
        self.generation.device_model()
    }

    fn component(&self, component: &str) -> Result<Component, BmcError> {
        let c: Component = component.parse()?;
        if !self.generation.supports_install(c) {
            return Err(BmcError::NotSupported(format!(
                "{c} install on {}",
                self.device_model()
            )));
        }
        Ok(c)
    }

    pub fn firmware_install_steps(
        &self,
        component: &str,
    ) -> Result<Vec<FirmwareInstallStep>, BmcError> {
        let c = self.component(component)?;
        Ok(self.generation.firmware_install_steps(c))
    }

    pub async fn firmware_upload(
        &self,
        component: &str,
        path: &Path,
        deadline: Instant,
    ) -> Result<String, BmcError> {
        let c = self.component(component)?;
        self.generation
            .firmware_upload(&self.service, c, path, deadline)
            .await
    }

    pub async fn firmware_install_uploaded(
        &self,
        component: &str,
        upload_task_id: &str,
    ) -> Result<String, BmcError> {
        let c = self.component(component)?;
        self.generation
            .firmware_install_uploaded(&self.service, c, upload_task_id)
            .await
    }

    pub async fn firmware_task_status(
        &self,
        component: &str,
        task_id: &str,
    ) -> Result<FirmwareTaskStatus, BmcError> {
        let c = self.component(component)?;
        self.generation
            .firmware_task_status(&self.service, c, task_id)
            .await
    }

    pub async fn power_set(&self, action: &str) -> Result<(), BmcError> {
        self.service.redfish().power_set(action).await
    }

    pub async fn power_state(&self) -> Result<PowerState, BmcError> {
        self.service.redfish().system_power_status().await
    }

    pub async fn inventory(&self, fail_on_error: bool) -> Result<Device, BmcError> {
        self.service.redfish().inventory(fail_on_error).await
    }

    pub async fn bmc_reset(&self, reset_type: ResetType) -> Result<(), BmcError> {
        self.service.redfish().bmc_reset(reset_type).await
    }
}
