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
use std::{fmt, str::FromStr, time::Duration};

use reqwest::{
    header::{HeaderMap, HeaderValue, IF_MATCH, LOCATION},
    Certificate,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info, warn};

use crate::{
    model::{
        Collection, ComputerSystem, Manager, PowerState, ResetRequest, ResetType, ServiceRoot,
        SoftwareInventory, Task, UpdateService,
    },
    network::{auth_token, Auth, Endpoint, HttpTransport, RedfishHttpClient},
    task_state::{task_state_active, FirmwareTaskStatus, TaskState},
    BmcError, Component, PowerAction,
};

const SESSIONS: &str = "SessionService/Sessions";
const POWER_OFF_POLL_ATTEMPTS: u32 = 10;
const POWER_OFF_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// How the client is logged in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Session {
    /// Every request carries the credentials.
    Basic,
    /// A Redfish session: `X-Auth-Token` plus the session resource to
    /// probe and delete.
    Token { token: String, uri: String },
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct SessionRequest<'a> {
    user_name: &'a str,
    password: &'a str,
}

impl fmt::Debug for SessionRequest<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRequest")
            .field("user_name", &self.user_name)
            .field("password", &"<redacted>")
            .finish()
    }
}

pub struct RedfishClientBuilder {
    endpoint: Endpoint,
    transport: Option<HttpTransport>,
    timeout: Option<Duration>,
    root_certificates: Vec<Certificate>,
    dump_payloads: bool,
    basic_auth: bool,
    etag_match_disabled: bool,
    versions_not_compatible: Vec<String>,
    system_name: Option<String>,
}

impl RedfishClientBuilder {
    /// Send credentials with every request instead of opening a session.
    pub fn basic_auth(mut self) -> Self {
        self.basic_auth = true;
        self
    }

    /// Leave out `If-Match` on reset requests. Some BMCs reject their own etags.
    pub fn etag_match_disabled(mut self) -> Self {
        self.etag_match_disabled = true;
        self
    }

    /// Redfish versions this client must refuse to work with.
    pub fn versions_not_compatible(mut self, versions: Vec<String>) -> Self {
        self.versions_not_compatible = versions;
        self
    }

    /// Restrict systems and managers to the one with this Id or Name.
    pub fn system_name(mut self, name: impl Into<String>) -> Self {
        self.system_name = Some(name.into());
        self
    }

    /// Validate the BMC certificate against `roots`.
    pub fn secure_tls(mut self, roots: Vec<Certificate>) -> Self {
        self.root_certificates = roots;
        self
    }

    /// Reuse a transport, and with it the cookie jar.
    pub fn transport(mut self, transport: HttpTransport) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn dump_payloads(mut self, enabled: bool) -> Self {
        self.dump_payloads = enabled;
        self
    }

    pub fn build(self) -> Result<RedfishClient, BmcError> {
        let transport = match self.transport {
            Some(t) => t,
            None => {
                let mut builder = HttpTransport::builder()
                    .dump_payloads_from_env()
                    .timeout(self.timeout.unwrap_or(crate::network::DEFAULT_TIMEOUT));
                if self.dump_payloads {
                    builder = builder.dump_payloads(true);
                }
                for cert in self.root_certificates {
                    builder = builder.add_root_certificate(cert);
                }
                builder.build()?
            }
        };
        Ok(RedfishClient {
            client: RedfishHttpClient::new(transport, self.endpoint),
            session: None,
            service_root: None,
            basic_auth: self.basic_auth,
            etag_match_disabled: self.etag_match_disabled,
            versions_not_compatible: self.versions_not_compatible,
            system_name: self.system_name,
        })
    }
}

/// Redfish client for one BMC. Every call other than [`RedfishClient::open`]
/// needs an open session.
#[derive(Debug)]
pub struct RedfishClient {
    client: RedfishHttpClient,
    session: Option<Session>,
    service_root: Option<ServiceRoot>,
    basic_auth: bool,
    etag_match_disabled: bool,
    versions_not_compatible: Vec<String>,
    system_name: Option<String>,
}

impl RedfishClient {
    pub fn builder(endpoint: Endpoint) -> RedfishClientBuilder {
        RedfishClientBuilder {
            endpoint,
            transport: None,
            timeout: None,
            root_certificates: Vec::new(),
            dump_payloads: false,
            basic_auth: false,
            etag_match_disabled: false,
            versions_not_compatible: Vec::new(),
            system_name: None,
        }
    }

    pub fn http_client(&self) -> &RedfishHttpClient {
        &self.client
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn service_root(&self) -> Option<&ServiceRoot> {
        self.service_root.as_ref()
    }

    /// Logs in and caches the service root.
    pub async fn open(&mut self) -> Result<(), BmcError> {
        if self.basic_auth {
            self.client.set_auth(Auth::Basic);
            self.session = Some(Session::Basic);
        } else {
            let endpoint = self.client.endpoint();
            let request = SessionRequest {
                user_name: endpoint.user.as_deref().unwrap_or_default(),
                password: endpoint.password.as_deref().unwrap_or_default(),
            };
            let response = self
                .client
                .post(SESSIONS, &request, HeaderMap::new())
                .await
                .map_err(|e| BmcError::LoginFailed(e.to_string()))?;
            let token = auth_token(&response)
                .ok_or_else(|| {
                    BmcError::LoginFailed("session created without an X-Auth-Token".to_string())
                })?
                .to_string();
            let uri = match response.header_str(LOCATION.as_str()) {
                Some(location) => resource_path(location),
                None => {
                    let body: serde_json::Value = response.json(SESSIONS)?;
                    body.get("@odata.id")
                        .and_then(|v| v.as_str())
                        .map(str::to_string)
                        .ok_or_else(|| {
                            BmcError::LoginFailed("session created without a location".to_string())
                        })?
                }
            };
            debug!("Opened Redfish session {uri}");
            self.client.set_auth(Auth::Token(token.clone()));
            self.session = Some(Session::Token { token, uri });
        }

        let (_, root): (_, ServiceRoot) = self.client.get("").await?;
        self.service_root = Some(root);
        if !self.compatible() {
            let version = self
                .service_root
                .as_ref()
                .map(|r| r.redfish_version.clone())
                .unwrap_or_default();
            if let Err(e) = self.close().await {
                warn!("Logout after version check failed: {e}");
            }
            return Err(BmcError::IncompatibleVersion(version));
        }
        Ok(())
    }

    /// Ends the session. Without an open session this does nothing.
    pub async fn close(&mut self) -> Result<(), BmcError> {
        let session = self.session.take();
        self.service_root = None;
        self.client.set_auth(Auth::Anonymous);
        if let Some(Session::Token { token, uri }) = session {
            // the DELETE itself has to be authenticated
            let mut client = self.client.clone();
            client.set_auth(Auth::Token(token));
            client
                .delete(&uri)
                .await
                .map_err(|e| BmcError::LogoutFailed(e.to_string()))?;
            debug!("Closed Redfish session {uri}");
        }
        Ok(())
    }

    /// Checks that the session is still accepted by the BMC.
    pub async fn session_active(&self) -> Result<bool, BmcError> {
        let probe = match &self.session {
            None => {
                return Err(BmcError::NotAuthenticated(
                    "no Redfish session, open() first".to_string(),
                ))
            }
            Some(Session::Basic) => "Systems".to_string(),
            Some(Session::Token { uri, .. }) => uri.clone(),
        };
        self.client
            .get::<serde_json::Value>(&probe)
            .await
            .map_err(|e| BmcError::NotAuthenticated(format!("session probe failed: {e}")))?;
        Ok(true)
    }

    /// False when the service's Redfish version is listed as not compatible.
    pub fn compatible(&self) -> bool {
        match &self.service_root {
            Some(root) => !self
                .versions_not_compatible
                .iter()
                .any(|v| v == &root.redfish_version),
            None => true,
        }
    }

    async fn get_members<T: DeserializeOwned>(&self, api: &str) -> Result<Vec<T>, BmcError> {
        let (_, collection): (_, Collection) = self.client.get(api).await?;
        let mut members = Vec::with_capacity(collection.members.len());
        for member in &collection.members {
            let (_, item) = self.client.get(&member.odata_id).await?;
            members.push(item);
        }
        Ok(members)
    }

    pub async fn systems(&self) -> Result<Vec<ComputerSystem>, BmcError> {
        self.session_active().await?;
        let systems: Vec<ComputerSystem> = self.get_members("Systems").await?;
        Ok(filter_system_name(
            systems,
            self.system_name.as_deref(),
            |s, name| s.id == name || s.name.as_deref() == Some(name),
        ))
    }

    pub async fn managers(&self) -> Result<Vec<Manager>, BmcError> {
        self.session_active().await?;
        let managers: Vec<Manager> = self.get_members("Managers").await?;
        Ok(filter_system_name(
            managers,
            self.system_name.as_deref(),
            |m, name| m.id == name || m.name.as_deref() == Some(name),
        ))
    }

    pub async fn chassis(&self) -> Result<Vec<crate::model::Chassis>, BmcError> {
        self.session_active().await?;
        self.get_members("Chassis").await
    }

    pub async fn tasks(&self) -> Result<Vec<Task>, BmcError> {
        self.session_active().await?;
        self.get_members("TaskService/Tasks").await
    }

    pub async fn update_service(&self) -> Result<UpdateService, BmcError> {
        self.session_active().await?;
        let (_, service) = self.client.get("UpdateService").await?;
        Ok(service)
    }

    pub async fn firmware_inventory(&self) -> Result<Vec<SoftwareInventory>, BmcError> {
        self.session_active().await?;
        self.get_members("UpdateService/FirmwareInventory").await
    }

    /// Manufacturer and model of the first system.
    pub async fn device_vendor_model(&self) -> Result<(String, String), BmcError> {
        let systems = self.systems().await?;
        let system = systems.first().ok_or_else(|| BmcError::GenericError {
            error: "BMC reports no systems".to_string(),
        })?;
        Ok((
            system.manufacturer.clone().unwrap_or_default(),
            system.model.clone().unwrap_or_default(),
        ))
    }

    //
    // Power
    //

    pub async fn power_set(&self, action: &str) -> Result<(), BmcError> {
        match action.parse::<PowerAction>()? {
            PowerAction::On => self.system_power_on().await,
            PowerAction::Off => self.system_force_off().await,
            PowerAction::Soft => self.system_power_off().await,
            PowerAction::Reset => self.system_reset().await,
            PowerAction::Cycle => self.system_power_cycle().await,
        }
    }

    /// Power state of the first system.
    pub async fn system_power_status(&self) -> Result<PowerState, BmcError> {
        let systems = self.systems().await?;
        let system = systems.first().ok_or_else(|| BmcError::GenericError {
            error: "BMC reports no systems".to_string(),
        })?;
        system.power_state.ok_or_else(|| BmcError::MissingKey {
            key: "PowerState".to_string(),
            url: system.odata.odata_id.clone(),
        })
    }

    pub async fn system_power_on(&self) -> Result<(), BmcError> {
        for system in self.systems().await? {
            if system.power_state == Some(PowerState::On) {
                debug!("System {} already on", system.id);
                continue;
            }
            self.reset_system(&system, ResetType::On).await?;
        }
        Ok(())
    }

    /// Graceful shutdown.
    pub async fn system_power_off(&self) -> Result<(), BmcError> {
        for system in self.systems().await? {
            if system.power_state == Some(PowerState::Off) {
                debug!("System {} already off", system.id);
                continue;
            }
            self.reset_system(&system, ResetType::GracefulShutdown).await?;
        }
        Ok(())
    }

    pub async fn system_force_off(&self) -> Result<(), BmcError> {
        for system in self.systems().await? {
            if system.power_state == Some(PowerState::Off) {
                debug!("System {} already off", system.id);
                continue;
            }
            self.reset_system(&system, ResetType::ForceOff).await?;
        }
        Ok(())
    }

    /// Power cycle. A system that is off cannot be cycled.
    pub async fn system_power_cycle(&self) -> Result<(), BmcError> {
        for system in self.systems().await? {
            if system.power_state == Some(PowerState::Off) {
                return Err(BmcError::PowerCycleFromOff(system.id));
            }
            self.reset_system(&system, ResetType::PowerCycle).await?;
        }
        Ok(())
    }

    /// Power cycle, falling back to force off then on when the BMC rejects
    /// the PowerCycle reset type.
    pub async fn system_reset(&self) -> Result<(), BmcError> {
        for system in self.systems().await? {
            let err = match self.reset_system(&system, ResetType::PowerCycle).await {
                Ok(()) => continue,
                Err(e) => e,
            };
            warn!(
                "PowerCycle of system {} rejected ({err}), forcing off and on",
                system.id
            );
            self.reset_system(&system, ResetType::ForceOff).await?;
            self.wait_for_power_off().await;
            // the etag changed with the power state
            let (_, system): (_, ComputerSystem) = self.client.get(&system.odata.odata_id).await?;
            self.reset_system(&system, ResetType::On).await?;
        }
        Ok(())
    }

    async fn wait_for_power_off(&self) {
        for attempt in 1..=POWER_OFF_POLL_ATTEMPTS {
            match self.system_power_status().await {
                Ok(PowerState::Off) => return,
                Ok(state) => debug!("Waiting for power off, attempt {attempt}: {state}"),
                Err(e) => debug!("Waiting for power off, attempt {attempt}: {e}"),
            }
            tokio::time::sleep(POWER_OFF_POLL_INTERVAL).await;
        }
        warn!("System did not report Off after {POWER_OFF_POLL_ATTEMPTS} attempts");
    }

    async fn reset_system(
        &self,
        system: &ComputerSystem,
        reset_type: ResetType,
    ) -> Result<(), BmcError> {
        let mut headers = HeaderMap::new();
        if !self.etag_match_disabled {
            if let Some(etag) = &system.odata.odata_etag {
                let value = HeaderValue::from_str(etag).map_err(|e| BmcError::GenericError {
                    error: format!("Invalid etag {etag}: {e}"),
                })?;
                headers.insert(IF_MATCH, value);
            }
        }
        info!("Resetting system {} with {reset_type}", system.id);
        self.client
            .post(&system.reset_target(), &ResetRequest { reset_type }, headers)
            .await?;
        Ok(())
    }

    /// Resets every manager.
    pub async fn bmc_reset(&self, reset_type: ResetType) -> Result<(), BmcError> {
        for manager in self.managers().await? {
            info!("Resetting manager {} with {reset_type}", manager.id);
            self.client
                .post(
                    &manager.reset_target(),
                    &ResetRequest { reset_type },
                    HeaderMap::new(),
                )
                .await?;
        }
        Ok(())
    }

    //
    // Tasks
    //

    pub async fn task(&self, id: &str) -> Result<Task, BmcError> {
        self.tasks()
            .await?
            .into_iter()
            .find(|t| t.id == id)
            .ok_or_else(|| BmcError::TaskNotFound(format!("id: {id}")))
    }

    pub async fn task_status(&self, id: &str) -> Result<FirmwareTaskStatus, BmcError> {
        let task = self.task(id).await?;
        Ok(FirmwareTaskStatus::new(task.state(), task.info()))
    }

    /// The active `"<COMPONENT> Verify"` or `"<COMPONENT> Update"` task, if any.
    /// A matching task scheduled for the next host power cycle is an error:
    /// the component stays taken until the host cycles.
    pub async fn firmware_install_task_queued(
        &self,
        component: Component,
    ) -> Result<Option<Task>, BmcError> {
        let names = [format!("{component} Verify"), format!("{component} Update")];
        for task in self.tasks().await? {
            if !names.iter().any(|n| n == &task.name) {
                continue;
            }
            let state = task.state();
            if state == TaskState::PowerCycleHost {
                return Err(BmcError::HostPowerCycleRequired(task.info()));
            }
            match task_state_active(state) {
                Ok(true) => return Ok(Some(task)),
                Ok(false) => {}
                Err(_) => debug!("Ignoring task in unknown state: {}", task.info()),
            }
        }
        Ok(None)
    }
}

/// Keeps only items matching `system_name`. No filter, or a filter nothing
/// matches, returns every item.
pub(crate) fn filter_system_name<T>(
    items: Vec<T>,
    system_name: Option<&str>,
    matches: impl Fn(&T, &str) -> bool,
) -> Vec<T> {
    let Some(name) = system_name.filter(|n| !n.is_empty()) else {
        return items;
    };
    if !items.iter().any(|i| matches(i, name)) {
        debug!("No resource named {name}, returning all");
        return items;
    }
    items.into_iter().filter(|i| matches(i, name)).collect()
}

/// Path part of a URI that may be absolute (`https://bmc/redfish/v1/...`).
pub(crate) fn resource_path(uri: &str) -> String {
    if uri.starts_with('/') {
        return uri.to_string();
    }
    match uri.find("/redfish/") {
        Some(idx) => uri[idx..].to_string(),
        None => uri.to_string(),
    }
}

impl FromStr for PowerAction {
    type Err = BmcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "on" => Ok(PowerAction::On),
            "off" => Ok(PowerAction::Off),
            "soft" => Ok(PowerAction::Soft),
            "reset" => Ok(PowerAction::Reset),
            "cycle" => Ok(PowerAction::Cycle),
            _ => Err(BmcError::InvalidPowerAction(s.to_string())),
        }
    }
}
