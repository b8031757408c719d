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
use std::time::Duration;

use reqwest::StatusCode;

use crate::task_state::FirmwareTaskStatus;

#[derive(thiserror::Error, Debug)]
pub enum BmcError {
    //
    // Transport
    //
    #[error("Network error talking to BMC at {url}. {source}")]
    NetworkError { url: String, source: reqwest::Error },

    #[error("HTTP {status_code} at {url}: {response_body}")]
    HTTPErrorCode {
        url: String,
        status_code: StatusCode,
        response_body: String,
    },

    #[error("Could not deserialize response from {url}. Body: {body}. {source}")]
    JsonDeserializeError {
        url: String,
        body: String,
        source: serde_json::Error,
    },

    #[error("Could not serialize request body for {url}. Obj: {object_debug}. {source}")]
    JsonSerializeError {
        url: String,
        object_debug: String,
        source: serde_json::Error,
    },

    #[error("Could not decode XML response from {url}. Body: {body}. {source}")]
    XmlDeserializeError {
        url: String,
        body: String,
        source: quick_xml::DeError,
    },

    #[error("Remote returned empty body")]
    NoContent,

    #[error("Missing key {key} in JSON at {url}")]
    MissingKey { key: String, url: String },

    #[error("Key {key} should be {expected_type} at {url}")]
    InvalidKeyType {
        key: String,
        expected_type: String,
        url: String,
    },

    #[error("File error: {0}")]
    FileError(String),

    #[error("Unexpected response to {payload}: HTTP {status_code}, body: {body}")]
    UnexpectedResponse {
        payload: String,
        body: String,
        status_code: StatusCode,
    },

    //
    // Authentication and session
    //
    #[error("Not authenticated: {0}")]
    NotAuthenticated(String),

    #[error("Login failed: {0}")]
    LoginFailed(String),

    #[error("Logout failed: {0}")]
    LogoutFailed(String),

    //
    // Protocol and support
    //
    #[error("Redfish update service unavailable: {0}")]
    UpdateServiceUnavailable(String),

    #[error("BMC does not support the legacy XML API: {0}")]
    LegacyApiUnsupported(String),

    #[error("Unable to identify device model: {0}")]
    ModelUnknown(String),

    #[error("Device model not supported: {0}")]
    ModelUnsupported(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Redfish version {0} is listed as not compatible")]
    IncompatibleVersion(String),

    #[error("Unknown power action {0}, expected one of on, off, soft, reset, cycle")]
    InvalidPowerAction(String),

    #[error("Power cycle not possible, system {0} is powered off")]
    PowerCycleFromOff(String),

    //
    // Hardware state that needs the caller to act
    //
    #[error("BMC cold reset required: {0}")]
    ColdResetRequired(String),

    /// A firmware task ended in a state only a BMC cold reset clears. The
    /// task's own status is kept for callers that poll.
    #[error("BMC cold reset required, task {}: {}", .0.state, .0.status)]
    TaskColdResetRequired(FirmwareTaskStatus),

    #[error("Host power cycle required: {0}")]
    HostPowerCycleRequired(String),

    #[error("BMC web session expired: {0}")]
    SessionExpired(String),

    //
    // Firmware and tasks
    //
    #[error("Firmware upload failed: {0}")]
    FirmwareUpload(String),

    #[error("Firmware install failed: {0}")]
    FirmwareInstall(String),

    #[error("Not enough time left before the deadline: {remaining:?} remaining, {required:?} required")]
    DeadlineInsufficient {
        remaining: Duration,
        required: Duration,
    },

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Firmware task already active: {0}")]
    FirmwareTaskActive(String),

    #[error("Firmware verify task failed: {0}")]
    FirmwareVerifyTask(String),

    #[error("Firmware install status unavailable: {0}")]
    InstallStatusUnavailable(String),

    #[error("Unexpected task state: {0}")]
    UnexpectedTaskState(String),

    #[error("{error}")]
    GenericError { error: String },
}

impl BmcError {
    /// The BMC has no `cgi/ipmi.cgi` XML API. Generation detection treats this as
    /// "try the next generation"; everywhere else it is fatal.
    pub fn is_legacy_api_unsupported(&self) -> bool {
        matches!(self, BmcError::LegacyApiUnsupported(_))
    }

    pub fn is_not_authenticated(&self) -> bool {
        matches!(self, BmcError::NotAuthenticated(_))
    }

    pub fn is_cold_reset_required(&self) -> bool {
        matches!(
            self,
            BmcError::ColdResetRequired(_) | BmcError::TaskColdResetRequired(_)
        )
    }

    /// Status of the task this error ended, when there was one.
    pub fn task_status(&self) -> Option<&FirmwareTaskStatus> {
        match self {
            BmcError::TaskColdResetRequired(status) => Some(status),
            _ => None,
        }
    }

    /// The request ran past its timeout.
    pub fn is_timeout(&self) -> bool {
        match self {
            BmcError::NetworkError { source, .. } => source.is_timeout(),
            _ => false,
        }
    }
}
