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

// firmware.rs
// Firmware upload through the Redfish UpdateService: picks the push method
// the BMC advertises, streams the image, and works out the task ID from
// whatever shape of 202 reply the BMC sends.

use std::path::Path;

use reqwest::{header::HeaderMap, header::LOCATION, StatusCode};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::{
    jsonmap,
    model::{UpdateParameters, UpdateService},
    multipart::{file_size, spawn_producer, MultipartForm, Segment},
    network::HttpResponse,
    redfish::{resource_path, RedfishClient},
    BmcError,
};

pub const TASKS_PATH: &str = "/TaskService/Tasks/";

/// How the BMC takes firmware images.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallMethod {
    /// `multipart/form-data` POST with `UpdateParameters` and `UpdateFile` parts.
    Multipart(String),
    /// `application/octet-stream` POST of the bare image.
    UnstructuredPush(String),
}

impl InstallMethod {
    pub fn uri(&self) -> &str {
        match self {
            InstallMethod::Multipart(uri) | InstallMethod::UnstructuredPush(uri) => uri,
        }
    }
}

/// Multipart push wins when both are advertised.
pub fn install_method(service: &UpdateService) -> Result<InstallMethod, BmcError> {
    if !service.is_enabled() {
        return Err(BmcError::UpdateServiceUnavailable(
            "UpdateService is disabled".to_string(),
        ));
    }
    if !service.multipart_http_push_uri.is_empty() {
        return Ok(InstallMethod::Multipart(
            service.multipart_http_push_uri.clone(),
        ));
    }
    if !service.http_push_uri.is_empty() {
        return Ok(InstallMethod::UnstructuredPush(service.http_push_uri.clone()));
    }
    Err(BmcError::UpdateServiceUnavailable(
        "BMC advertises neither MultipartHttpPushUri nor HttpPushUri".to_string(),
    ))
}

/// Task ID out of a task URI such as `/redfish/v1/TaskService/Tasks/12/Monitor`.
/// Trailing slashes and the `/Monitor` suffix are ignored.
pub fn task_id_from_location(location: &str) -> Result<String, BmcError> {
    let idx = location
        .find(TASKS_PATH)
        .ok_or_else(|| BmcError::TaskNotFound(format!("no task URI in {location}")))?;
    let rest = &location[idx + TASKS_PATH.len()..];
    let id = rest
        .split(|c: char| c == '/' || c == '?' || c == '"' || c == '\'' || c.is_whitespace())
        .next()
        .unwrap_or_default();
    if id.is_empty() {
        return Err(BmcError::TaskNotFound(format!(
            "task URI without an ID: {location}"
        )));
    }
    Ok(id.to_string())
}

/// Task ID out of a JSON reply body. Tries a Task object first, then any
/// task URI mentioned in a `@Message.ExtendedInfo` style envelope.
pub fn task_id_from_response_body(url: &str, body: &str) -> Result<Option<String>, BmcError> {
    if body.trim().is_empty() {
        return Ok(None);
    }
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| BmcError::JsonDeserializeError {
            url: url.to_string(),
            body: body.to_string(),
            source: e,
        })?;
    let Some(map) = value.as_object() else {
        return Ok(None);
    };

    if let Ok(odata_type) = jsonmap::get_str(map, "@odata.type", url) {
        if odata_type.contains("Task.") {
            return Ok(Some(jsonmap::get_str(map, "Id", url)?.to_string()));
        }
    }

    for text in jsonmap::find_strings(map, "ExtendedInfo") {
        if text.contains(TASKS_PATH) {
            if let Ok(id) = task_id_from_location(text) {
                debug!("Task ID {id} found in extended info");
                return Ok(Some(id));
            }
        }
    }
    Ok(None)
}

/// Task ID of an accepted upload or StartUpdate request: the Location header,
/// then the body. `None` when the BMC sent neither.
pub fn find_task_id(url: &str, response: &HttpResponse) -> Result<Option<String>, BmcError> {
    if let Some(location) = response.header_str(LOCATION.as_str()) {
        if location.contains(TASKS_PATH) {
            return task_id_from_location(location).map(Some);
        }
    }
    task_id_from_response_body(url, &response.text())
}

impl RedfishClient {
    pub async fn firmware_install_method(&self) -> Result<InstallMethod, BmcError> {
        let service = self.update_service().await?;
        install_method(&service)
    }

    /// Uploads the image at `path` and returns the ID of the task the BMC
    /// created for it.
    ///
    /// The request may run until `deadline`, well past the default request
    /// timeout. `parameters` only applies to multipart push.
    pub async fn firmware_upload(
        &self,
        path: &Path,
        parameters: &UpdateParameters,
        deadline: Instant,
    ) -> Result<String, BmcError> {
        let method = self.firmware_install_method().await?;
        let timeout = deadline.saturating_duration_since(Instant::now());
        if timeout.is_zero() {
            return Err(BmcError::FirmwareUpload(
                "deadline passed before upload started".to_string(),
            ));
        }

        let uri = resource_path(method.uri());
        info!(
            "Uploading {} to {uri}, timeout {}s",
            path.display(),
            timeout.as_secs()
        );
        let response = match &method {
            InstallMethod::Multipart(_) => {
                let params =
                    serde_json::to_string(parameters).map_err(|e| BmcError::JsonSerializeError {
                        url: uri.clone(),
                        object_debug: format!("{parameters:?}"),
                        source: e,
                    })?;
                let form = MultipartForm::new()
                    .json_field("UpdateParameters", params)
                    .file("UpdateFile", path)
                    .await?;
                let content_type = form.content_type();
                let content_length = form.content_length();
                let (body, _producer) = form.into_body();
                self.http_client()
                    .post_stream(&uri, body, &content_type, content_length, timeout)
                    .await
            }
            InstallMethod::UnstructuredPush(_) => {
                let size = file_size(path).await?;
                let (stream, _producer) = spawn_producer(vec![Segment::File {
                    path: path.to_path_buf(),
                    size,
                }]);
                self.http_client()
                    .post_stream(
                        &uri,
                        reqwest::Body::wrap_stream(stream),
                        "application/octet-stream",
                        size,
                        timeout,
                    )
                    .await
            }
        }
        .map_err(|e| match e {
            BmcError::HTTPErrorCode {
                url,
                status_code,
                response_body,
            } => BmcError::FirmwareUpload(format!("{url} returned {status_code}: {response_body}")),
            e => e,
        })?;

        if response.status_code != StatusCode::ACCEPTED {
            return Err(BmcError::FirmwareUpload(format!(
                "expected {} from {uri}, got {}: {}",
                StatusCode::ACCEPTED,
                response.status_code,
                response.text()
            )));
        }
        match find_task_id(&uri, &response) {
            Ok(Some(id)) => Ok(id),
            Ok(None) => Err(BmcError::FirmwareUpload(format!(
                "no task ID in reply from {uri}: {}",
                response.text()
            ))),
            Err(BmcError::JsonDeserializeError { body, source, .. }) => Err(
                BmcError::FirmwareUpload(format!("unparseable reply from {uri}: {source}: {body}")),
            ),
            Err(e) => Err(e),
        }
    }

    /// Starts installing firmware uploaded with `@Redfish.OperationApplyTime`
    /// set to `OnStartUpdateRequest`. Returns the install task ID, or `None`
    /// when the BMC keeps using the upload task.
    pub async fn start_update_for_uploaded_firmware(&self) -> Result<Option<String>, BmcError> {
        let service = self.update_service().await?;
        let target = resource_path(&service.start_update_target());
        let response = self
            .http_client()
            .post(&target, &serde_json::json!({}), HeaderMap::new())
            .await?;
        if response.status_code != StatusCode::ACCEPTED {
            return Err(BmcError::UnexpectedResponse {
                payload: format!("POST {target}"),
                body: response.text(),
                status_code: response.status_code,
            });
        }
        find_task_id(&target, &response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use reqwest::header::HeaderValue;

    fn response(location: Option<&str>, body: &str) -> HttpResponse {
        let mut headers = HeaderMap::new();
        if let Some(l) = location {
            headers.insert(LOCATION, HeaderValue::from_str(l).unwrap());
        }
        HttpResponse {
            status_code: StatusCode::ACCEPTED,
            headers,
            body: Bytes::from(body.to_string()),
        }
    }

    #[test]
    fn test_install_method_prefers_multipart() {
        let service = UpdateService {
            http_push_uri: "/redfish/v1/UpdateService/push".to_string(),
            multipart_http_push_uri: "/redfish/v1/UpdateService/upload".to_string(),
            ..Default::default()
        };
        assert_eq!(
            install_method(&service).unwrap(),
            InstallMethod::Multipart("/redfish/v1/UpdateService/upload".to_string())
        );
    }

    #[test]
    fn test_install_method_unstructured_and_unavailable() {
        let mut service = UpdateService {
            http_push_uri: "/redfish/v1/UpdateService".to_string(),
            ..Default::default()
        };
        assert_eq!(
            install_method(&service).unwrap(),
            InstallMethod::UnstructuredPush("/redfish/v1/UpdateService".to_string())
        );

        service.service_enabled = Some(false);
        assert!(matches!(
            install_method(&service),
            Err(BmcError::UpdateServiceUnavailable(_))
        ));

        let empty = UpdateService::default();
        assert!(matches!(
            install_method(&empty),
            Err(BmcError::UpdateServiceUnavailable(_))
        ));
    }

    #[test]
    fn test_task_id_from_location() {
        for (location, id) in [
            ("/redfish/v1/TaskService/Tasks/1", "1"),
            ("/redfish/v1/TaskService/Tasks/1/", "1"),
            ("https://10.1.1.1/redfish/v1/TaskService/Tasks/12/Monitor", "12"),
            ("/redfish/v1/TaskService/Tasks/JID_123/Monitor/", "JID_123"),
        ] {
            assert_eq!(task_id_from_location(location).unwrap(), id, "{location}");
        }
        assert!(matches!(
            task_id_from_location("/redfish/v1/TaskService/Tasks/"),
            Err(BmcError::TaskNotFound(_))
        ));
        assert!(matches!(
            task_id_from_location("/redfish/v1/Systems/1"),
            Err(BmcError::TaskNotFound(_))
        ));
    }

    #[test]
    fn test_find_task_id_prefers_location() {
        let r = response(
            Some("/redfish/v1/TaskService/Tasks/7"),
            r##"{"@odata.type": "#Task.v1_4_3.Task", "Id": "8"}"##,
        );
        assert_eq!(find_task_id("u", &r).unwrap().as_deref(), Some("7"));
    }

    #[test]
    fn test_find_task_id_from_task_body() {
        let r = response(
            None,
            r##"{"@odata.type": "#Task.v1_4_3.Task", "@odata.id": "/redfish/v1/TaskService/Tasks/8", "Id": "8", "TaskState": "Running"}"##,
        );
        assert_eq!(find_task_id("u", &r).unwrap().as_deref(), Some("8"));
    }

    #[test]
    fn test_find_task_id_from_extended_info() {
        let r = response(
            Some("/redfish/v1/UpdateService"),
            r##"{
                "Accepted": {
                    "code": "Base.v1_10_3.Accepted",
                    "@Message.ExtendedInfo": [{
                        "MessageId": "SMC.1.0.OemSimpleupdateAcceptedMessage",
                        "Message": "Please also check Task Resource /redfish/v1/TaskService/Tasks/2 to see more information.",
                        "MessageArgs": ["/redfish/v1/TaskService/Tasks/2"]
                    }]
                }
            }"##,
        );
        assert_eq!(find_task_id("u", &r).unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn test_find_task_id_absent() {
        assert_eq!(find_task_id("u", &response(None, "")).unwrap(), None);
        assert_eq!(
            find_task_id("u", &response(None, r#"{"Message": "ok"}"#)).unwrap(),
            None
        );
        assert!(find_task_id("u", &response(None, "<html>")).is_err());
    }
}
