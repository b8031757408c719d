/*
 * SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
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
use serde::{Deserialize, Serialize};

use super::{oem::UpdateParametersOem, ActionTarget, OData};

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct UpdateServiceActions {
    #[serde(rename = "#UpdateService.StartUpdate")]
    pub start_update: Option<ActionTarget>,
}

/// https://redfish.dmtf.org/schemas/v1/UpdateService.v1_14_0.json
/// Service for Software Update
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
#[serde(rename_all = "PascalCase", default)]
pub struct UpdateService {
    #[serde(flatten)]
    pub odata: OData,
    // Absent means enabled; only an explicit false disables the service
    pub service_enabled: Option<bool>,
    pub http_push_uri: String,
    pub max_image_size_bytes: Option<i64>,
    pub multipart_http_push_uri: String,
    pub actions: Option<UpdateServiceActions>,
}

impl UpdateService {
    pub fn is_enabled(&self) -> bool {
        self.service_enabled.unwrap_or(true)
    }

    pub fn start_update_target(&self) -> String {
        self.actions
            .as_ref()
            .and_then(|a| a.start_update.as_ref())
            .map(|a| a.target.clone())
            .unwrap_or_else(|| {
                "/redfish/v1/UpdateService/Actions/UpdateService.StartUpdate".to_string()
            })
    }
}

// UpdateParameters is what is sent for a multipart firmware upload's metadata.
#[derive(Debug, Default, Serialize, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct UpdateParameters {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<String>,
    #[serde(
        rename = "@Redfish.OperationApplyTime",
        skip_serializing_if = "Option::is_none"
    )]
    pub operation_apply_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oem: Option<UpdateParametersOem>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_update_service_parser() {
        let data = r##"{
            "@odata.id": "/redfish/v1/UpdateService",
            "ServiceEnabled": true,
            "MultipartHttpPushUri": "/redfish/v1/UpdateService/upload",
            "Actions": {
                "#UpdateService.StartUpdate": {
                    "target": "/redfish/v1/UpdateService/Actions/UpdateService.StartUpdate"
                }
            }
        }"##;
        let s: UpdateService = serde_json::from_str(data).unwrap();
        assert!(s.is_enabled());
        assert!(s.http_push_uri.is_empty());
        assert_eq!(s.multipart_http_push_uri, "/redfish/v1/UpdateService/upload");
    }

    #[test]
    fn test_update_parameters_skip_empty() {
        let json = serde_json::to_string(&UpdateParameters::default()).unwrap();
        assert_eq!(json, "{}");
    }
}
