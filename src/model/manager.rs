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
use serde::{Deserialize, Serialize};

use super::{ActionTarget, OData, ResourceStatus};

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct ManagerActions {
    #[serde(rename = "#Manager.Reset")]
    pub manager_reset: Option<ActionTarget>,
}

/// http://redfish.dmtf.org/schemas/v1/Manager.v1_17_0.json
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct Manager {
    #[serde(flatten)]
    pub odata: OData,
    #[serde(default)]
    pub id: String,
    pub name: Option<String>,
    pub actions: Option<ManagerActions>,
    pub firmware_version: Option<String>,
    pub manager_type: Option<String>,
    pub model: Option<String>,
    pub status: Option<ResourceStatus>,
    #[serde(rename = "UUID")]
    pub uuid: Option<String>,
}

impl Manager {
    pub fn reset_target(&self) -> String {
        self.actions
            .as_ref()
            .and_then(|a| a.manager_reset.as_ref())
            .map(|a| a.target.clone())
            .unwrap_or_else(|| {
                format!(
                    "{}/Actions/Manager.Reset",
                    self.odata.odata_id.trim_end_matches('/')
                )
            })
    }
}
