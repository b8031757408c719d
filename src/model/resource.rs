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

use super::ODataId;

// A Resource is a single entity accessed at a specific URI. A resource collection is a
// set of resources that share the same schema definition. Both carry these properties:
//
//                  for Resource        for Resource-Collection
// @odata.id   -    mandatory           mandatory
// @odata.type -    mandatory           mandatory
// @odata.etag -    mandatory           optional
// @odata.context   optional            optional
//
// Vendors skip the mandatory ones often enough that all four are optional here.
#[derive(Debug, Default, Serialize, Deserialize, Clone, Eq)]
pub struct OData {
    #[serde(rename = "@odata.id", default)]
    pub odata_id: String,
    #[serde(rename = "@odata.type")]
    pub odata_type: Option<String>,
    #[serde(rename = "@odata.etag")]
    pub odata_etag: Option<String>,
    #[serde(rename = "@odata.context")]
    pub odata_context: Option<String>,
}

impl PartialEq for OData {
    fn eq(&self, other: &OData) -> bool {
        self.odata_id == other.odata_id
    }
}

/// A resource collection as listed by the service. Members are links only;
/// the client fetches each one.
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct Collection {
    #[serde(flatten)]
    pub odata: OData,
    pub name: Option<String>,
    #[serde(default)]
    pub members: Vec<ODataId>,
}
