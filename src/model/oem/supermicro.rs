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

// Wire types of the Supermicro web interface (cgi/*.cgi XML replies) and the
// Supermicro OEM fields of Redfish update requests.

use std::collections::HashMap;

use quick_xml::{events::Event, Reader};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, NoneAsEmptyString};

use crate::BmcError;

/// Reply to `FRU_INFO.XML`.
#[derive(Debug, Default, Deserialize, Clone)]
pub struct FruInfoReply {
    #[serde(rename = "FRU_INFO", default)]
    pub fru_info: FruInfo,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct FruInfo {
    #[serde(rename = "@RES", default)]
    pub res: Option<String>,
    #[serde(rename = "CHASSIS")]
    pub chassis: Option<FruRecord>,
    #[serde(rename = "BOARD")]
    pub board: Option<FruRecord>,
    #[serde(rename = "PRODUCT")]
    pub product: Option<FruRecord>,
}

#[serde_as]
#[derive(Debug, Default, Deserialize, Clone)]
pub struct FruRecord {
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(rename = "@MFC_NAME", default)]
    pub manufacturer: Option<String>,
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(rename = "@PROD_NAME", default)]
    pub product_name: Option<String>,
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(rename = "@PART_NUM", default)]
    pub part_number: Option<String>,
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(rename = "@SERIAL_NUM", default)]
    pub serial_number: Option<String>,
}

impl FruInfoReply {
    /// Board part number, which on these boards is the model (`X11SCM-F`).
    pub fn board_model(&self) -> Option<&str> {
        let board = self.fru_info.board.as_ref()?;
        board
            .part_number
            .as_deref()
            .or(board.product_name.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Reply of `cgi/upgrade_process.cgi`.
#[derive(Debug, Default, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct UpgradeProgress {
    #[serde(default)]
    pub status: i64,
    #[serde(default)]
    pub percent: i64,
}

/// Generic `cgi/ipmi.cgi` reply: every element with its attributes, in
/// document order. Most ops answer with a single element carrying `RES`.
#[derive(Debug, Default, Clone)]
pub struct IpmiReply {
    elements: Vec<(String, HashMap<String, String>)>,
}

impl IpmiReply {
    pub fn parse(url: &str, body: &str) -> Result<Self, BmcError> {
        let xml_error = |e: quick_xml::Error| BmcError::XmlDeserializeError {
            url: url.to_string(),
            body: body.to_string(),
            source: e.into(),
        };

        let mut reader = Reader::from_str(body);
        reader.config_mut().trim_text(true);
        let mut elements = Vec::new();
        loop {
            match reader.read_event().map_err(xml_error)? {
                Event::Start(e) | Event::Empty(e) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    let mut attrs = HashMap::new();
                    for attr in e.attributes().flatten() {
                        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                        let value = attr
                            .unescape_value()
                            .map_err(xml_error)?
                            .into_owned();
                        attrs.insert(key, value);
                    }
                    elements.push((name, attrs));
                }
                Event::Eof => break,
                _ => {}
            }
        }
        Ok(Self { elements })
    }

    /// Attribute `attr` of the first `element`.
    pub fn attr(&self, element: &str, attr: &str) -> Option<&str> {
        self.elements
            .iter()
            .find(|(name, _)| name == element)
            .and_then(|(_, attrs)| attrs.get(attr))
            .map(String::as_str)
    }

    /// First `RES` attribute in the document.
    pub fn res(&self) -> Option<&str> {
        self.elements
            .iter()
            .find_map(|(_, attrs)| attrs.get("RES"))
            .map(String::as_str)
    }
}

/// `Oem.Supermicro` of a Redfish multipart `UpdateParameters` part.
#[derive(Debug, Default, Serialize, Clone, PartialEq, Eq)]
pub struct FirmwareUpdateOptions {
    #[serde(rename = "BIOS", skip_serializing_if = "Option::is_none")]
    pub bios: Option<BiosUpdateOptions>,
    #[serde(rename = "BMC", skip_serializing_if = "Option::is_none")]
    pub bmc: Option<BmcUpdateOptions>,
}

#[derive(Debug, Default, Serialize, Clone, PartialEq, Eq)]
pub struct BiosUpdateOptions {
    #[serde(rename = "PreserveME")]
    pub preserve_me: bool,
    #[serde(rename = "PreserveNVRAM")]
    pub preserve_nvram: bool,
    #[serde(rename = "PreserveSMBIOS")]
    pub preserve_smbios: bool,
    #[serde(rename = "PreserveBOOTCONF")]
    pub preserve_bootconf: bool,
    #[serde(rename = "BackupBIOS", skip_serializing_if = "Option::is_none")]
    pub backup_bios: Option<bool>,
}

#[derive(Debug, Default, Serialize, Clone, PartialEq, Eq)]
pub struct BmcUpdateOptions {
    #[serde(rename = "PreserveCfg")]
    pub preserve_cfg: bool,
    #[serde(rename = "PreserveSdr")]
    pub preserve_sdr: bool,
    #[serde(rename = "PreserveSsl")]
    pub preserve_ssl: bool,
    #[serde(rename = "BackupBMC", skip_serializing_if = "Option::is_none")]
    pub backup_bmc: Option<bool>,
}
