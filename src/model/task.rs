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
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Deserializer, Serialize};

use super::{Message, OData};
use crate::task_state::{convert_task_state, TaskState};

/// https://redfish.dmtf.org/schemas/v1/Task.v1_7_1.json
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct Task {
    #[serde(flatten)]
    pub odata: OData,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    // Kept as sent. Vendors use states the DMTF enum does not have.
    pub task_state: Option<String>,
    pub task_status: Option<String>,
    pub percent_complete: Option<i64>,
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub start_time: Option<DateTime<FixedOffset>>,
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub end_time: Option<DateTime<FixedOffset>>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Task {
    pub fn state(&self) -> TaskState {
        convert_task_state(self.task_state.as_deref().unwrap_or_default())
    }

    pub fn status(&self) -> &str {
        self.task_status.as_deref().unwrap_or_default()
    }

    /// Message texts, skipping empty ones.
    pub fn message_texts(&self) -> Vec<&str> {
        self.messages
            .iter()
            .map(|m| m.message.as_str())
            .filter(|m| !m.is_empty())
            .collect()
    }

    /// `id: <id>, state: <state>, status: <status>` plus any messages. Used in
    /// every task related error.
    pub fn info(&self) -> String {
        let mut info = format!(
            "id: {}, state: {}, status: {}",
            self.id,
            self.task_state.as_deref().unwrap_or_default(),
            self.status()
        );
        let messages = self.message_texts();
        if !messages.is_empty() {
            info.push_str(", messages: ");
            info.push_str(&messages.join(", "));
        }
        info
    }
}

// Some BMCs send timestamps chrono rejects, or empty strings. Those become None.
fn lenient_datetime<'de, D>(deserializer: D) -> Result<Option<DateTime<FixedOffset>>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: Option<String> = Option::deserialize(deserializer)?;
    Ok(s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()))
}
