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
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::BmcError;

/// The one task state every firmware flow reports, whatever the BMC calls it.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    Initializing,
    Queued,
    Running,
    PowerCycleHost,
    Complete,
    Failed,
    Unknown,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Initializing => "initializing",
            TaskState::Queued => "queued",
            TaskState::Running => "running",
            TaskState::PowerCycleHost => "powercycle-host",
            TaskState::Complete => "complete",
            TaskState::Failed => "failed",
            TaskState::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Maps a Redfish or vendor task state string to a [`TaskState`].
/// Never fails: anything unrecognized is [`TaskState::Unknown`].
pub fn convert_task_state(state: &str) -> TaskState {
    match state.trim().to_ascii_lowercase().as_str() {
        "starting" | "downloading" | "downloaded" | "scheduling" => TaskState::Initializing,
        "running" | "stopping" | "cancelling" => TaskState::Running,
        "pending" | "new" => TaskState::Queued,
        "scheduled" => TaskState::PowerCycleHost,
        "interrupted" | "killed" | "exception" | "cancelled" | "suspended" | "failed" => {
            TaskState::Failed
        }
        "completed" => TaskState::Complete,
        _ => TaskState::Unknown,
    }
}

/// Whether a task in `state` still occupies its component.
///
/// States that say nothing about activity (`Unknown`, `PowerCycleHost`)
/// are an error so the caller decides what to do with them.
pub fn task_state_active(state: TaskState) -> Result<bool, BmcError> {
    match state {
        TaskState::Initializing | TaskState::Running | TaskState::Queued => Ok(true),
        TaskState::Complete | TaskState::Failed => Ok(false),
        TaskState::PowerCycleHost | TaskState::Unknown => Err(BmcError::UnexpectedTaskState(
            format!("unable to tell whether a task in state {state} is active"),
        )),
    }
}

/// Result of polling a firmware task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareTaskStatus {
    pub state: TaskState,
    /// Free text from the BMC, for humans.
    pub status: String,
}

impl FirmwareTaskStatus {
    pub fn new(state: TaskState, status: impl Into<String>) -> Self {
        Self {
            state,
            status: status.into(),
        }
    }
}
