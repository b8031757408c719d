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

// jsonmap.rs
// Helpers for pulling values out of loosely typed JSON replies, which BMCs
// hand back whenever a typed model would be too strict (task handles,
// extended info envelopes).

use crate::BmcError;

// JsonMap is the map view the helpers below read through.
pub trait JsonMap {
    fn get_value(&self, key: &str) -> Option<&serde_json::Value>;

    // iter_values walks every (key, value) pair.
    fn iter_values(&self) -> Box<dyn Iterator<Item = (&String, &serde_json::Value)> + '_>;
}

impl JsonMap for serde_json::Map<String, serde_json::Value> {
    fn get_value(&self, key: &str) -> Option<&serde_json::Value> {
        self.get(key)
    }

    fn iter_values(&self) -> Box<dyn Iterator<Item = (&String, &serde_json::Value)> + '_> {
        Box::new(self.iter())
    }
}

fn missing_key_error(key: &str, url: &str) -> BmcError {
    BmcError::MissingKey {
        key: key.to_string(),
        url: url.to_string(),
    }
}

fn invalid_type_error(key: &str, expected_type: &str, url: &str) -> BmcError {
    BmcError::InvalidKeyType {
        key: key.to_string(),
        expected_type: expected_type.to_string(),
        url: url.to_string(),
    }
}

// get_value retrieves a JSON value from a map, returning MissingKey
// error if the key is not found.
pub fn get_value<'a, M: JsonMap>(
    map: &'a M,
    key: &str,
    url: &str,
) -> Result<&'a serde_json::Value, BmcError> {
    map.get_value(key)
        .ok_or_else(|| missing_key_error(key, url))
}

pub fn get_str<'a, M: JsonMap>(map: &'a M, key: &str, url: &str) -> Result<&'a str, BmcError> {
    get_value(map, key, url)?
        .as_str()
        .ok_or_else(|| invalid_type_error(key, "string", url))
}

// find_strings collects every string found under a key ending in `suffix`,
// at any depth. Arrays and objects below a matching key are walked whole.
pub fn find_strings<'a, M: JsonMap>(map: &'a M, suffix: &str) -> Vec<&'a str> {
    let mut found = Vec::new();
    for (key, value) in map.iter_values() {
        if key.ends_with(suffix) {
            collect_strings(value, &mut found);
        } else if let Some(obj) = value.as_object() {
            found.extend(find_strings(obj, suffix));
        }
    }
    found
}

fn collect_strings<'a>(value: &'a serde_json::Value, out: &mut Vec<&'a str>) {
    match value {
        serde_json::Value::String(s) => out.push(s),
        serde_json::Value::Array(values) => values.iter().for_each(|v| collect_strings(v, out)),
        serde_json::Value::Object(obj) => obj.values().for_each(|v| collect_strings(v, out)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // test_get_str_success tests that get_str correctly extracts a string value.
    #[test]
    fn test_get_str_success() {
        let value = json!({
            "Name": "TestName",
            "Id": "123"
        });
        let map = value.as_object().unwrap();

        let result = get_str(map, "Name", "http://test/url");
        assert_eq!(result.unwrap(), "TestName");
    }

    // test_get_str_missing_key tests that get_str returns MissingKey error when key doesn't exist.
    #[test]
    fn test_get_str_missing_key() {
        let value = json!({
            "Name": "TestName"
        });
        let map = value.as_object().unwrap();

        let result = get_str(map, "Missing", "http://test/url");
        assert!(matches!(result, Err(BmcError::MissingKey { .. })));
    }

    #[test]
    fn test_get_str_wrong_type() {
        let value = json!({
            "Count": 42
        });
        let map = value.as_object().unwrap();

        let result = get_str(map, "Count", "http://test/url");
        assert!(matches!(result, Err(BmcError::InvalidKeyType { .. })));
    }

    #[test]
    fn test_find_strings_nested() {
        let value = json!({
            "Message": "ignored",
            "error": {
                "@Message.ExtendedInfo": [
                    {"Message": "Task created", "MessageArgs": ["/redfish/v1/TaskService/Tasks/3"]}
                ]
            }
        });
        let map = value.as_object().unwrap();

        let found = find_strings(map, "ExtendedInfo");
        assert_eq!(
            found,
            vec!["Task created", "/redfish/v1/TaskService/Tasks/3"]
        );
    }
}
