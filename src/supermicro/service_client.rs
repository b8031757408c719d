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
use std::{sync::OnceLock, time::Duration};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use regex::Regex;
use reqwest::{
    header::{HeaderName, HeaderValue, CONTENT_TYPE, REFERER},
    Method, StatusCode,
};
use tracing::{debug, info, warn};

use crate::{
    model::oem::supermicro::IpmiReply,
    multipart::MultipartForm,
    network::{base_url, Endpoint, HttpResponse, HttpTransport},
    redfish::RedfishClient,
    BmcError,
};

const LOGIN: &str = "cgi/login.cgi";
const LOGOUT: &str = "cgi/logout.cgi";
const TOKEN_PAGE: &str = "cgi/url_redirect.cgi?url_name=topmenu";
const IPMI: &str = "cgi/ipmi.cgi";
const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

pub const DEFAULT_INSTALL_TRIGGER_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ServiceClientBuilder {
    endpoint: Endpoint,
    transport: Option<HttpTransport>,
    timeout: Option<Duration>,
    dump_payloads: bool,
    basic_auth: bool,
    install_trigger_timeout: Duration,
}

impl ServiceClientBuilder {
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

    /// Basic auth for the nested Redfish client instead of a session.
    pub fn redfish_basic_auth(mut self) -> Self {
        self.basic_auth = true;
        self
    }

    /// How long to wait on the install trigger, which the BMC never answers.
    pub fn install_trigger_timeout(mut self, timeout: Duration) -> Self {
        self.install_trigger_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<ServiceClient, BmcError> {
        let transport = match self.transport {
            Some(t) => t,
            None => {
                let mut builder = HttpTransport::builder().dump_payloads_from_env();
                if let Some(t) = self.timeout {
                    builder = builder.timeout(t);
                }
                if self.dump_payloads {
                    builder = builder.dump_payloads(true);
                }
                builder.build()?
            }
        };
        let mut redfish =
            RedfishClient::builder(self.endpoint.clone()).transport(transport.clone());
        if self.basic_auth {
            redfish = redfish.basic_auth();
        }
        Ok(ServiceClient {
            endpoint: self.endpoint,
            transport,
            csrf_token: String::new(),
            redfish: redfish.build()?,
            install_trigger_timeout: self.install_trigger_timeout,
        })
    }
}

/// A `cgi/ipmi.cgi` exchange: what was sent and what came back.
#[derive(Debug, Clone)]
pub struct IpmiResponse {
    pub payload: String,
    pub status_code: StatusCode,
    pub body: String,
}

impl IpmiResponse {
    pub fn reply(&self) -> Result<IpmiReply, BmcError> {
        IpmiReply::parse(IPMI, &self.body)
    }

    /// The exchange as an [`BmcError::UnexpectedResponse`].
    pub fn unexpected(&self) -> BmcError {
        BmcError::UnexpectedResponse {
            payload: self.payload.clone(),
            body: self.body.clone(),
            status_code: self.status_code,
        }
    }
}

/// Session with the Supermicro web interface, plus a Redfish session over
/// the same cookie jar.
pub struct ServiceClient {
    endpoint: Endpoint,
    transport: HttpTransport,
    csrf_token: String,
    redfish: RedfishClient,
    install_trigger_timeout: Duration,
}

impl ServiceClient {
    pub fn builder(endpoint: Endpoint) -> ServiceClientBuilder {
        ServiceClientBuilder {
            endpoint,
            transport: None,
            timeout: None,
            dump_payloads: false,
            basic_auth: false,
            install_trigger_timeout: DEFAULT_INSTALL_TRIGGER_TIMEOUT,
        }
    }

    pub fn redfish(&self) -> &RedfishClient {
        &self.redfish
    }

    /// Empty on firmware without CSRF protection.
    pub fn csrf_token(&self) -> &str {
        &self.csrf_token
    }

    pub fn install_trigger_timeout(&self) -> Duration {
        self.install_trigger_timeout
    }

    /// Form login, CSRF token, then the nested Redfish session.
    pub async fn open(&mut self) -> Result<(), BmcError> {
        let user = self.endpoint.user.as_deref().unwrap_or_default();
        let password = self.endpoint.password.as_deref().unwrap_or_default();
        let form = format!(
            "name={}&pwd={}&check=00",
            BASE64.encode(user),
            BASE64.encode(password)
        );
        let response = self
            .query(LOGIN, Method::POST, Some((form, FORM_URLENCODED)), None)
            .await
            .map_err(|e| BmcError::LoginFailed(e.to_string()))?;
        let body = response.text();
        if response.status_code != StatusCode::OK || !login_redirected(&body) {
            return Err(BmcError::LoginFailed(format!(
                "{LOGIN} returned {}: {body}",
                response.status_code
            )));
        }

        let response = self.query(TOKEN_PAGE, Method::GET, None, None).await?;
        self.csrf_token = parse_csrf_token(&response.text()).unwrap_or_default();
        if self.csrf_token.is_empty() {
            debug!("No CSRF token on {TOKEN_PAGE}, continuing without one");
        }

        self.redfish.open().await?;
        info!("Logged in to {}", base_url(&self.endpoint.host, self.endpoint.port));
        Ok(())
    }

    /// Web logout, then the Redfish session. Both are attempted.
    pub async fn close(&mut self) -> Result<(), BmcError> {
        let web = match self.query(LOGOUT, Method::GET, None, None).await {
            Ok(r) if r.status_code == StatusCode::OK => Ok(()),
            Ok(r) => Err(BmcError::LogoutFailed(format!(
                "{LOGOUT} returned {}",
                r.status_code
            ))),
            Err(e) => Err(BmcError::LogoutFailed(e.to_string())),
        };
        self.csrf_token.clear();
        let redfish = self.redfish.close().await;
        if let Err(e) = &redfish {
            warn!("Redfish logout failed: {e}");
        }
        web.and(redfish)
    }

    /// One request to the web interface. The status code is not checked.
    pub async fn query(
        &self,
        path: &str,
        method: Method,
        body: Option<(String, &str)>,
        timeout: Option<Duration>,
    ) -> Result<HttpResponse, BmcError> {
        let url = self.endpoint.url(path);
        let mut req_b = self
            .transport
            .http_client()
            .request(method.clone(), &url);
        req_b = self.with_csrf_headers(req_b)?;
        if let Some(t) = timeout {
            req_b = req_b.timeout(t);
        }
        let payload = match body {
            Some((body, content_type)) => {
                req_b = req_b.header(CONTENT_TYPE, content_type).body(body.clone());
                Some(body)
            }
            None => None,
        };
        self.transport
            .execute(req_b, &method, &url, payload.as_deref())
            .await
    }

    fn with_csrf_headers(
        &self,
        req_b: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder, BmcError> {
        if self.csrf_token.is_empty() {
            return Ok(req_b);
        }
        let token = HeaderValue::from_str(&self.csrf_token).map_err(|e| {
            BmcError::GenericError {
                error: format!("Invalid CSRF token: {e}"),
            }
        })?;
        let referer = HeaderValue::from_str(&base_url(&self.endpoint.host, self.endpoint.port))
            .map_err(|e| BmcError::GenericError {
                error: format!("Invalid referer: {e}"),
            })?;
        Ok(req_b
            .header(HeaderName::from_static("csrf-token"), token)
            .header(REFERER, referer))
    }

    /// POSTs a form-urlencoded body.
    pub async fn post_form(
        &self,
        path: &str,
        form: &str,
        timeout: Option<Duration>,
    ) -> Result<HttpResponse, BmcError> {
        self.query(
            path,
            Method::POST,
            Some((form.to_string(), FORM_URLENCODED)),
            timeout,
        )
        .await
    }

    /// `op=<OP>.XML&r=<r>&_=` to `cgi/ipmi.cgi`. A 404 means the BMC has no
    /// XML API at all.
    pub async fn ipmi_query(&self, op: &str, r: &str) -> Result<IpmiResponse, BmcError> {
        let payload = format!("op={op}.XML&r={r}&_=");
        let response = self.post_form(IPMI, &payload, None).await?;
        let ipmi = IpmiResponse {
            payload,
            status_code: response.status_code,
            body: response.text(),
        };
        match ipmi.status_code {
            StatusCode::OK if looks_like_html(&ipmi.body) => Err(BmcError::SessionExpired(
                format!("{IPMI} answered {op} with a web page"),
            )),
            StatusCode::OK => Ok(ipmi),
            StatusCode::NOT_FOUND => Err(BmcError::LegacyApiUnsupported(format!(
                "{IPMI} not found"
            ))),
            _ => Err(ipmi.unexpected()),
        }
    }

    /// Sends a multipart form, streaming its file parts.
    pub async fn upload_multipart(
        &self,
        path: &str,
        form: MultipartForm,
        timeout: Duration,
    ) -> Result<HttpResponse, BmcError> {
        let url = self.endpoint.url(path);
        let content_type = form.content_type();
        let content_length = form.content_length();
        let (body, _producer) = form.into_body();
        let req_b = self
            .transport
            .http_client()
            .post(&url)
            .header(CONTENT_TYPE, content_type)
            .header(reqwest::header::CONTENT_LENGTH, content_length)
            .timeout(timeout)
            .body(body);
        let req_b = self.with_csrf_headers(req_b)?;
        let payload = format!("<multipart form, {content_length} bytes>");
        self.transport
            .execute(req_b, &Method::POST, &url, Some(&payload))
            .await
    }
}

fn login_redirected(body: &str) -> bool {
    body.contains("url_redirect.cgi?url_name=mainmenu")
        || body.contains("url_redirect.cgi?url_name=topmenu")
}

/// Pulls the token out of inline script such as
/// `SmcCsrfInsert ("CSRF_TOKEN", "abc");`. Both `CSRF_TOKEN` and
/// `CSRF-TOKEN` are used, depending on firmware.
pub fn parse_csrf_token(page: &str) -> Option<String> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = RE
        .get_or_init(|| Regex::new(r#""CSRF[-_]TOKEN"\s*,\s*"([^"]*)""#).ok())
        .as_ref()?;
    re.captures(page)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// The BMC serves its login page instead of data once the web session is gone.
pub fn looks_like_html(body: &str) -> bool {
    let head: String = body.trim_start().chars().take(256).collect();
    let head = head.to_ascii_lowercase();
    head.starts_with("<!doctype html") || head.starts_with("<html") || head.contains("<html")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_csrf_token_underscore() {
        let page = r#"<html><head><script>
            var lang = "en";
            SmcCsrfInsert ("CSRF_TOKEN", "6qPS7T7v0Zp2ZHc5Hk0H7TOGX3XhLKMl0WQWJ5Xqumk");
        </script></head></html>"#;
        assert_eq!(
            parse_csrf_token(page).as_deref(),
            Some("6qPS7T7v0Zp2ZHc5Hk0H7TOGX3XhLKMl0WQWJ5Xqumk")
        );
    }

    #[test]
    fn test_parse_csrf_token_dash() {
        let page = r#"<script>SmcCsrfInsert("CSRF-TOKEN","abc123");</script>"#;
        assert_eq!(parse_csrf_token(page).as_deref(), Some("abc123"));
    }

    #[test]
    fn test_parse_csrf_token_missing() {
        assert_eq!(parse_csrf_token("<html><body>X10</body></html>"), None);
        assert_eq!(parse_csrf_token(r#"("CSRFTOKEN", "nope")"#), None);
    }

    #[test]
    fn test_login_redirected() {
        assert!(login_redirected(
            "<META HTTP-EQUIV=\"refresh\" CONTENT=\"0;URL=../cgi/url_redirect.cgi?url_name=mainmenu\">"
        ));
        assert!(!login_redirected("<html>Invalid user name or password</html>"));
    }

    #[test]
    fn test_looks_like_html() {
        assert!(looks_like_html("\n<!DOCTYPE html><html></html>"));
        assert!(looks_like_html("<HTML><status>0</status></HTML>"));
        assert!(!looks_like_html(
            "<?xml version=\"1.0\"?><IPMI><status>0</status></IPMI>"
        ));
    }
}
