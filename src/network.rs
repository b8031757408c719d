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

use bytes::Bytes;
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_LENGTH, CONTENT_TYPE},
    Certificate, Client as HttpClient, ClientBuilder as HttpClientBuilder, Method,
    RequestBuilder, StatusCode,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

pub use crate::BmcError;

pub const REDFISH_ENDPOINT: &str = "redfish/v1";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// Setting this to `1`/`true` in the environment turns on full request and
/// response dumping for transports built with
/// [`HttpTransportBuilder::dump_payloads_from_env`].
pub const DEBUG_DUMP_ENV: &str = "LIBBMC_DEBUG_DUMP";

const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

pub struct HttpTransportBuilder {
    timeout: Duration,
    accept_invalid_certs: bool,
    root_certificates: Vec<Certificate>,
    dump_payloads: bool,
}

impl HttpTransportBuilder {
    /// Prevents the client from accepting self signed certificates
    /// and other invalid certificates.
    ///
    /// By default self signed certificates will be accepted, since BMCs usually
    /// use those.
    pub fn reject_invalid_certs(mut self) -> HttpTransportBuilder {
        self.accept_invalid_certs = false;
        self
    }

    /// Trusts `cert` as a root and turns certificate validation on.
    pub fn add_root_certificate(mut self, cert: Certificate) -> HttpTransportBuilder {
        self.root_certificates.push(cert);
        self.accept_invalid_certs = false;
        self
    }

    /// Overwrites the timeout that will be applied to every request
    pub fn timeout(mut self, timeout: Duration) -> HttpTransportBuilder {
        self.timeout = timeout;
        self
    }

    /// Logs complete request and response bodies at debug level.
    pub fn dump_payloads(mut self, enabled: bool) -> HttpTransportBuilder {
        self.dump_payloads = enabled;
        self
    }

    pub fn dump_payloads_from_env(mut self) -> HttpTransportBuilder {
        self.dump_payloads = env_flag(DEBUG_DUMP_ENV);
        self
    }

    pub fn build(&self) -> Result<HttpTransport, BmcError> {
        let mut builder = HttpClientBuilder::new()
            .cookie_store(true)
            .danger_accept_invalid_certs(self.accept_invalid_certs)
            .timeout(self.timeout);
        for cert in &self.root_certificates {
            builder = builder.add_root_certificate(cert.clone());
        }
        let http_client = builder.build().map_err(|e| BmcError::GenericError {
            error: format!("Failed to build HTTP client: {e}"),
        })?;

        Ok(HttpTransport {
            http_client,
            timeout: self.timeout,
            dump_payloads: self.dump_payloads,
        })
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

/// The endpoint that a client connects to
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Hostname or IP address of BMC. `https://` is assumed unless the
    /// host carries an explicit `http://` or `https://` prefix.
    pub host: String,
    /// BMC port. If absent the scheme's default port will be used
    pub port: Option<u16>,
    /// BMC username
    pub user: Option<String>,
    /// BMC password
    pub password: Option<String>,
}

impl Endpoint {
    pub fn url(&self, path: &str) -> String {
        request_url(&self.host, self.port, path)
    }
}

/// Scheme, host and port of a BMC, without a trailing slash. The port is
/// left out when it is the scheme's default.
pub fn base_url(host: &str, port: Option<u16>) -> String {
    let host = host.trim_end_matches('/');
    let (scheme, bare) = if let Some(h) = host.strip_prefix("https://") {
        ("https", h)
    } else if let Some(h) = host.strip_prefix("http://") {
        ("http", h)
    } else {
        ("https", host)
    };
    match (scheme, port) {
        ("https", Some(443)) | ("http", Some(80)) | (_, None) => format!("{scheme}://{bare}"),
        (_, Some(p)) => format!("{scheme}://{bare}:{p}"),
    }
}

pub fn request_url(host: &str, port: Option<u16>, path: &str) -> String {
    format!("{}/{}", base_url(host, port), path.trim_start_matches('/'))
}

/// A response with its body fully read, whatever the status code.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status_code: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn json<T: DeserializeOwned>(&self, url: &str) -> Result<T, BmcError> {
        if self.body.is_empty() {
            return Err(BmcError::NoContent);
        }
        serde_json::from_slice(&self.body).map_err(|e| BmcError::JsonDeserializeError {
            url: url.to_string(),
            body: self.text(),
            source: e,
        })
    }
}

/// HTTP client shared by every protocol client talking to one BMC. Clones
/// share the connection pool and the cookie jar.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http_client: HttpClient,
    timeout: Duration,
    dump_payloads: bool,
}

impl HttpTransport {
    pub fn builder() -> HttpTransportBuilder {
        HttpTransportBuilder {
            timeout: DEFAULT_TIMEOUT,
            // BMCs often have a self-signed cert, so usually this has to be true
            accept_invalid_certs: true,
            root_certificates: Vec::new(),
            dump_payloads: false,
        }
    }

    pub fn http_client(&self) -> &HttpClient {
        &self.http_client
    }

    /// Timeout applied to requests that do not override it.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn dumps_payloads(&self) -> bool {
        self.dump_payloads
    }

    // All the HTTP requests happen from here.
    pub(crate) async fn execute(
        &self,
        request: RequestBuilder,
        method: &Method,
        url: &str,
        payload: Option<&str>,
    ) -> Result<HttpResponse, BmcError> {
        debug!("TX {method} {url}");
        if self.dump_payloads {
            debug!("TX {method} {url} payload: {}", payload.unwrap_or_default());
        }

        let response = request.send().await.map_err(|e| BmcError::NetworkError {
            url: url.to_string(),
            source: e,
        })?;
        let status_code = response.status();
        let headers = response.headers().clone();
        // read the body even if not status 2XX, because BMCs give useful error messages there
        let body = response.bytes().await.map_err(|e| BmcError::NetworkError {
            url: url.to_string(),
            source: e,
        })?;

        debug!("RX {status_code} {url}");
        if self.dump_payloads {
            debug!(
                "RX {status_code} {url} headers: {headers:?} body: {}",
                String::from_utf8_lossy(&body)
            );
        }
        Ok(HttpResponse {
            status_code,
            headers,
            body,
        })
    }
}

/// How a Redfish request authenticates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Auth {
    Anonymous,
    Basic,
    Token(String),
}

/// A HTTP client which targets the Redfish service of a single endpoint
#[derive(Debug, Clone)]
pub struct RedfishHttpClient {
    endpoint: Endpoint,
    transport: HttpTransport,
    auth: Auth,
}

impl RedfishHttpClient {
    pub fn new(transport: HttpTransport, endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            transport,
            auth: Auth::Anonymous,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn transport(&self) -> &HttpTransport {
        &self.transport
    }

    pub(crate) fn set_auth(&mut self, auth: Auth) {
        self.auth = auth;
    }

    /// `api` is either relative to the service root (`Systems/1`) or an
    /// absolute resource path (`/redfish/v1/Systems/1`).
    pub fn url(&self, api: &str) -> String {
        if api.starts_with('/') {
            self.endpoint.url(api)
        } else {
            self.endpoint.url(&format!("{REDFISH_ENDPOINT}/{api}"))
        }
    }

    pub async fn get<T>(&self, api: &str) -> Result<(StatusCode, T), BmcError>
    where
        T: DeserializeOwned,
    {
        let (url, response) = self
            .req(Method::GET, api, HeaderMap::new(), None, None, None)
            .await?;
        Ok((response.status_code, response.json(&url)?))
    }

    pub async fn post<B>(
        &self,
        api: &str,
        data: &B,
        headers: HeaderMap,
    ) -> Result<HttpResponse, BmcError>
    where
        B: Serialize + ::std::fmt::Debug,
    {
        let url = self.url(api);
        let body_enc = serde_json::to_string(data).map_err(|e| BmcError::JsonSerializeError {
            url,
            object_debug: format!("{data:?}"),
            source: e,
        })?;
        let mut headers = headers;
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let (_, response) = self
            .req(
                Method::POST,
                api,
                headers,
                Some(reqwest::Body::from(body_enc.clone())),
                Some(&body_enc),
                None,
            )
            .await?;
        Ok(response)
    }

    pub async fn delete(&self, api: &str) -> Result<StatusCode, BmcError> {
        let (_, response) = self
            .req(Method::DELETE, api, HeaderMap::new(), None, None, None)
            .await?;
        Ok(response.status_code)
    }

    /// POSTs a body of known length, typically streamed from disk, with a
    /// per-request timeout.
    pub async fn post_stream(
        &self,
        api: &str,
        body: reqwest::Body,
        content_type: &str,
        content_length: u64,
        timeout: Duration,
    ) -> Result<HttpResponse, BmcError> {
        let mut headers = HeaderMap::new();
        let content_type =
            HeaderValue::from_str(content_type).map_err(|e| BmcError::GenericError {
                error: format!("Invalid content type {content_type}: {e}"),
            })?;
        headers.insert(CONTENT_TYPE, content_type);
        headers.insert(CONTENT_LENGTH, HeaderValue::from(content_length));
        let payload = format!("<{content_length} bytes streamed>");
        let (_, response) = self
            .req(
                Method::POST,
                api,
                headers,
                Some(body),
                Some(&payload),
                Some(timeout),
            )
            .await?;
        Ok(response)
    }

    async fn req(
        &self,
        method: Method,
        api: &str,
        headers: HeaderMap,
        body: Option<reqwest::Body>,
        payload: Option<&str>,
        override_timeout: Option<Duration>,
    ) -> Result<(String, HttpResponse), BmcError> {
        let url = self.url(api);

        let mut req_b = self
            .transport
            .http_client
            .request(method.clone(), &url)
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .headers(headers);
        match &self.auth {
            Auth::Anonymous => {}
            Auth::Basic => {
                if let Some(user) = &self.endpoint.user {
                    req_b = req_b.basic_auth(user, self.endpoint.password.as_ref());
                }
            }
            Auth::Token(token) => {
                let value = HeaderValue::from_str(token).map_err(|e| BmcError::GenericError {
                    error: format!("Invalid session token: {e}"),
                })?;
                req_b = req_b.header(HeaderName::from_static("x-auth-token"), value);
            }
        }
        if let Some(t) = override_timeout {
            req_b = req_b.timeout(t);
        }
        if let Some(b) = body {
            req_b = req_b.body(b);
        }

        let response = self
            .transport
            .execute(req_b, &method, &url, payload)
            .await?;
        if !response.status_code.is_success() {
            return Err(BmcError::HTTPErrorCode {
                url,
                status_code: response.status_code,
                response_body: response.text(),
            });
        }
        Ok((url, response))
    }
}

pub(crate) fn auth_token(response: &HttpResponse) -> Option<&str> {
    response.header_str(AUTH_TOKEN_HEADER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_defaults_to_https() {
        assert_eq!(base_url("10.0.0.1", None), "https://10.0.0.1");
        assert_eq!(base_url("10.0.0.1", Some(443)), "https://10.0.0.1");
        assert_eq!(base_url("10.0.0.1", Some(8443)), "https://10.0.0.1:8443");
    }

    #[test]
    fn test_base_url_keeps_explicit_scheme() {
        assert_eq!(base_url("http://127.0.0.1", Some(8080)), "http://127.0.0.1:8080");
        assert_eq!(base_url("http://bmc/", Some(80)), "http://bmc");
        assert_eq!(base_url("https://bmc", None), "https://bmc");
    }

    #[test]
    fn test_redfish_url() {
        let transport = HttpTransport::builder().build().unwrap();
        let client = RedfishHttpClient::new(
            transport,
            Endpoint {
                host: "bmc".to_string(),
                ..Default::default()
            },
        );
        assert_eq!(client.url("Systems"), "https://bmc/redfish/v1/Systems");
        assert_eq!(
            client.url("/redfish/v1/Systems/1"),
            "https://bmc/redfish/v1/Systems/1"
        );
        assert_eq!(client.url(""), "https://bmc/redfish/v1/");
    }

    #[test]
    fn test_response_json_empty_body() {
        let response = HttpResponse {
            status_code: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        };
        let res: Result<serde_json::Value, _> = response.json("https://bmc");
        assert!(matches!(res, Err(BmcError::NoContent)));
    }
}
