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
/// Tests against an in-process mock BMC that speaks enough Redfish and
/// Supermicro cgi to walk the login, detection, power and firmware flows.
/// The mock records what it was sent so tests can check the wire side too.
use std::{
    io::Write,
    sync::{Arc, Mutex, Once},
    time::Duration,
};

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use libbmc::{
    supermicro::{Client, Family, Generation, ServiceClient},
    BmcError, Endpoint, FirmwareInstallStep, PowerState, RedfishClient, TaskState,
    UpdateParameters,
};
use serde_json::{json, Value};
use tokio::time::Instant;

const TOKEN: &str = "f3a6c2b1";
const CSRF: &str = "KpX2Qd9vRrB4hJZs";
const LOGIN_OK: &str = "<html><head><META HTTP-EQUIV=\"refresh\" \
    CONTENT=\"0;URL=../cgi/url_redirect.cgi?url_name=mainmenu\"></head></html>";
const LOGIN_PAGE: &str = "<!DOCTYPE html><html><head><title>Login</title></head></html>";

static SETUP: Once = Once::new();

fn init_logging() {
    SETUP.call_once(|| {
        use tracing_subscriber::fmt::Layer;
        use tracing_subscriber::prelude::*;
        use tracing_subscriber::{filter::LevelFilter, EnvFilter};
        let _ = tracing_subscriber::registry()
            .with(
                EnvFilter::builder()
                    .with_default_directive(LevelFilter::INFO.into())
                    .from_env_lossy()
                    .add_directive("hyper=warn".parse().unwrap())
                    .add_directive("reqwest=warn".parse().unwrap()),
            )
            .with(
                Layer::default()
                    .compact()
                    .with_test_writer()
                    .with_ansi(false),
            )
            .try_init();
    });
}

#[derive(Debug)]
struct Mock {
    model: String,
    power_state: String,
    session_valid: bool,
    legacy_api: bool,
    csrf_page: bool,
    expired_web_session: bool,
    progress: (i64, i64),
    trigger_delay: Duration,
    misc_res: &'static str,
    lock_res: &'static str,
    bios_check_res: &'static str,
    power_cycle_pending: bool,
    already_in_update_mode: bool,
    start_updates: usize,
    tasks: Vec<Value>,
    failed_resets: Vec<&'static str>,
    resets: Vec<String>,
    uploads: Vec<(HeaderMap, Bytes)>,
    ipmi_ops: Vec<String>,
    ipmi_csrf: Vec<Option<String>>,
    logged_out: bool,
}

impl Default for Mock {
    fn default() -> Self {
        Self {
            model: "X12DPG-QT6".to_string(),
            power_state: "On".to_string(),
            session_valid: true,
            legacy_api: false,
            csrf_page: true,
            expired_web_session: false,
            progress: (0, 0),
            trigger_delay: Duration::ZERO,
            misc_res: "-1",
            lock_res: "1",
            bios_check_res: "0",
            power_cycle_pending: true,
            already_in_update_mode: false,
            start_updates: 0,
            tasks: Vec::new(),
            failed_resets: Vec::new(),
            resets: Vec::new(),
            uploads: Vec::new(),
            ipmi_ops: Vec::new(),
            ipmi_csrf: Vec::new(),
            logged_out: false,
        }
    }
}

type Shared = Arc<Mutex<Mock>>;

async fn service_root() -> Json<Value> {
    Json(json!({
        "@odata.id": "/redfish/v1/",
        "@odata.type": "#ServiceRoot.v1_11_0.ServiceRoot",
        "Id": "RootService",
        "RedfishVersion": "1.11.0",
        "Vendor": "Supermicro",
        "Systems": {"@odata.id": "/redfish/v1/Systems"},
        "Managers": {"@odata.id": "/redfish/v1/Managers"},
        "UpdateService": {"@odata.id": "/redfish/v1/UpdateService"},
        "Tasks": {"@odata.id": "/redfish/v1/TaskService"}
    }))
}

async fn create_session(Json(body): Json<Value>) -> Response {
    if body["UserName"] != "admin" || body["Password"] != "password" {
        return (StatusCode::UNAUTHORIZED, "invalid credentials").into_response();
    }
    (
        StatusCode::CREATED,
        [
            ("X-Auth-Token", TOKEN),
            ("Location", "/redfish/v1/SessionService/Sessions/1"),
        ],
        Json(json!({"@odata.id": "/redfish/v1/SessionService/Sessions/1", "Id": "1"})),
    )
        .into_response()
}

fn authorized(state: &Shared, headers: &HeaderMap) -> bool {
    let token_ok = headers
        .get("x-auth-token")
        .is_some_and(|v| v.as_bytes() == TOKEN.as_bytes());
    token_ok && state.lock().unwrap().session_valid
}

async fn get_session(State(state): State<Shared>, headers: HeaderMap) -> Response {
    if !authorized(&state, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(json!({"@odata.id": "/redfish/v1/SessionService/Sessions/1", "Id": "1"})).into_response()
}

async fn delete_session(State(state): State<Shared>, headers: HeaderMap) -> StatusCode {
    if !authorized(&state, &headers) {
        return StatusCode::UNAUTHORIZED;
    }
    state.lock().unwrap().session_valid = false;
    StatusCode::NO_CONTENT
}

fn collection(path: &str, members: &[String]) -> Json<Value> {
    let members: Vec<Value> = members.iter().map(|m| json!({"@odata.id": m})).collect();
    Json(json!({
        "@odata.id": path,
        "Name": "Collection",
        "Members@odata.count": members.len(),
        "Members": members
    }))
}

async fn systems() -> Json<Value> {
    collection("/redfish/v1/Systems", &["/redfish/v1/Systems/1".to_string()])
}

async fn system(State(state): State<Shared>) -> Json<Value> {
    let mock = state.lock().unwrap();
    Json(json!({
        "@odata.id": "/redfish/v1/Systems/1",
        "@odata.etag": "\"c4b2e0\"",
        "Id": "1",
        "Name": "System",
        "Manufacturer": "Supermicro",
        "Model": mock.model,
        "PowerState": mock.power_state,
        "BiosVersion": "1.4",
        "Actions": {
            "#ComputerSystem.Reset": {
                "target": "/redfish/v1/Systems/1/Actions/ComputerSystem.Reset"
            }
        }
    }))
}

async fn system_reset(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    let mut mock = state.lock().unwrap();
    let reset_type = body["ResetType"].as_str().unwrap_or_default().to_string();
    mock.resets.push(reset_type.clone());
    if mock.failed_resets.iter().any(|r| *r == reset_type) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": {
                "code": "Base.v1_10_3.GeneralError",
                "message": format!("ResetType {reset_type} is not allowed")
            }})),
        )
            .into_response();
    }
    match reset_type.as_str() {
        "On" | "PowerCycle" => mock.power_state = "On".to_string(),
        "ForceOff" | "GracefulShutdown" => mock.power_state = "Off".to_string(),
        _ => {}
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn update_service() -> Json<Value> {
    Json(json!({
        "@odata.id": "/redfish/v1/UpdateService",
        "ServiceEnabled": true,
        "MultipartHttpPushUri": "/redfish/v1/UpdateService/upload",
        "Actions": {
            "#UpdateService.StartUpdate": {
                "target": "/redfish/v1/UpdateService/Actions/UpdateService.StartUpdate"
            }
        }
    }))
}

async fn upload(State(state): State<Shared>, headers: HeaderMap, body: Bytes) -> Response {
    state.lock().unwrap().uploads.push((headers, body));
    (
        StatusCode::ACCEPTED,
        [("Location", "/redfish/v1/TaskService/Tasks/7")],
        Json(json!({
            "@odata.id": "/redfish/v1/TaskService/Tasks/7",
            "@odata.type": "#Task.v1_4_3.Task",
            "Id": "7",
            "TaskState": "Running"
        })),
    )
        .into_response()
}

async fn start_update(State(state): State<Shared>) -> Response {
    let mut mock = state.lock().unwrap();
    mock.start_updates += 1;
    if mock.already_in_update_mode {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": {
                "code": "Base.v1_10_3.GeneralError",
                "message": "A general error has occurred.",
                "@Message.ExtendedInfo": [{
                    "MessageId": "SMC.1.0.OemFirmwareAlreadyInUpdateMode",
                    "Message": "The firmware is already in update mode."
                }]
            }})),
        )
            .into_response();
    }
    mock.tasks.push(json!({
        "@odata.id": "/redfish/v1/TaskService/Tasks/8",
        "Id": "8",
        "Name": "BIOS Update",
        "TaskState": "Running",
        "TaskStatus": "OK"
    }));
    (
        StatusCode::ACCEPTED,
        [("Location", "/redfish/v1/TaskService/Tasks/8")],
        Json(json!({"@odata.id": "/redfish/v1/TaskService/Tasks/8", "Id": "8"})),
    )
        .into_response()
}

async fn tasks(State(state): State<Shared>) -> Json<Value> {
    let members: Vec<String> = state
        .lock()
        .unwrap()
        .tasks
        .iter()
        .map(|t| format!("/redfish/v1/TaskService/Tasks/{}", t["Id"].as_str().unwrap()))
        .collect();
    collection("/redfish/v1/TaskService/Tasks", &members)
}

async fn task(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    let mock = state.lock().unwrap();
    match mock.tasks.iter().find(|t| t["Id"] == id.as_str()) {
        Some(t) => Json(t.clone()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn login(body: String) -> Response {
    // base64 of admin / password
    if body.contains("name=YWRtaW4=") && body.contains("pwd=cGFzc3dvcmQ=") {
        LOGIN_OK.into_response()
    } else {
        LOGIN_PAGE.into_response()
    }
}

async fn token_page(State(state): State<Shared>) -> Response {
    if state.lock().unwrap().csrf_page {
        format!(
            "<html><head><script>\nvar lang = \"en\";\n\
             SmcCsrfInsert (\"CSRF_TOKEN\", \"{CSRF}\");\n</script></head></html>"
        )
        .into_response()
    } else {
        "<html><head></head></html>".into_response()
    }
}

async fn logout(State(state): State<Shared>) -> StatusCode {
    state.lock().unwrap().logged_out = true;
    StatusCode::OK
}

fn form_value<'a>(body: &'a str, key: &str) -> &'a str {
    body.split('&')
        .find_map(|kv| kv.strip_prefix(key).and_then(|v| v.strip_prefix('=')))
        .unwrap_or_default()
}

async fn ipmi(State(state): State<Shared>, headers: HeaderMap, body: String) -> Response {
    let mut mock = state.lock().unwrap();
    if !mock.legacy_api {
        return StatusCode::NOT_FOUND.into_response();
    }
    let op = form_value(&body, "op").trim_end_matches(".XML").to_string();
    let r = form_value(&body, "r").to_string();
    mock.ipmi_ops.push(format!("{op} {r}"));
    mock.ipmi_csrf.push(
        headers
            .get("csrf-token")
            .map(|v| v.to_str().unwrap().to_string()),
    );
    let reply = match (op.as_str(), r.as_str()) {
        ("FRU_INFO", _) => format!(
            "<FRU_INFO RES=\"1\"><DEVICE ID=\"0\"/>\
             <CHASSIS TYPE=\"1\" PART_NUM=\"CSE-813MF2TQC-505CBP\" SERIAL_NUM=\"C8130LK\"/>\
             <BOARD LAN=\"0\" MFG_DATE=\"2020/06/05\" PROD_NAME=\"\" SERIAL_NUM=\"ZM20AS0\" \
             PART_NUM=\"{}\" MFC_NAME=\"Supermicro\"/></FRU_INFO>",
            mock.model
        ),
        ("LOCK_UPLOAD_FW", _) => format!("<LOCK_FW_UPLOAD RES=\"{}\"/>", mock.lock_res),
        ("UPLOAD_FW_VERSION", _) => "<FW_VERSION NEW=\"01.73.12\" OLD=\"01.71.11\"/>".to_string(),
        ("BIOS_UPDATE_CHECK", _) => format!("<CHECK RES=\"{}\"/>", mock.bios_check_res),
        ("COMPONENT_UPDATE_MISC", "(1,0)") => format!(
            "<COMPONENT_UPDATE_MISC RES=\"{}\"/>",
            if mock.power_cycle_pending { 1 } else { 0 }
        ),
        ("COMPONENT_UPDATE_MISC", "(0,0)") => {
            format!("<COMPONENT_UPDATE_MISC RES=\"{}\"/>", mock.misc_res)
        }
        (op, _) => format!("<{op} RES=\"1\"/>"),
    };
    format!("<?xml version=\"1.0\"?>\n<IPMI>{reply}</IPMI>").into_response()
}

async fn upgrade_process(State(state): State<Shared>) -> Response {
    let mock = state.lock().unwrap();
    if mock.expired_web_session {
        return LOGIN_PAGE.into_response();
    }
    let (status, percent) = mock.progress;
    format!("<?xml version=\"1.0\"?>\n<IPMI><status>{status}</status><percent>{percent}</percent></IPMI>")
        .into_response()
}

async fn legacy_upload(State(state): State<Shared>, headers: HeaderMap, body: Bytes) -> StatusCode {
    state.lock().unwrap().uploads.push((headers, body));
    StatusCode::OK
}

async fn op(State(state): State<Shared>, body: String) -> Response {
    let delay = {
        let mut mock = state.lock().unwrap();
        mock.ipmi_ops.push(form_value(&body, "op").to_string());
        mock.trigger_delay
    };
    tokio::time::sleep(delay).await;
    StatusCode::OK.into_response()
}

async fn start(mock: Mock) -> (Endpoint, Shared) {
    init_logging();
    let state = Arc::new(Mutex::new(mock));
    let app = Router::new()
        .route("/redfish/v1", get(service_root))
        .route("/redfish/v1/", get(service_root))
        .route("/redfish/v1/SessionService/Sessions", post(create_session))
        .route(
            "/redfish/v1/SessionService/Sessions/1",
            get(get_session).delete(delete_session),
        )
        .route("/redfish/v1/Systems", get(systems))
        .route("/redfish/v1/Systems/1", get(system))
        .route(
            "/redfish/v1/Systems/1/Actions/ComputerSystem.Reset",
            post(system_reset),
        )
        .route("/redfish/v1/UpdateService", get(update_service))
        .route("/redfish/v1/UpdateService/upload", post(upload))
        .route(
            "/redfish/v1/UpdateService/Actions/UpdateService.StartUpdate",
            post(start_update),
        )
        .route("/redfish/v1/TaskService/Tasks", get(tasks))
        .route("/redfish/v1/TaskService/Tasks/{id}", get(task))
        .route("/cgi/login.cgi", post(login))
        .route("/cgi/url_redirect.cgi", get(token_page))
        .route("/cgi/logout.cgi", get(logout))
        .route("/cgi/ipmi.cgi", post(ipmi))
        .route("/cgi/upgrade_process.cgi", post(upgrade_process))
        .route("/cgi/oem_firmware_upload.cgi", post(legacy_upload))
        .route("/cgi/bios_upload.cgi", post(legacy_upload))
        .route("/cgi/op.cgi", post(op))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    let endpoint = Endpoint {
        host: "http://127.0.0.1".to_string(),
        port: Some(port),
        user: Some("admin".to_string()),
        password: Some("password".to_string()),
    };
    (endpoint, state)
}

fn firmware_image(len: usize) -> tempfile::NamedTempFile {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    f.write_all(&data).unwrap();
    f.flush().unwrap();
    f
}

fn far_deadline() -> Instant {
    Instant::now() + Duration::from_secs(600)
}

async fn redfish(endpoint: Endpoint) -> RedfishClient {
    let mut client = RedfishClient::builder(endpoint).build().unwrap();
    client.open().await.unwrap();
    client
}

#[tokio::test]
async fn test_redfish_session_open_close() -> Result<(), anyhow::Error> {
    let (endpoint, state) = start(Mock::default()).await;
    let mut client = redfish(endpoint).await;
    assert!(client.session_active().await?);
    assert_eq!(
        client.service_root().and_then(|r| r.vendor.as_deref()),
        Some("Supermicro")
    );
    assert_eq!(client.system_power_status().await?, PowerState::On);

    client.close().await?;
    assert!(!state.lock().unwrap().session_valid);
    assert!(client.session_active().await.unwrap_err().is_not_authenticated());
    Ok(())
}

#[tokio::test]
async fn test_redfish_bad_password() {
    let (mut endpoint, _) = start(Mock::default()).await;
    endpoint.password = Some("hunter2".to_string());
    let mut client = RedfishClient::builder(endpoint).build().unwrap();
    assert!(matches!(
        client.open().await,
        Err(BmcError::LoginFailed(_))
    ));
}

#[tokio::test]
async fn test_redfish_session_revoked() {
    let (endpoint, state) = start(Mock::default()).await;
    let client = redfish(endpoint).await;
    state.lock().unwrap().session_valid = false;
    let err = client.systems().await.unwrap_err();
    assert!(err.is_not_authenticated(), "{err}");
}

#[tokio::test]
async fn test_power_cycle_from_off() -> Result<(), anyhow::Error> {
    let (endpoint, state) = start(Mock {
        power_state: "Off".to_string(),
        ..Default::default()
    })
    .await;
    let client = redfish(endpoint).await;
    assert!(matches!(
        client.power_set("cycle").await,
        Err(BmcError::PowerCycleFromOff(_))
    ));
    assert!(state.lock().unwrap().resets.is_empty());

    client.power_set("on").await?;
    assert_eq!(client.system_power_status().await?, PowerState::On);
    assert_eq!(state.lock().unwrap().resets, vec!["On".to_string()]);

    assert!(matches!(
        client.power_set("sideways").await,
        Err(BmcError::InvalidPowerAction(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_multipart_upload_task_from_location() -> Result<(), anyhow::Error> {
    let (endpoint, state) = start(Mock::default()).await;
    let client = redfish(endpoint).await;
    let image = firmware_image(200 * 1024);
    let params = UpdateParameters {
        targets: vec!["/redfish/v1/Managers/1".to_string()],
        ..Default::default()
    };

    let id = client
        .firmware_upload(image.path(), &params, far_deadline())
        .await?;
    assert_eq!(id, "7");

    let mock = state.lock().unwrap();
    let (headers, body) = &mock.uploads[0];
    let content_length: usize = headers[header::CONTENT_LENGTH].to_str()?.parse()?;
    assert_eq!(content_length, body.len());
    assert!(headers[header::CONTENT_TYPE]
        .to_str()?
        .starts_with("multipart/form-data; boundary="));
    let text = String::from_utf8_lossy(body);
    assert!(text.contains("name=\"UpdateParameters\""));
    assert!(text.contains("{\"Targets\":[\"/redfish/v1/Managers/1\"]}"));
    assert!(text.contains("name=\"UpdateFile\""));
    Ok(())
}

#[tokio::test]
async fn test_system_reset_falls_back_to_force_off() -> Result<(), anyhow::Error> {
    let (endpoint, state) = start(Mock {
        failed_resets: vec!["PowerCycle"],
        ..Default::default()
    })
    .await;
    let client = redfish(endpoint).await;
    client.power_set("reset").await?;
    assert_eq!(state.lock().unwrap().resets, vec!["PowerCycle", "ForceOff", "On"]);
    assert_eq!(client.system_power_status().await?, PowerState::On);
    Ok(())
}

#[tokio::test]
async fn test_system_reset_power_on_failure() {
    let (endpoint, state) = start(Mock {
        failed_resets: vec!["PowerCycle", "On"],
        ..Default::default()
    })
    .await;
    let client = redfish(endpoint).await;
    let err = client.system_reset().await.unwrap_err();
    match err {
        BmcError::HTTPErrorCode { response_body, .. } => {
            assert!(response_body.contains("ResetType On"), "{response_body}")
        }
        e => panic!("unexpected error {e}"),
    }
    assert_eq!(state.lock().unwrap().resets, vec!["PowerCycle", "ForceOff", "On"]);
}

#[tokio::test]
async fn test_system_reset_force_off_failure() {
    let (endpoint, state) = start(Mock {
        failed_resets: vec!["PowerCycle", "ForceOff"],
        ..Default::default()
    })
    .await;
    let client = redfish(endpoint).await;
    let err = client.system_reset().await.unwrap_err();
    match err {
        BmcError::HTTPErrorCode { response_body, .. } => {
            assert!(response_body.contains("ResetType ForceOff"), "{response_body}")
        }
        e => panic!("unexpected error {e}"),
    }
    // never powered back on after a failed force off
    assert_eq!(state.lock().unwrap().resets, vec!["PowerCycle", "ForceOff"]);
}

async fn legacy_client(endpoint: Endpoint) -> ServiceClient {
    ServiceClient::builder(endpoint)
        .install_trigger_timeout(Duration::from_millis(200))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_legacy_login_scrapes_csrf() -> Result<(), anyhow::Error> {
    let (endpoint, state) = start(Mock {
        legacy_api: true,
        ..Default::default()
    })
    .await;
    let mut sc = legacy_client(endpoint).await;
    sc.open().await?;
    assert_eq!(sc.csrf_token(), CSRF);
    sc.ipmi_query("FRU_INFO", "(0,0)").await?;
    assert_eq!(
        state.lock().unwrap().ipmi_csrf.last().cloned().flatten().as_deref(),
        Some(CSRF)
    );

    sc.close().await?;
    let mock = state.lock().unwrap();
    assert!(mock.logged_out);
    assert!(!mock.session_valid);
    Ok(())
}

#[tokio::test]
async fn test_legacy_login_without_csrf() -> Result<(), anyhow::Error> {
    let (endpoint, _) = start(Mock {
        csrf_page: false,
        ..Default::default()
    })
    .await;
    let mut sc = legacy_client(endpoint).await;
    sc.open().await?;
    assert_eq!(sc.csrf_token(), "");
    Ok(())
}

#[tokio::test]
async fn test_legacy_login_failed() {
    let (mut endpoint, _) = start(Mock::default()).await;
    endpoint.password = Some("wrong".to_string());
    let mut sc = legacy_client(endpoint).await;
    assert!(matches!(sc.open().await, Err(BmcError::LoginFailed(_))));
}

#[tokio::test]
async fn test_detect_x11() -> Result<(), anyhow::Error> {
    let (endpoint, _) = start(Mock {
        legacy_api: true,
        model: "X11SCM-F".to_string(),
        ..Default::default()
    })
    .await;
    let client = Client::open(legacy_client(endpoint).await).await?;
    assert!(matches!(client.generation(), Generation::X11(_)));
    assert_eq!(client.device_model(), "X11SCM-F");
    assert_eq!(
        client.firmware_install_steps("bmc")?,
        vec![
            FirmwareInstallStep::Upload,
            FirmwareInstallStep::InstallUploaded,
            FirmwareInstallStep::InstallStatus
        ]
    );
    assert!(matches!(
        client.firmware_install_steps("cpld"),
        Err(BmcError::NotSupported(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_detect_redfish_generation() -> Result<(), anyhow::Error> {
    let (endpoint, _) = start(Mock::default()).await;
    let client = Client::open(legacy_client(endpoint).await).await?;
    assert_eq!(client.generation().family(), Family::X12);
    assert_eq!(client.device_model(), "X12DPG-QT6");
    Ok(())
}

#[tokio::test]
async fn test_detect_unsupported_model_logs_out() {
    let (endpoint, state) = start(Mock {
        model: "H12SSL-i".to_string(),
        ..Default::default()
    })
    .await;
    let r = Client::open(legacy_client(endpoint).await).await;
    assert!(matches!(r, Err(BmcError::ModelUnsupported(_))));
    assert!(state.lock().unwrap().logged_out);
}

#[tokio::test]
async fn test_active_bmc_task_blocks_upload() {
    let (endpoint, state) = start(Mock {
        tasks: vec![json!({
            "@odata.id": "/redfish/v1/TaskService/Tasks/3",
            "Id": "3",
            "Name": "BMC Update",
            "TaskState": "Running",
            "TaskStatus": "OK"
        })],
        ..Default::default()
    })
    .await;
    let client = Client::open(legacy_client(endpoint).await).await.unwrap();
    let image = firmware_image(4096);
    let err = client
        .firmware_upload("BMC", image.path(), far_deadline())
        .await
        .unwrap_err();
    match err {
        BmcError::FirmwareTaskActive(info) => assert!(info.contains("id: 3"), "{info}"),
        e => panic!("unexpected error {e}"),
    }
    assert!(state.lock().unwrap().uploads.is_empty());
}

#[tokio::test]
async fn test_redfish_generation_upload_and_install() -> Result<(), anyhow::Error> {
    let (endpoint, state) = start(Mock {
        model: "X13DEM".to_string(),
        tasks: vec![json!({
            "@odata.id": "/redfish/v1/TaskService/Tasks/7",
            "Id": "7",
            "Name": "BIOS Verify",
            "TaskState": "Completed",
            "TaskStatus": "OK"
        })],
        ..Default::default()
    })
    .await;
    let client = Client::open(legacy_client(endpoint).await).await?;
    assert_eq!(client.generation().family(), Family::X13);

    // a finished task with the same name does not block
    let image = firmware_image(4096);
    let id = client
        .firmware_upload("bios", image.path(), far_deadline())
        .await?;
    assert_eq!(id, "7");
    {
        let mock = state.lock().unwrap();
        let text = String::from_utf8_lossy(&mock.uploads[0].1);
        assert!(text.contains("\"@Redfish.OperationApplyTime\":\"OnStartUpdateRequest\""));
        assert!(text.contains("\"BackupBIOS\":false"));
    }

    let status = client.firmware_task_status("bios", &id).await?;
    assert_eq!(status.state, TaskState::Complete);
    Ok(())
}

#[tokio::test]
async fn test_redfish_generation_short_deadline() {
    let (endpoint, state) = start(Mock::default()).await;
    let client = Client::open(legacy_client(endpoint).await).await.unwrap();
    let image = firmware_image(16);
    let r = client
        .firmware_upload("bmc", image.path(), Instant::now() + Duration::from_secs(60))
        .await;
    assert!(matches!(r, Err(BmcError::DeadlineInsufficient { .. })));
    assert!(state.lock().unwrap().uploads.is_empty());
}

#[tokio::test]
async fn test_scheduled_bmc_task_blocks_upload() {
    let (endpoint, state) = start(Mock {
        tasks: vec![json!({
            "@odata.id": "/redfish/v1/TaskService/Tasks/5",
            "Id": "5",
            "Name": "BMC Update",
            "TaskState": "Scheduled",
            "TaskStatus": "OK"
        })],
        ..Default::default()
    })
    .await;
    let client = Client::open(legacy_client(endpoint).await).await.unwrap();
    let image = firmware_image(4096);
    let err = client
        .firmware_upload("bmc", image.path(), far_deadline())
        .await
        .unwrap_err();
    match err {
        BmcError::HostPowerCycleRequired(info) => assert!(info.contains("id: 5"), "{info}"),
        e => panic!("unexpected error {e}"),
    }
    assert!(state.lock().unwrap().uploads.is_empty());
}

fn verify_task(state: &str, status: &str) -> Value {
    json!({
        "@odata.id": "/redfish/v1/TaskService/Tasks/7",
        "Id": "7",
        "Name": "BIOS Verify",
        "TaskState": state,
        "TaskStatus": status
    })
}

#[tokio::test]
async fn test_x12_install_uploaded_starts_update() -> Result<(), anyhow::Error> {
    let (endpoint, state) = start(Mock {
        tasks: vec![verify_task("Completed", "OK")],
        ..Default::default()
    })
    .await;
    let client = Client::open(legacy_client(endpoint).await).await?;
    assert_eq!(client.generation().family(), Family::X12);

    let id = client.firmware_install_uploaded("bios", "7").await?;
    assert_eq!(id, "8");
    assert_eq!(state.lock().unwrap().start_updates, 1);

    let status = client.firmware_task_status("bios", &id).await?;
    assert_eq!(status.state, TaskState::Running);
    Ok(())
}

#[tokio::test]
async fn test_x13_install_uploaded_keeps_upload_task() -> Result<(), anyhow::Error> {
    let (endpoint, state) = start(Mock {
        model: "X13DEM".to_string(),
        tasks: vec![verify_task("Completed", "OK")],
        ..Default::default()
    })
    .await;
    let client = Client::open(legacy_client(endpoint).await).await?;
    assert_eq!(client.generation().family(), Family::X13);

    assert_eq!(client.firmware_install_uploaded("bios", "7").await?, "7");
    assert_eq!(state.lock().unwrap().start_updates, 1);
    Ok(())
}

#[tokio::test]
async fn test_install_uploaded_requires_verified_image() -> Result<(), anyhow::Error> {
    for (task_state, task_status) in [
        ("Exception", "Critical"),
        ("Running", "OK"),
        ("Completed", "Warning"),
    ] {
        let (endpoint, state) = start(Mock {
            tasks: vec![verify_task(task_state, task_status)],
            ..Default::default()
        })
        .await;
        let client = Client::open(legacy_client(endpoint).await).await?;
        let err = client
            .firmware_install_uploaded("bios", "7")
            .await
            .unwrap_err();
        match err {
            BmcError::FirmwareVerifyTask(info) => assert!(info.contains("id: 7"), "{info}"),
            e => panic!("unexpected error for {task_state}/{task_status}: {e}"),
        }
        assert_eq!(state.lock().unwrap().start_updates, 0);
    }
    Ok(())
}

#[tokio::test]
async fn test_install_uploaded_already_in_update_mode() {
    let (endpoint, state) = start(Mock {
        already_in_update_mode: true,
        tasks: vec![verify_task("Completed", "OK")],
        ..Default::default()
    })
    .await;
    let client = Client::open(legacy_client(endpoint).await).await.unwrap();
    let err = client
        .firmware_install_uploaded("bios", "7")
        .await
        .unwrap_err();
    assert!(matches!(err, BmcError::ColdResetRequired(_)), "{err}");
    assert!(err.is_cold_reset_required());
    assert_eq!(state.lock().unwrap().start_updates, 1);
}

async fn x11_client(mock: Mock) -> (Client, Shared) {
    let (endpoint, state) = start(Mock {
        legacy_api: true,
        model: "X11SCM-F".to_string(),
        ..mock
    })
    .await;
    let client = Client::open(legacy_client(endpoint).await).await.unwrap();
    (client, state)
}

#[tokio::test]
async fn test_x11_bmc_upload_and_install() -> Result<(), anyhow::Error> {
    let (client, state) = x11_client(Mock {
        trigger_delay: Duration::from_secs(5),
        ..Default::default()
    })
    .await;
    let image = firmware_image(8192);
    let id = client
        .firmware_upload("BMC", image.path(), far_deadline())
        .await?;
    assert_eq!(id, "");
    {
        let mock = state.lock().unwrap();
        let text = String::from_utf8_lossy(&mock.uploads[0].1);
        assert!(text.contains("name=\"fw_image\""));
        assert!(text.contains(&format!("name=\"CSRF_TOKEN\"\r\n\r\n{CSRF}")));
        assert!(mock.ipmi_ops.contains(&"LOCK_UPLOAD_FW (0,0)".to_string()));
        assert!(mock.ipmi_ops.contains(&"UPLOAD_FW_VERSION (0,0)".to_string()));
    }

    // the BMC never answers the trigger
    let started = Instant::now();
    assert_eq!(client.firmware_install_uploaded("BMC", &id).await?, "");
    assert!(started.elapsed() < Duration::from_secs(4));
    assert!(state
        .lock()
        .unwrap()
        .ipmi_ops
        .contains(&"main_fwupdate".to_string()));
    Ok(())
}

#[tokio::test]
async fn test_x11_bios_upload_and_install() -> Result<(), anyhow::Error> {
    let (client, state) = x11_client(Mock::default()).await;
    state.lock().unwrap().ipmi_ops.clear();
    let image = firmware_image(8192);
    let id = client
        .firmware_upload("bios", image.path(), far_deadline())
        .await?;
    assert_eq!(id, "");
    {
        let mock = state.lock().unwrap();
        assert_eq!(
            mock.ipmi_ops,
            vec![
                "COMPONENT_UPDATE_MISC (0,0)",
                "LOCK_UPLOAD_FW (0,0)",
                "BIOS_UPDATE_START (1,0)",
                "BIOS_UPDATE_CHECK (0,0)",
            ]
        );
        let text = String::from_utf8_lossy(&mock.uploads[0].1);
        assert!(text.contains("name=\"bios_rom\""));
        assert!(text.contains(&format!("name=\"CSRF_TOKEN\"\r\n\r\n{CSRF}")));
    }

    state.lock().unwrap().ipmi_ops.clear();
    assert_eq!(client.firmware_install_uploaded("bios", &id).await?, "");
    assert_eq!(
        state.lock().unwrap().ipmi_ops,
        vec!["BIOS_OPTION (0,0,1)", "main_biosupdate"]
    );
    Ok(())
}

#[tokio::test]
async fn test_x11_bios_upload_update_mode_held() {
    let (client, state) = x11_client(Mock {
        misc_res: "0",
        ..Default::default()
    })
    .await;
    let image = firmware_image(1024);
    let err = client
        .firmware_upload("bios", image.path(), far_deadline())
        .await
        .unwrap_err();
    assert!(matches!(err, BmcError::ColdResetRequired(_)), "{err}");
    let mock = state.lock().unwrap();
    assert!(mock.uploads.is_empty());
    assert!(!mock.ipmi_ops.contains(&"LOCK_UPLOAD_FW (0,0)".to_string()));
}

#[tokio::test]
async fn test_x11_upload_lock_held() {
    let (client, state) = x11_client(Mock {
        lock_res: "0",
        ..Default::default()
    })
    .await;
    let image = firmware_image(1024);
    for component in ["bios", "bmc"] {
        let err = client
            .firmware_upload(component, image.path(), far_deadline())
            .await
            .unwrap_err();
        assert!(matches!(err, BmcError::ColdResetRequired(_)), "{component}: {err}");
    }
    assert!(state.lock().unwrap().uploads.is_empty());
}

#[tokio::test]
async fn test_x11_bios_image_rejected() {
    let (client, state) = x11_client(Mock {
        bios_check_res: "1",
        ..Default::default()
    })
    .await;
    let image = firmware_image(1024);
    let err = client
        .firmware_upload("bios", image.path(), far_deadline())
        .await
        .unwrap_err();
    assert!(matches!(err, BmcError::FirmwareUpload(_)), "{err}");
    assert_eq!(state.lock().unwrap().uploads.len(), 1);
}

#[tokio::test]
async fn test_x11_bmc_status() -> Result<(), anyhow::Error> {
    let (client, state) = x11_client(Mock::default()).await;
    for (percent, expected) in [
        (1, TaskState::Initializing),
        (2, TaskState::Initializing),
        (40, TaskState::Running),
        (100, TaskState::Complete),
        (0, TaskState::Complete),
    ] {
        state.lock().unwrap().progress = (0, percent);
        let status = client.firmware_task_status("bmc", "").await?;
        assert_eq!(status.state, expected, "percent {percent}");
    }
    Ok(())
}

#[tokio::test]
async fn test_x11_bios_status() -> Result<(), anyhow::Error> {
    let (client, state) = x11_client(Mock::default()).await;

    state.lock().unwrap().progress = (8, 30);
    assert_eq!(
        client.firmware_task_status("bios", "").await?.state,
        TaskState::Running
    );

    state.lock().unwrap().progress = (0, 100);
    assert_eq!(
        client.firmware_task_status("bios", "").await?.state,
        TaskState::PowerCycleHost
    );
    {
        let mock = state.lock().unwrap();
        let ops = &mock.ipmi_ops;
        assert!(ops.contains(&"BIOS_UPDATE_DONE (0,0)".to_string()));
        assert!(ops.contains(&"COMPONENT_UPDATE_MISC (1,1)".to_string()));
    }

    // the mock reports a pending power cycle
    state.lock().unwrap().progress = (0, 0);
    assert_eq!(
        client.firmware_task_status("bios", "").await?.state,
        TaskState::PowerCycleHost
    );

    {
        let mut mock = state.lock().unwrap();
        mock.power_cycle_pending = false;
        mock.progress = (0, 0);
    }
    assert_eq!(
        client.firmware_task_status("bios", "").await?.state,
        TaskState::Complete
    );

    // uploaded, never installed
    state.lock().unwrap().progress = (0, 1);
    let err = client.firmware_task_status("bios", "").await.unwrap_err();
    assert!(err.is_cold_reset_required(), "{err}");
    assert_eq!(
        err.task_status().map(|s| s.state),
        Some(TaskState::Failed)
    );

    state.lock().unwrap().progress = (5, 5);
    assert_eq!(
        client.firmware_task_status("bios", "").await?.state,
        TaskState::Unknown
    );
    Ok(())
}

#[tokio::test]
async fn test_x11_status_session_expired() {
    let (client, state) = x11_client(Mock::default()).await;
    state.lock().unwrap().expired_web_session = true;
    assert!(matches!(
        client.firmware_task_status("bmc", "").await,
        Err(BmcError::SessionExpired(_))
    ));
}
