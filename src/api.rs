use std::io::Read;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, UdpSocket};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Result;
use chrono::Local;
use mdns_sd::{ServiceDaemon, ServiceInfo};
use serde::Serialize;
use tiny_http::{Header, Method, Response, Server, StatusCode};

use crate::installer::StatusSink;
use crate::manager::settings::SettingsValues;
use crate::runtime::Event;

pub const MDNS_SERVICE_TYPE: &str = "_extension-manager._tcp.local.";
pub const EXTENSION_ID: &str = "com.theappgineer.extension-manager";
pub const DISPLAY_NAME: &str = "Extension Manager";
pub const PUBLISHER: &str = "The Appgineer";
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_BODY_BYTES: u64 = 64 * 1024;

/// Identity under which this manager registers; suffixed per host so several
/// managers can share one network.
#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub extension_id: String,
    pub display_name: String,
    pub display_version: String,
    pub publisher: String,
}

impl Registration {
    pub fn for_host(hostname: &str) -> Self {
        Self {
            extension_id: format!("{EXTENSION_ID}.{hostname}"),
            display_name: format!("{DISPLAY_NAME} @{hostname}"),
            display_version: env!("CARGO_PKG_VERSION").to_string(),
            publisher: PUBLISHER.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PublishedStatus {
    pub message: String,
    pub is_error: bool,
    pub updated_unix_ms: i64,
}

#[derive(Debug, Default)]
pub struct ApiSharedState {
    status: Option<PublishedStatus>,
    status_updates: u64,
}

impl ApiSharedState {
    pub fn status(&self) -> Option<&PublishedStatus> {
        self.status.as_ref()
    }

    pub fn status_updates(&self) -> u64 {
        self.status_updates
    }
}

/// Status channel backed by the API's shared state.
#[derive(Clone)]
pub struct SharedStatus(pub Arc<Mutex<ApiSharedState>>);

impl StatusSink for SharedStatus {
    fn set_status(&mut self, message: &str, is_error: bool) {
        log::debug!("status: {message}");
        match self.0.lock() {
            Ok(mut guard) => {
                guard.status = Some(PublishedStatus {
                    message: message.to_string(),
                    is_error,
                    updated_unix_ms: Local::now().timestamp_millis(),
                });
                guard.status_updates = guard.status_updates.saturating_add(1);
            }
            Err(_) => log::error!("status state lock poisoned; dropping '{message}'"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    pub bind_addr: String,
    pub port: u16,
    pub mdns_enabled: bool,
    pub mdns_instance: String,
    pub registration: Registration,
}

pub struct ApiServer {
    pub state: Arc<Mutex<ApiSharedState>>,
    stop: Arc<AtomicBool>,
    http_join: Option<JoinHandle<()>>,
    mdns: Option<ServiceDaemon>,
}

impl ApiServer {
    pub fn start(config: ApiServerConfig, events: Sender<Event>) -> Result<Self> {
        let bind = format!("{}:{}", config.bind_addr, config.port);
        let server = Server::http(&bind)
            .map_err(|err| anyhow::anyhow!("failed to start settings API on {bind}: {err}"))?;
        log::info!("settings API listening on {bind}");

        let state = Arc::new(Mutex::new(ApiSharedState::default()));
        let stop = Arc::new(AtomicBool::new(false));
        let state_for_thread = Arc::clone(&state);
        let stop_for_thread = Arc::clone(&stop);
        let registration = config.registration.clone();
        let http_join = thread::spawn(move || {
            run_server_loop(
                server,
                state_for_thread,
                events,
                registration,
                stop_for_thread,
            )
        });

        let mdns = if config.mdns_enabled {
            match start_mdns_advertisement(config.port, &config.mdns_instance, &config.registration)
            {
                Ok(daemon) => Some(daemon),
                Err(err) => {
                    log::warn!("mDNS advertisement disabled: {err}");
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            state,
            stop,
            http_join: Some(http_join),
            mdns,
        })
    }

    pub fn status_sink(&self) -> SharedStatus {
        SharedStatus(Arc::clone(&self.state))
    }
}

impl Drop for ApiServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(join) = self.http_join.take() {
            let _ = join.join();
        }
        if let Some(mdns) = self.mdns.take() {
            let _ = mdns.shutdown();
        }
    }
}

fn run_server_loop(
    server: Server,
    state: Arc<Mutex<ApiSharedState>>,
    events: Sender<Event>,
    registration: Registration,
    stop: Arc<AtomicBool>,
) {
    while !stop.load(Ordering::Relaxed) {
        match server.recv_timeout(Duration::from_millis(200)) {
            Ok(Some(request)) => handle_request(request, &state, &events, &registration),
            Ok(None) => continue,
            Err(err) => log::debug!("settings API receive failed: {err}"),
        }
    }
}

fn start_mdns_advertisement(
    api_port: u16,
    instance_prefix: &str,
    registration: &Registration,
) -> Result<ServiceDaemon> {
    let daemon = ServiceDaemon::new()
        .map_err(|err| anyhow::anyhow!("could not create mDNS daemon: {err}"))?;

    let hostname = detect_hostname();
    let instance = if instance_prefix.trim().is_empty() {
        hostname.clone()
    } else {
        format!("{}-{}", instance_prefix.trim(), hostname)
    };
    let host_name = format!("{hostname}.local.");
    let mut addresses = detect_mdns_addresses();
    if addresses.is_empty() {
        addresses.push(Ipv4Addr::LOCALHOST.into());
    }

    let properties = [
        ("id", registration.extension_id.as_str()),
        ("name", registration.display_name.as_str()),
        ("version", registration.display_version.as_str()),
    ];
    let service = ServiceInfo::new(
        MDNS_SERVICE_TYPE,
        &instance,
        &host_name,
        addresses.as_slice(),
        api_port,
        &properties[..],
    )
    .map_err(|err| anyhow::anyhow!("could not create mDNS service info: {err}"))?;
    daemon
        .register(service)
        .map_err(|err| anyhow::anyhow!("could not register mDNS service: {err}"))?;
    log::info!("advertising {instance} over mDNS");
    Ok(daemon)
}

pub fn detect_hostname() -> String {
    let candidate = std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::env::var("COMPUTERNAME").ok())
        .unwrap_or_else(|| "extension-manager".to_string());
    // Only the first label, as in `host.example.com`.
    let trimmed = candidate.trim().split('.').next().unwrap_or_default();
    if trimmed.is_empty() {
        "extension-manager".to_string()
    } else {
        trimmed
            .chars()
            .map(|ch| {
                if ch.is_ascii_alphanumeric() || ch == '-' {
                    ch.to_ascii_lowercase()
                } else {
                    '-'
                }
            })
            .collect::<String>()
    }
}

fn detect_mdns_addresses() -> Vec<IpAddr> {
    let mut addresses = Vec::<IpAddr>::new();
    if let Ok(socket) = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        && socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80)).is_ok()
        && let Ok(local) = socket.local_addr()
    {
        let ip = local.ip();
        if ip.is_ipv4() && !ip.is_loopback() {
            addresses.push(ip);
        }
    }
    addresses
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum Route {
    Registration,
    GetSettings,
    SaveSettings,
    Status,
    CorePair,
    CoreUnpair,
    Shutdown,
    Health,
    Forbidden(&'static str),
    MethodNotAllowed,
    NotFound,
}

const KNOWN_PATHS: [&str; 7] = [
    "/v1",
    "/v1/settings",
    "/v1/status",
    "/v1/core/pair",
    "/v1/core/unpair",
    "/v1/shutdown",
    "/healthz",
];

fn resolve_route(method: &Method, path: &str, remote_ip: IpAddr) -> Route {
    if !is_local_network_ip(remote_ip) {
        return Route::Forbidden("forbidden: local network only");
    }
    match (method, path) {
        (Method::Get, "/v1") => Route::Registration,
        (Method::Get, "/v1/settings") => Route::GetSettings,
        (Method::Post, "/v1/settings") => Route::SaveSettings,
        (Method::Get, "/v1/status") => Route::Status,
        (Method::Post, "/v1/core/pair") => Route::CorePair,
        (Method::Post, "/v1/core/unpair") => Route::CoreUnpair,
        (Method::Post, "/v1/shutdown") if remote_ip.is_loopback() => Route::Shutdown,
        (Method::Post, "/v1/shutdown") => Route::Forbidden("forbidden: loopback only"),
        (Method::Get, "/healthz") => Route::Health,
        (_, path) if KNOWN_PATHS.contains(&path) => Route::MethodNotAllowed,
        _ => Route::NotFound,
    }
}

fn handle_request(
    mut request: tiny_http::Request,
    state: &Arc<Mutex<ApiSharedState>>,
    events: &Sender<Event>,
    registration: &Registration,
) {
    let Some(remote_ip) = request.remote_addr().map(|addr| addr.ip()) else {
        let _ = send_text(request, StatusCode(400), "missing remote address");
        return;
    };

    let url = request.url().to_string();
    let (path, query) = split_path_query(&url);
    let method = request.method().clone();
    log::debug!("{method} {path}");

    match resolve_route(&method, path, remote_ip) {
        Route::Registration => {
            let _ = send_json(request, StatusCode(200), registration);
        }
        Route::GetSettings => {
            let (reply_tx, reply_rx) = mpsc::channel();
            if events.send(Event::GetSettings { reply: reply_tx }).is_err() {
                let _ = send_text(request, StatusCode(503), "manager is shutting down");
                return;
            }
            match reply_rx.recv_timeout(REPLY_TIMEOUT) {
                Ok(layout) => {
                    let _ = send_json(request, StatusCode(200), &layout);
                }
                Err(_) => {
                    let _ = send_text(request, StatusCode(503), "manager did not respond");
                }
            }
        }
        Route::SaveSettings => {
            let values = match read_settings_values(&mut request) {
                Ok(values) => values,
                Err(err) => {
                    let _ = send_text(request, StatusCode(400), &format!("{err:#}"));
                    return;
                }
            };
            let dry_run = is_truthy(query_param(query, "dry_run"));
            let (reply_tx, reply_rx) = mpsc::channel();
            let event = Event::SaveSettings {
                values,
                dry_run,
                reply: reply_tx,
            };
            if events.send(event).is_err() {
                let _ = send_text(request, StatusCode(503), "manager is shutting down");
                return;
            }
            match reply_rx.recv_timeout(REPLY_TIMEOUT) {
                Ok(response) => {
                    let _ = send_json(request, StatusCode(200), &response);
                }
                Err(_) => {
                    let _ = send_text(request, StatusCode(503), "manager did not respond");
                }
            }
        }
        Route::Status => {
            #[derive(Serialize)]
            struct StatusResponse {
                status: Option<PublishedStatus>,
                updates: u64,
            }

            let payload = match state.lock() {
                Ok(guard) => StatusResponse {
                    status: guard.status().cloned(),
                    updates: guard.status_updates(),
                },
                Err(_) => {
                    let _ = send_text(request, StatusCode(500), "internal state lock error");
                    return;
                }
            };
            let _ = send_json(request, StatusCode(200), &payload);
        }
        Route::CorePair => forward_notification(request, events, Event::CorePaired),
        Route::CoreUnpair => forward_notification(request, events, Event::CoreUnpaired),
        Route::Shutdown => forward_notification(request, events, Event::Shutdown),
        Route::Health => {
            let _ = send_text(request, StatusCode(200), "ok");
        }
        Route::Forbidden(reason) => {
            let _ = send_text(request, StatusCode(403), reason);
        }
        Route::MethodNotAllowed => {
            let _ = send_text(request, StatusCode(405), "method not allowed");
        }
        Route::NotFound => {
            let _ = send_text(request, StatusCode(404), "not found");
        }
    }
}

fn forward_notification(request: tiny_http::Request, events: &Sender<Event>, event: Event) {
    if events.send(event).is_err() {
        let _ = send_text(request, StatusCode(503), "manager is shutting down");
        return;
    }
    let _ = send_text(request, StatusCode(202), "accepted");
}

fn read_settings_values(request: &mut tiny_http::Request) -> Result<SettingsValues> {
    let mut body = String::new();
    request
        .as_reader()
        .take(MAX_BODY_BYTES)
        .read_to_string(&mut body)?;
    parse_settings_body(&body)
}

fn parse_settings_body(body: &str) -> Result<SettingsValues> {
    serde_json::from_str::<SettingsValues>(body).map_err(|err| {
        let line = err.line();
        let column = err.column();
        anyhow::anyhow!("invalid JSON at line {line}, column {column}: {err}")
    })
}

fn send_json<T: Serialize>(
    request: tiny_http::Request,
    status: StatusCode,
    body: &T,
) -> Result<()> {
    let payload = serde_json::to_vec(body)?;
    let content_type = Header::from_str("Content-Type: application/json; charset=utf-8")
        .map_err(|_| anyhow::anyhow!("failed to build content-type header"))?;
    request.respond(
        Response::from_data(payload)
            .with_status_code(status)
            .with_header(content_type),
    )?;
    Ok(())
}

fn send_text(request: tiny_http::Request, status: StatusCode, body: &str) -> Result<()> {
    let content_type = Header::from_str("Content-Type: text/plain; charset=utf-8")
        .map_err(|_| anyhow::anyhow!("failed to build content-type header"))?;
    request.respond(
        Response::from_string(body.to_string())
            .with_status_code(status)
            .with_header(content_type),
    )?;
    Ok(())
}

fn split_path_query(url: &str) -> (&str, &str) {
    match url.split_once('?') {
        Some((path, query)) => (path, query),
        None => (url, ""),
    }
}

fn query_param<'a>(query: &'a str, key: &str) -> Option<&'a str> {
    for pair in query.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (k, v) = match pair.split_once('=') {
            Some((k, v)) => (k, v),
            None => (pair, ""),
        };
        if k == key {
            return Some(v);
        }
    }
    None
}

/// A bare `?dry_run` counts as set.
fn is_truthy(value: Option<&str>) -> bool {
    match value {
        Some(v) => v.is_empty() || v == "1" || v.eq_ignore_ascii_case("true"),
        None => false,
    }
}

fn is_local_network_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local(),
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unique_local()
                || v6.is_unicast_link_local()
                || is_ipv4_mapped_local(v6)
        }
    }
}

fn is_ipv4_mapped_local(v6: Ipv6Addr) -> bool {
    match v6.to_ipv4_mapped() {
        Some(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local(),
        None => false,
    }
}
