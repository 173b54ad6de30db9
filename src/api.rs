use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Result;
use chrono::Local;
use serde::Serialize;
use tiny_http::{Header, Method, Response, Server, StatusCode};

/// Read-only view of the running watch, refreshed by the main loop after
/// each engine event.
#[derive(Debug, Clone, Serialize, Default)]
pub struct RuntimeSnapshot {
    pub iso_local: String,
    pub watched_reminders: usize,
    pub fires_today: usize,
    pub next_due: Option<String>,
    pub updated_unix_ms: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReminderView {
    pub id: String,
    pub label: String,
    pub kind: String,
    pub times_of_day: Vec<String>,
    pub is_active: bool,
}

#[derive(Debug, Default)]
pub struct ApiSharedState {
    pub runtime: RuntimeSnapshot,
    pub reminders: Vec<ReminderView>,
}

#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    pub bind_addr: String,
    pub port: u16,
}

/// Status API on a background thread. Serves local-network requests only;
/// the daemon is patient-facing and its schedule should not leave the LAN.
pub struct ApiServer {
    pub state: Arc<Mutex<ApiSharedState>>,
    stop: Arc<AtomicBool>,
    http_join: Option<JoinHandle<()>>,
}

impl ApiServer {
    pub fn start(config: ApiServerConfig) -> Result<Self> {
        let bind = format!("{}:{}", config.bind_addr, config.port);
        let server = Server::http(&bind)
            .map_err(|err| anyhow::anyhow!("failed to start API server on {bind}: {err}"))?;
        let state = Arc::new(Mutex::new(ApiSharedState::default()));
        let stop = Arc::new(AtomicBool::new(false));
        let state_for_thread = Arc::clone(&state);
        let stop_for_thread = Arc::clone(&stop);
        let http_join =
            thread::spawn(move || run_server_loop(server, state_for_thread, stop_for_thread));

        Ok(Self {
            state,
            stop,
            http_join: Some(http_join),
        })
    }
}

impl Drop for ApiServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(join) = self.http_join.take() {
            let _ = join.join();
        }
    }
}

fn run_server_loop(server: Server, state: Arc<Mutex<ApiSharedState>>, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::Relaxed) {
        match server.recv_timeout(Duration::from_millis(200)) {
            Ok(Some(request)) => handle_request(request, &state),
            Ok(None) => continue,
            Err(_) => continue,
        }
    }
}

fn handle_request(request: tiny_http::Request, state: &Arc<Mutex<ApiSharedState>>) {
    if request.method() != &Method::Get {
        let _ = send_text(request, StatusCode(405), "method not allowed");
        return;
    }

    let Some(remote_addr) = request.remote_addr() else {
        let _ = send_text(request, StatusCode(400), "missing remote address");
        return;
    };
    if !is_local_network_ip(remote_addr.ip()) {
        let _ = send_text(request, StatusCode(403), "forbidden: local network only");
        return;
    }

    let url = request.url().to_string();
    let path = url.split('?').next().unwrap_or("");
    match path {
        "/status" => {
            let snapshot = {
                let guard = state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                guard.runtime.clone()
            };
            let _ = send_json(request, &snapshot);
        }
        "/reminders" => {
            let reminders = {
                let guard = state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                guard.reminders.clone()
            };
            let _ = send_json(request, &reminders);
        }
        _ => {
            let _ = send_text(request, StatusCode(404), "not found");
        }
    }
}

fn send_json<T: Serialize>(request: tiny_http::Request, payload: &T) -> Result<()> {
    let body = serde_json::to_string(payload)?;
    let header = Header::from_bytes("Content-Type", "application/json")
        .map_err(|_| anyhow::anyhow!("invalid content-type header"))?;
    request.respond(Response::from_string(body).with_header(header))?;
    Ok(())
}

fn send_text(request: tiny_http::Request, status: StatusCode, body: &str) -> Result<()> {
    request.respond(Response::from_string(body).with_status_code(status))?;
    Ok(())
}

fn is_local_network_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local(),
        IpAddr::V6(v6) => v6.is_loopback(),
    }
}

/// Stamps the shared snapshot with the current wall clock.
pub fn refresh_snapshot(
    state: &Arc<Mutex<ApiSharedState>>,
    watched_reminders: usize,
    fires_today: usize,
    next_due: Option<String>,
) {
    let now = Local::now();
    let mut guard = state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    guard.runtime = RuntimeSnapshot {
        iso_local: now.format("%Y-%m-%dT%H:%M:%S").to_string(),
        watched_reminders,
        fires_today,
        next_due,
        updated_unix_ms: now.timestamp_millis(),
    };
}
