//! HTTP listener for the management API.
//!
//! Uses `tiny_http`, which works on both host and ESP32 (via std::net). The
//! listener runs on its own thread with a single-threaded tokio runtime, and
//! handles one request at a time.

use super::{ApiRequest, ApiResponse, Body, ManagementApi};
use log::{error, info, warn};
use std::io::{self, Cursor, Read};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tiny_http::{Header, Request, Response, Server, StatusCode};

/// How often the listener checks the shutdown flag.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Stack for the listener thread. Upload parsing and the runtime fit well
/// within this on ESP32.
const SERVER_STACK_SIZE: usize = 16 * 1024;

/// Running HTTP listener. Drop it to stop the server.
pub struct PortalServer {
    handle: Option<thread::JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl PortalServer {
    /// Start serving `api`.
    ///
    /// # Arguments
    ///
    /// * `bind_addr` - IP address to bind to (use `None` for 0.0.0.0)
    /// * `port` - Port to listen on
    pub fn start(bind_addr: Option<IpAddr>, port: u16, api: ManagementApi) -> io::Result<Self> {
        let addr = match bind_addr {
            Some(ip) => format!("{}:{}", ip, port),
            None => format!("0.0.0.0:{}", port),
        };

        let server = Server::http(&addr)
            .map_err(|e| io::Error::new(io::ErrorKind::AddrInUse, format!("{}", e)))?;

        info!("Management API listening on http://{}/", addr);

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();

        let handle = thread::Builder::new()
            .name("portal-http".into())
            .stack_size(SERVER_STACK_SIZE)
            .spawn(move || Self::run_server(server, api, shutdown_clone))?;

        Ok(Self {
            handle: Some(handle),
            shutdown,
        })
    }

    fn run_server(server: Server, api: ManagementApi, shutdown: Arc<AtomicBool>) {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
        {
            Ok(rt) => rt,
            Err(e) => {
                error!("HTTP runtime failed to start: {}", e);
                return;
            }
        };

        loop {
            // Acquire pairs with the Release store in stop()
            if shutdown.load(Ordering::Acquire) {
                info!("Management API shutting down");
                break;
            }

            match server.recv_timeout(POLL_INTERVAL) {
                Ok(Some(mut request)) => {
                    let response = runtime.block_on(api.handle(to_api_request(&mut request)));
                    if let Err(e) = request.respond(to_http_response(response)) {
                        warn!("Failed to send response: {}", e);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    error!("Server error: {}", e);
                    break;
                }
            }
        }
    }

    /// Stop the server.
    ///
    /// May take up to one poll interval, longer if a request is in flight.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PortalServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn header_value(request: &Request, name: &'static str) -> Option<String> {
    request
        .headers()
        .iter()
        .find(|h| h.field.equiv(name))
        .map(|h| h.value.as_str().to_string())
}

fn to_api_request(request: &mut Request) -> ApiRequest<'_> {
    let content_type = header_value(request, "Content-Type");
    let authorization = header_value(request, "Authorization");
    let method = request.method().clone();
    let url = request.url().to_string();

    let mut api_request = ApiRequest::new(method, &url);
    api_request.authorization = authorization;
    match content_type {
        Some(ct) => api_request.with_body(&ct, request.as_reader()),
        None => {
            api_request.body = Box::new(request.as_reader());
            api_request
        }
    }
}

fn to_http_response(response: ApiResponse) -> Response<Box<dyn Read + Send>> {
    let headers: Vec<Header> = response
        .headers
        .iter()
        .filter_map(|(name, value)| Header::from_bytes(name.as_bytes(), value.as_bytes()).ok())
        .collect();

    let (data, length): (Box<dyn Read + Send>, Option<usize>) = match response.body {
        Body::Empty => (Box::new(io::empty()), Some(0)),
        Body::Bytes(bytes) => {
            let len = bytes.len();
            (Box::new(Cursor::new(bytes)), Some(len))
        }
        Body::Stream(reader) => (reader, None),
    };

    Response::new(StatusCode(response.status), headers, data, length, None)
}
