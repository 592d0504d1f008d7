//! Management API.
//!
//! [`ManagementApi`] routes requests to handlers over a shared [`Device`].
//! It is transport independent: [`server::PortalServer`] feeds it requests
//! from `tiny_http`, and tests call [`ManagementApi::handle`] directly.
//!
//! | Route                   | Method | Auth |
//! |-------------------------|--------|------|
//! | `/api/status.json`      | GET    | no   |
//! | `/api/files.json`       | GET    | yes  |
//! | `/view?path=`           | GET    | no   |
//! | `/delete`               | POST   | yes  |
//! | `/upload`               | POST   | yes  |
//! | `/wifi/save`            | POST   | yes  |
//! | `/auth/save`            | POST   | yes  |
//! | anything else           | GET    | no   |
//!
//! Unmatched `GET` paths are served from the file store when a file of that
//! name exists. The `/auth.cfg` and `/network.cfg` records are never served
//! on the public routes.

pub mod multipart;
pub mod server;

use crate::auth::AUTH_CONFIG_PATH;
use crate::config::{NetworkMode, NetworkUpdate, NETWORK_CONFIG_PATH};
use crate::device::Device;
use crate::storage::{
    content_type_for, file_name, normalize_path, FileEntry, StorageError, UploadSession,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::{debug, info, warn};
use multipart::{boundary_from_content_type, MultipartError, MultipartReader};
use serde::Serialize;
use std::collections::HashMap;
use std::io::Read;
use std::net::Ipv4Addr;
use std::sync::Arc;

pub use tiny_http::Method;

/// Realm sent with 401 responses.
pub const AUTH_REALM: &str = "device-portal";

/// Largest accepted urlencoded form body.
const MAX_FORM_BYTES: u64 = 8192;

/// Records holding credentials. Never served on the public routes.
const PRIVATE_RECORDS: &[&str] = &[AUTH_CONFIG_PATH, NETWORK_CONFIG_PATH];

/// Incoming request.
pub struct ApiRequest<'a> {
    pub method: Method,
    /// Path without the query string.
    pub path: String,
    /// Raw query string, without the `?`.
    pub query: String,
    pub content_type: Option<String>,
    /// Raw `Authorization` header.
    pub authorization: Option<String>,
    pub body: Box<dyn Read + 'a>,
}

impl<'a> ApiRequest<'a> {
    /// Request for `url` (path plus optional query) with an empty body.
    pub fn new(method: Method, url: &str) -> Self {
        let (path, query) = url.split_once('?').unwrap_or((url, ""));
        Self {
            method,
            path: path.to_string(),
            query: query.to_string(),
            content_type: None,
            authorization: None,
            body: Box::new(std::io::empty()),
        }
    }

    /// Attach a body.
    pub fn with_body(mut self, content_type: &str, body: impl Read + 'a) -> Self {
        self.content_type = Some(content_type.to_string());
        self.body = Box::new(body);
        self
    }

    /// Attach HTTP Basic credentials.
    pub fn with_basic_auth(mut self, user: &str, pass: &str) -> Self {
        let token = BASE64.encode(format!("{}:{}", user, pass));
        self.authorization = Some(format!("Basic {}", token));
        self
    }
}

/// Response body.
pub enum Body {
    Empty,
    Bytes(Vec<u8>),
    /// Streamed from the file store; length unknown.
    Stream(Box<dyn Read + Send>),
}

/// Outgoing response.
pub struct ApiResponse {
    pub status: u16,
    pub headers: Vec<(&'static str, String)>,
    pub body: Body,
}

impl ApiResponse {
    fn new(status: u16, body: Body) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body,
        }
    }

    fn with_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    /// Plain-text response.
    pub fn text(status: u16, message: &str) -> Self {
        Self::new(status, Body::Bytes(message.as_bytes().to_vec()))
            .with_header("Content-Type", "text/plain; charset=utf-8")
    }

    /// JSON response.
    pub fn json<T: Serialize>(value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(bytes) => Self::new(200, Body::Bytes(bytes))
                .with_header("Content-Type", "application/json"),
            Err(e) => {
                warn!("JSON encoding failed: {}", e);
                Self::text(500, "Internal error")
            }
        }
    }

    /// `302 Found` to `location`.
    pub fn redirect(location: &str) -> Self {
        Self::new(302, Body::Empty).with_header("Location", location)
    }

    /// File contents.
    pub fn stream(content_type: &str, reader: Box<dyn Read + Send>) -> Self {
        Self::new(200, Body::Stream(reader)).with_header("Content-Type", content_type)
    }

    fn unauthorized() -> Self {
        Self::text(401, "Authentication required").with_header(
            "WWW-Authenticate",
            format!("Basic realm=\"{}\"", AUTH_REALM),
        )
    }

    fn method_not_allowed(allow: &str) -> Self {
        Self::text(405, "Method Not Allowed").with_header("Allow", allow)
    }

    /// First header named `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Decode an `Authorization: Basic` header into user and password.
pub fn parse_basic_auth(header: &str) -> Option<(String, String)> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = BASE64.decode(token.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

/// Decode urlencoded pairs. Later duplicates win.
fn parse_form(input: &[u8], into: &mut HashMap<String, String>) {
    for (key, value) in url::form_urlencoded::parse(input) {
        into.insert(key.into_owned(), value.into_owned());
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusBody<'a> {
    mode: NetworkMode,
    ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    ssid: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ap_ssid: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rssi: Option<i8>,
    mdns_name: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FilesBody {
    files: Vec<FileEntry>,
    used_bytes: u64,
}

/// Request router and handlers.
#[derive(Clone)]
pub struct ManagementApi {
    device: Arc<Device>,
}

impl ManagementApi {
    pub fn new(device: Arc<Device>) -> Self {
        Self { device }
    }

    /// Handle one request.
    pub async fn handle(&self, req: ApiRequest<'_>) -> ApiResponse {
        debug!("{} {}", req.method, req.path);
        let method = req.method.clone();
        let path = req.path.clone();

        let protected = matches!(
            (&method, path.as_str()),
            (Method::Get, "/api/files.json")
                | (Method::Post, "/delete" | "/upload" | "/wifi/save" | "/auth/save")
        );
        if protected && !self.authorized(&req).await {
            info!("Unauthorized {} {}", method, path);
            return ApiResponse::unauthorized();
        }

        match (&method, path.as_str()) {
            (Method::Get, "/api/status.json") => self.status().await,
            (Method::Get, "/api/files.json") => self.list_files(),
            (Method::Get, "/view") => self.view(&req),
            (Method::Post, "/delete") => self.delete(req),
            (Method::Post, "/upload") => self.upload(req).await,
            (Method::Post, "/wifi/save") => self.save_network(req).await,
            (Method::Post, "/auth/save") => self.save_auth(req).await,
            (_, "/api/status.json" | "/api/files.json" | "/view") => {
                ApiResponse::method_not_allowed("GET")
            }
            (_, "/delete" | "/upload" | "/wifi/save" | "/auth/save") => {
                ApiResponse::method_not_allowed("POST")
            }
            (Method::Get, _) => self.serve_static(&path),
            _ => ApiResponse::method_not_allowed("GET"),
        }
    }

    async fn authorized(&self, req: &ApiRequest<'_>) -> bool {
        match req.authorization.as_deref().and_then(parse_basic_auth) {
            Some((user, pass)) => self.device.authorize(&user, &pass).await,
            None => false,
        }
    }

    async fn status(&self) -> ApiResponse {
        let status = self.device.status().await;
        let net = &status.network;
        let body = StatusBody {
            mode: net.mode,
            ip: net.ip.unwrap_or(Ipv4Addr::UNSPECIFIED).to_string(),
            ssid: net.ssid.as_deref(),
            ap_ssid: net.ap_ssid.as_deref(),
            rssi: net.rssi,
            mdns_name: &status.mdns_name,
        };
        ApiResponse::json(&body)
    }

    fn list_files(&self) -> ApiResponse {
        let listing = match self.device.files().list() {
            Ok(listing) => listing,
            Err(e) => {
                warn!("Listing failed: {}", e);
                return ApiResponse::text(500, "Storage unavailable");
            }
        };
        let files: Vec<FileEntry> = listing.collect();
        let used_bytes = files.iter().map(|f| f.size_bytes).sum();
        ApiResponse::json(&FilesBody { files, used_bytes })
    }

    fn view(&self, req: &ApiRequest<'_>) -> ApiResponse {
        let mut params = HashMap::new();
        parse_form(req.query.as_bytes(), &mut params);
        let path = params.get("path").map(|p| p.trim()).unwrap_or("");
        if path.is_empty() {
            return ApiResponse::text(404, "File not found");
        }
        self.send_file(&normalize_path(path))
    }

    fn serve_static(&self, path: &str) -> ApiResponse {
        let path = if path == "/" { "/index.html" } else { path };
        self.send_file(path)
    }

    fn send_file(&self, path: &str) -> ApiResponse {
        if PRIVATE_RECORDS.contains(&path) {
            info!("Refused public read of {}", path);
            return ApiResponse::text(404, "File not found");
        }
        match self.device.files().read(path) {
            Ok(reader) => ApiResponse::stream(content_type_for(path), reader),
            Err(StorageError::NotFound(_) | StorageError::InvalidPath(_)) => {
                ApiResponse::text(404, "File not found")
            }
            Err(e) => {
                warn!("Read failed: {}", e);
                ApiResponse::text(500, "Could not read file")
            }
        }
    }

    /// Query parameters merged with a urlencoded body.
    fn read_form(req: &mut ApiRequest<'_>) -> Result<HashMap<String, String>, ApiResponse> {
        let mut fields = HashMap::new();
        parse_form(req.query.as_bytes(), &mut fields);

        let mut body = Vec::new();
        (&mut req.body)
            .take(MAX_FORM_BYTES + 1)
            .read_to_end(&mut body)
            .map_err(|e| {
                warn!("Form read failed: {}", e);
                ApiResponse::text(400, "Could not read request body")
            })?;
        if body.len() as u64 > MAX_FORM_BYTES {
            return Err(ApiResponse::text(413, "Form too large"));
        }
        parse_form(&body, &mut fields);
        Ok(fields)
    }

    fn delete(&self, mut req: ApiRequest<'_>) -> ApiResponse {
        let fields = match Self::read_form(&mut req) {
            Ok(fields) => fields,
            Err(response) => return response,
        };
        let path = fields.get("path").map(String::as_str).unwrap_or("");
        if path.trim().is_empty() {
            return ApiResponse::text(400, "Missing path");
        }
        match self.device.files().delete(path) {
            Ok(_) => ApiResponse::redirect("/"),
            Err(StorageError::NotFound(p)) => {
                debug!("Delete miss: {}", p);
                ApiResponse::text(404, "File not found")
            }
            Err(StorageError::InvalidPath(_)) => ApiResponse::text(400, "Invalid path"),
            Err(e) => {
                warn!("Delete failed: {}", e);
                ApiResponse::text(500, "Delete failed")
            }
        }
    }

    async fn upload(&self, req: ApiRequest<'_>) -> ApiResponse {
        let Some(boundary) = req
            .content_type
            .as_deref()
            .and_then(boundary_from_content_type)
        else {
            return ApiResponse::text(400, "Expected a multipart/form-data upload");
        };

        let _guard = self.device.lock_uploads().await;
        match store_uploads(self.device.files(), req.body, &boundary) {
            Ok(0) => ApiResponse::text(400, "No file in upload"),
            Ok(count) => {
                debug!("Stored {} uploaded file(s)", count);
                ApiResponse::redirect("/")
            }
            Err(MultipartError::Storage(StorageError::InvalidPath(name))) => {
                warn!("Upload rejected, bad file name {:?}", name);
                ApiResponse::text(400, "Invalid file name")
            }
            Err(e) => {
                warn!("Upload failed: {}", e);
                ApiResponse::text(500, "Upload failed")
            }
        }
    }

    async fn save_network(&self, mut req: ApiRequest<'_>) -> ApiResponse {
        let fields = match Self::read_form(&mut req) {
            Ok(fields) => fields,
            Err(response) => return response,
        };
        let field = |name: &str| fields.get(name).map(String::as_str).unwrap_or("");
        let update = NetworkUpdate::from_fields(
            field("mode"),
            field("ssid"),
            field("pass"),
            field("apSsid"),
            field("apPass"),
        );
        let report = match self.device.apply_network(&update).await {
            Ok(report) => report,
            Err(e) => return ApiResponse::text(400, &e.to_string()),
        };
        info!(
            "Network settings applied: mode={}, success={}",
            report.outcome.mode, report.outcome.success
        );
        match report.persisted {
            Ok(()) => ApiResponse::redirect("/"),
            Err(_) => ApiResponse::text(500, "Network settings applied but could not be saved"),
        }
    }

    async fn save_auth(&self, mut req: ApiRequest<'_>) -> ApiResponse {
        let fields = match Self::read_form(&mut req) {
            Ok(fields) => fields,
            Err(response) => return response,
        };
        let user = fields.get("user").map(|s| s.trim()).unwrap_or("");
        let pass = fields.get("pass").map(|s| s.trim()).unwrap_or("");
        match self.device.change_credentials(user, pass).await {
            Ok(report) if report.persisted.is_ok() => ApiResponse::redirect("/"),
            Ok(_) => ApiResponse::text(500, "Credentials changed but could not be saved"),
            Err(e) => ApiResponse::text(400, &e.to_string()),
        }
    }
}

/// Target path for a client-supplied upload name: directories are dropped
/// and the leading separator added.
pub fn upload_target(filename: &str) -> Result<String, StorageError> {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or("").trim();
    let path = normalize_path(name);
    file_name(&path)?;
    Ok(path)
}

/// Stream every file part of a multipart body into the store.
///
/// Returns the number of files stored. A failed part is discarded; parts
/// stored before it are kept.
fn store_uploads<R: Read>(
    files: &Arc<dyn crate::storage::FileStore>,
    body: R,
    boundary: &str,
) -> Result<usize, MultipartError> {
    let mut parts = MultipartReader::new(body, boundary);
    let mut stored = 0;
    while let Some(part) = parts.next_part()? {
        let Some(filename) = part.filename.filter(|f| !f.trim().is_empty()) else {
            continue;
        };
        let path = upload_target(&filename)?;
        let mut session = UploadSession::begin(files.clone(), &path)?;
        parts.copy_body(|chunk| session.append(chunk))?;
        session.finish()?;
        stored += 1;
    }
    Ok(stored)
}

#[cfg(test)]
impl ApiResponse {
    /// Drain the body into a string.
    pub fn body_text(self) -> String {
        let mut out = Vec::new();
        match self.body {
            Body::Empty => {}
            Body::Bytes(bytes) => out = bytes,
            Body::Stream(mut reader) => {
                reader.read_to_end(&mut out).unwrap();
            }
        }
        String::from_utf8_lossy(&out).into_owned()
    }
}
