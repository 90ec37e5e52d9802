//! HTTP surface.
//!
//! Hand-rolled HTTP/1.1 over tokio TCP: request line and headers are read
//! through a `BufReader`, responses are written as pre-formatted byte
//! blocks, sequence bodies go out as chunked transfer encoding. Routes:
//!
//! - `/` and `/favicon.ico` (GET, HEAD)
//! - `/sequence/service-info` (GET, HEAD)
//! - `/sequence/{qid}` (GET, HEAD, OPTIONS)
//! - `/sequence/{qid}/metadata` (GET, HEAD)
//! - `{MOUNTPATH}openapi.json` (GET, HEAD)
//!
//! Pre-stream errors are JSON bodies with a `detail` field. Every response
//! carries an open CORS header. Gzip for large responses is left to a
//! fronting proxy.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use once_cell::sync::Lazy;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info};

use crate::config::SERVICEVERSION;
use crate::digest;
use crate::fhcache::FhCache;
use crate::models::{Alias, Metadata, RefgetServiceInfo, SequenceMetadata};
use crate::region::{self, RegionError};
use crate::store::IndexStore;
use crate::stream::stream_regions;

pub const REFGET_MEDIA_TYPE: &str = "text/vnd.ga4gh.refget.v2.0.0+plain; charset=us-ascii";

const MAX_REQUEST_SIZE: usize = 8192;
const CONNECTION_TIMEOUT_SECS: u64 = 30;
const KEEPALIVE_TIMEOUT_SECS: u64 = 5;

const FAVICON: &[u8] = include_bytes!("../assets/favicon.ico");

const LANDING_HTML: &str = "<html>\n\
    <head>\n\
        <title>Refget server</title>\n\
    </head>\n\
    <body>\n\
        <h1>Refget server</h1>\n\
\n\
        This server offers reference sequence data according to the <b>Refget</b> protocol.\n\
\n\
        <ul>\n\
            <li>\n\
                <a href=\"sequence/service-info\">sequence/service-info</a>\n\
            </li>\n\
        </ul>\n\
    </body>\n\
</html>\n";

static SERVICE_INFO_JSON: Lazy<Vec<u8>> = Lazy::new(|| {
    serde_json::to_vec(&RefgetServiceInfo::current()).expect("static service-info document")
});

static OPENAPI_JSON: Lazy<Vec<u8>> = Lazy::new(|| {
    serde_json::to_vec(&serde_json::json!({
        "openapi": "3.1.0",
        "info": {
            "title": "Refget API server",
            "description": "System for retrieving sequence and metadata concerning a reference sequence object by hash identifiers",
            "version": SERVICEVERSION,
        },
        "paths": {
            "/sequence/service-info": {
                "get": {
                    "summary": "Retrieve a description of the features this API deployment supports",
                    "responses": {"200": {"description": "Service info"}},
                }
            },
            "/sequence/{qid}": {
                "get": {
                    "summary": "Fetch and return sequence data for an identifier",
                    "parameters": [
                        {"name": "qid", "in": "path", "required": true,
                         "description": "MD5, truncated SHA512 or ga4gh identifier",
                         "schema": {"type": "string"}},
                        {"name": "start", "in": "query", "required": false,
                         "schema": {"type": "integer", "minimum": 0}},
                        {"name": "end", "in": "query", "required": false,
                         "schema": {"type": "integer", "minimum": 0}},
                    ],
                    "responses": {
                        "200": {"description": "Sequence data"},
                        "400": {"description": "Bad request"},
                        "404": {"description": "Sequence ID not found"},
                        "416": {"description": "Range not satisfiable"},
                    },
                }
            },
            "/sequence/{qid}/metadata": {
                "get": {
                    "summary": "Return aliases, length and available hash types for a query hash",
                    "parameters": [
                        {"name": "qid", "in": "path", "required": true,
                         "schema": {"type": "string"}},
                    ],
                    "responses": {
                        "200": {"description": "Sequence metadata"},
                        "404": {"description": "Sequence ID not found"},
                    },
                }
            },
        },
    }))
    .expect("static openapi document")
});

pub struct Server {
    store: IndexStore,
    fhcache: Arc<FhCache>,
    seqpath: PathBuf,
    openapi_path: String,
    alias_authority: Option<String>,
}

impl Server {
    pub fn new(
        store: IndexStore,
        fhcache: FhCache,
        seqpath: PathBuf,
        mountpath: &str,
        alias_authority: Option<String>,
    ) -> Self {
        Server {
            store,
            fhcache: Arc::new(fhcache),
            seqpath,
            openapi_path: format!("{}/openapi.json", mountpath.trim_end_matches('/')),
            alias_authority,
        }
    }

    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    pub fn fhcache(&self) -> &FhCache {
        &self.fhcache
    }

    /// Accept loop. Runs until the surrounding task is dropped.
    pub async fn run(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let _ = stream.set_nodelay(true);
                    let server = self.clone();
                    tokio::spawn(async move {
                        server.handle_connection(stream).await;
                    });
                }
                Err(_) => continue,
            }
        }
    }

    /// Close every cached filehandle. Called at shutdown.
    pub fn close_all(&self) {
        self.fhcache.close_all();
    }

    async fn handle_connection(&self, mut stream: TcpStream) {
        // Hard cap on the whole connection, keep-alive reuse included. No
        // single client gets to occupy a task forever.
        let result = timeout(
            Duration::from_secs(CONNECTION_TIMEOUT_SECS),
            self.handle_connection_inner(&mut stream),
        )
        .await;

        if result.is_err() {
            let _ = send_error(
                &mut stream,
                408,
                "Request Timeout",
                "Request timeout",
                false,
                false,
            )
            .await;
        }
    }

    async fn handle_connection_inner(&self, stream: &mut TcpStream) -> io::Result<()> {
        // Reusable line buffers to avoid per-request allocations.
        let mut request_line = String::with_capacity(128);
        let mut header_line = String::with_capacity(128);

        loop {
            let mut reader = BufReader::new(&mut *stream);
            request_line.clear();

            match timeout(
                Duration::from_secs(KEEPALIVE_TIMEOUT_SECS),
                reader.read_line(&mut request_line),
            )
            .await
            {
                Ok(Ok(0)) | Err(_) => break, // Connection closed or idle timeout
                Ok(Err(_)) => break,
                Ok(Ok(size)) if size > MAX_REQUEST_SIZE => {
                    send_error(
                        stream,
                        413,
                        "Request Entity Too Large",
                        "Request too large",
                        false,
                        false,
                    )
                    .await?;
                    break;
                }
                Ok(Ok(_)) => {}
            }

            if request_line.trim().is_empty() {
                continue; // Keep-alive, wait for the next request
            }

            let Some(request) = RequestLine::parse(request_line.trim()) else {
                send_error(stream, 400, "Bad Request", "Malformed request", false, false).await?;
                break;
            };

            let mut headers = RequestHeaders::default();
            loop {
                header_line.clear();
                match reader.read_line(&mut header_line).await {
                    Ok(0) => break, // Connection closed
                    Ok(_) => {
                        let line = header_line.trim();
                        if line.is_empty() {
                            break; // End of headers
                        }
                        headers.scan(line);
                    }
                    Err(_) => break,
                }
            }
            let keep_alive = headers.keep_alive(request.http11);

            match self
                .dispatch(stream, &request, headers.range.as_deref(), keep_alive)
                .await
            {
                Ok(()) => {
                    if !keep_alive {
                        break;
                    }
                }
                Err(_) => break,
            }
        }

        Ok(())
    }

    async fn dispatch(
        &self,
        stream: &mut TcpStream,
        request: &RequestLine<'_>,
        range_header: Option<&str>,
        keep_alive: bool,
    ) -> io::Result<()> {
        let RequestLine {
            method, path, query, ..
        } = *request;
        let is_head = method == Method::Head;

        if path == "/" {
            return match method {
                Method::Get | Method::Head => {
                    send_response(
                        stream,
                        200,
                        "OK",
                        "text/html; charset=utf-8",
                        LANDING_HTML.as_bytes(),
                        is_head,
                        keep_alive,
                        &[],
                    )
                    .await
                }
                _ => method_not_allowed(stream, keep_alive).await,
            };
        }

        if path == "/favicon.ico" {
            return match method {
                Method::Get | Method::Head => {
                    send_response(
                        stream,
                        200,
                        "OK",
                        "image/x-icon",
                        FAVICON,
                        is_head,
                        keep_alive,
                        &[],
                    )
                    .await
                }
                _ => method_not_allowed(stream, keep_alive).await,
            };
        }

        if path == self.openapi_path {
            return match method {
                Method::Get | Method::Head => {
                    send_response(
                        stream,
                        200,
                        "OK",
                        "application/json",
                        &OPENAPI_JSON,
                        is_head,
                        keep_alive,
                        &[],
                    )
                    .await
                }
                _ => method_not_allowed(stream, keep_alive).await,
            };
        }

        if path == "/sequence/service-info" {
            return match method {
                Method::Get | Method::Head => {
                    send_response(
                        stream,
                        200,
                        "OK",
                        "application/json",
                        &SERVICE_INFO_JSON,
                        is_head,
                        keep_alive,
                        &[],
                    )
                    .await
                }
                _ => method_not_allowed(stream, keep_alive).await,
            };
        }

        if let Some(rest) = path.strip_prefix("/sequence/") {
            if let Some(qid) = rest.strip_suffix("/metadata") {
                if !qid.is_empty() && !qid.contains('/') {
                    return match method {
                        Method::Get | Method::Head => {
                            self.handle_metadata(stream, qid, is_head, keep_alive).await
                        }
                        _ => method_not_allowed(stream, keep_alive).await,
                    };
                }
            } else if !rest.is_empty() && !rest.contains('/') {
                return match method {
                    Method::Get | Method::Head | Method::Options => {
                        self.handle_sequence(stream, rest, query, range_header, method, keep_alive)
                            .await
                    }
                    _ => method_not_allowed(stream, keep_alive).await,
                };
            }
        }

        send_error(stream, 404, "Not Found", "Not Found", is_head, keep_alive).await
    }

    /// Fetch and return sequence data for an identifier.
    async fn handle_sequence(
        &self,
        stream: &mut TcpStream,
        qid: &str,
        query: Option<&str>,
        range_header: Option<&str>,
        method: Method,
        keep_alive: bool,
    ) -> io::Result<()> {
        let is_head = method == Method::Head;
        let is_options = method == Method::Options;

        let params = match parse_seq_params(query) {
            Ok(params) => params,
            Err(detail) => {
                info!("Invalid client query parameters: {detail}");
                return send_error(stream, 400, "Bad Request", &detail, is_head, keep_alive).await;
            }
        };
        debug!(
            "Query: qid={qid}, start={:?}, end={:?}, range_header={:?}",
            params.start, params.end, range_header
        );

        let window = match region::request_window(params.start, params.end, range_header) {
            Ok(window) => window,
            Err(err) => return send_region_error(stream, err, is_head, keep_alive).await,
        };

        // An explicitly empty window returns before the identifier is even
        // resolved.
        if window.is_empty() {
            return send_response(
                stream,
                200,
                "OK",
                REFGET_MEDIA_TYPE,
                b"",
                is_head,
                keep_alive,
                &[],
            )
            .await;
        }

        let Some(sha) = digest::normalize(&self.store, qid) else {
            info!("ID not found: {qid}");
            return send_error(
                stream,
                404,
                "Not Found",
                "Sequence ID not found",
                is_head,
                keep_alive,
            )
            .await;
        };
        let record = match self.store.lookup_record(&sha) {
            Ok(Some(record)) => record,
            Ok(None) => {
                info!("ID not found: {sha}");
                return send_error(
                    stream,
                    404,
                    "Not Found",
                    "Sequence ID not found",
                    is_head,
                    keep_alive,
                )
                .await;
            }
            Err(err) => {
                error!("Invalid record in index DB. qid={sha}: {err}");
                return send_error(
                    stream,
                    500,
                    "Internal Server Error",
                    "Internal DB error",
                    is_head,
                    keep_alive,
                )
                .await;
            }
        };

        let regions = match region::plan(window, record.seq_start, record.seq_length) {
            Ok(regions) => regions,
            Err(err) => return send_region_error(stream, err, is_head, keep_alive).await,
        };
        let total = region::total_length(&regions);
        if total == 0 {
            return send_response(
                stream,
                200,
                "OK",
                REFGET_MEDIA_TYPE,
                b"",
                is_head,
                keep_alive,
                &[],
            )
            .await;
        }

        if is_head {
            let head = format_head(200, "OK", REFGET_MEDIA_TYPE, Some(total), false, keep_alive, &[]);
            stream.write_all(head.as_bytes()).await?;
            return stream.flush().await;
        }
        if is_options {
            let head = format_head(
                200,
                "OK",
                REFGET_MEDIA_TYPE,
                Some(0),
                false,
                keep_alive,
                &[("Allow", "OPTIONS, GET, HEAD")],
            );
            stream.write_all(head.as_bytes()).await?;
            return stream.flush().await;
        }

        let filename = self.seqpath.join(&record.path);
        if !filename.is_file() {
            error!("File not found: {}", filename.display());
            return send_error(
                stream,
                500,
                "Internal Server Error",
                "Internal error. Data not found",
                false,
                keep_alive,
            )
            .await;
        }

        let cache = self.fhcache.clone();
        let open_path = filename.clone();
        let handle = match tokio::task::spawn_blocking(move || cache.acquire(&open_path)).await {
            Ok(Ok(handle)) => handle,
            Ok(Err(err)) => {
                error!("Error opening container {}: {err}", filename.display());
                return send_error(
                    stream,
                    500,
                    "Internal Server Error",
                    "Internal error. Bad data",
                    false,
                    keep_alive,
                )
                .await;
            }
            Err(err) => {
                error!("Open task failed: {err}");
                return send_error(
                    stream,
                    500,
                    "Internal Server Error",
                    "Internal error. Bad data",
                    false,
                    keep_alive,
                )
                .await;
            }
        };

        // From here on the status is committed; read failures can only be
        // reported in-band by the streamer.
        let head = format_head(200, "OK", REFGET_MEDIA_TYPE, None, true, keep_alive, &[]);
        stream.write_all(head.as_bytes()).await?;
        stream_regions(handle, &regions, stream).await
    }

    /// Return aliases, length and available hash types for a query hash.
    async fn handle_metadata(
        &self,
        stream: &mut TcpStream,
        qid: &str,
        is_head: bool,
        keep_alive: bool,
    ) -> io::Result<()> {
        let Some(sha) = digest::normalize(&self.store, qid) else {
            info!("ID not found: {qid}");
            return send_error(
                stream,
                404,
                "Not Found",
                "Sequence ID not found",
                is_head,
                keep_alive,
            )
            .await;
        };
        let record = match self.store.lookup_record(&sha) {
            Ok(Some(record)) => record,
            Ok(None) => {
                info!("ID not found: {sha}");
                return send_error(
                    stream,
                    404,
                    "Not Found",
                    "Sequence ID not found",
                    is_head,
                    keep_alive,
                )
                .await;
            }
            Err(err) => {
                error!("Invalid record in index DB. qid={sha}: {err}");
                return send_error(
                    stream,
                    500,
                    "Internal Server Error",
                    "Internal DB error",
                    is_head,
                    keep_alive,
                )
                .await;
            }
        };

        let Some(ga4gh) = digest::trunc512_to_ga4gh(&sha) else {
            error!("Invalid record in index DB. qid={sha}");
            return send_error(
                stream,
                500,
                "Internal Server Error",
                "Internal DB error",
                is_head,
                keep_alive,
            )
            .await;
        };

        let aliases = match &self.alias_authority {
            Some(authority) => vec![Alias {
                naming_authority: authority.clone(),
                alias: record.name.clone(),
            }],
            None => Vec::new(),
        };

        let body = Metadata {
            metadata: SequenceMetadata {
                id: qid.to_string(),
                md5: record.md5,
                trunc512: sha,
                ga4gh,
                length: record.seq_length,
                aliases,
            },
        };
        let body = match serde_json::to_vec(&body) {
            Ok(body) => body,
            Err(err) => {
                error!("Serializing metadata failed: {err}");
                return send_error(
                    stream,
                    500,
                    "Internal Server Error",
                    "Internal error",
                    is_head,
                    keep_alive,
                )
                .await;
            }
        };
        send_response(
            stream,
            200,
            "OK",
            "application/json",
            &body,
            is_head,
            keep_alive,
            &[],
        )
        .await
    }
}

struct SeqParams {
    start: Option<u64>,
    end: Option<u64>,
}

// `start` and `end` must be non-negative integers; anything else is a 400.
fn parse_seq_params(query: Option<&str>) -> Result<SeqParams, String> {
    let mut params = SeqParams {
        start: None,
        end: None,
    };
    let Some(query) = query else {
        return Ok(params);
    };
    for pair in query.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        match key {
            "start" => {
                params.start = Some(
                    value
                        .parse()
                        .map_err(|_| format!("Invalid 'start' parameter: {value}"))?,
                )
            }
            "end" => {
                params.end = Some(
                    value
                        .parse()
                        .map_err(|_| format!("Invalid 'end' parameter: {value}"))?,
                )
            }
            _ => {}
        }
    }
    Ok(params)
}

async fn send_region_error(
    stream: &mut TcpStream,
    err: RegionError,
    head_only: bool,
    keep_alive: bool,
) -> io::Result<()> {
    let detail = err.to_string();
    match err {
        RegionError::CircularRange => {
            info!("Invalid client query with start > end");
            send_error(
                stream,
                416,
                "Range Not Satisfiable",
                &detail,
                head_only,
                keep_alive,
            )
            .await
        }
        RegionError::StartBeyondSequence => {
            info!("Invalid client query with start > end of sequence");
            send_error(stream, 400, "Bad Request", &detail, head_only, keep_alive).await
        }
        RegionError::MutuallyExclusive => {
            info!("Invalid client query with range and start/end");
            send_error(stream, 400, "Bad Request", &detail, head_only, keep_alive).await
        }
        RegionError::InvalidRange | RegionError::UnsupportedUnit => {
            info!("Client sent invalid range header");
            send_error(stream, 400, "Bad Request", &detail, head_only, keep_alive).await
        }
    }
}

async fn method_not_allowed(stream: &mut TcpStream, keep_alive: bool) -> io::Result<()> {
    send_error(
        stream,
        405,
        "Method Not Allowed",
        "Method Not Allowed",
        false,
        keep_alive,
    )
    .await
}

fn format_head(
    status: u16,
    reason: &str,
    content_type: &str,
    content_length: Option<u64>,
    chunked: bool,
    keep_alive: bool,
    extra: &[(&str, &str)],
) -> String {
    let mut head = String::with_capacity(256);
    head.push_str(&format!("HTTP/1.1 {} {}\r\n", status, reason));
    head.push_str(&format!("Content-Type: {}\r\n", content_type));
    if let Some(length) = content_length {
        head.push_str(&format!("Content-Length: {}\r\n", length));
    }
    if chunked {
        head.push_str("Transfer-Encoding: chunked\r\n");
    }
    for (name, value) in extra {
        head.push_str(&format!("{}: {}\r\n", name, value));
    }
    head.push_str("Access-Control-Allow-Origin: *\r\n");
    head.push_str(&format!(
        "Date: {}\r\n",
        httpdate::fmt_http_date(SystemTime::now())
    ));
    head.push_str(if keep_alive {
        "Connection: keep-alive\r\n"
    } else {
        "Connection: close\r\n"
    });
    head.push_str("\r\n");
    head
}

async fn send_response(
    stream: &mut TcpStream,
    status: u16,
    reason: &'static str,
    content_type: &str,
    body: &[u8],
    head_only: bool,
    keep_alive: bool,
    extra: &[(&str, &str)],
) -> io::Result<()> {
    let head = format_head(
        status,
        reason,
        content_type,
        Some(body.len() as u64),
        false,
        keep_alive,
        extra,
    );
    stream.write_all(head.as_bytes()).await?;
    if !head_only && !body.is_empty() {
        stream.write_all(body).await?;
    }
    stream.flush().await
}

async fn send_error(
    stream: &mut TcpStream,
    status: u16,
    reason: &'static str,
    detail: &str,
    head_only: bool,
    keep_alive: bool,
) -> io::Result<()> {
    let body = serde_json::json!({ "detail": detail }).to_string().into_bytes();
    send_response(
        stream,
        status,
        reason,
        "application/json",
        &body,
        head_only,
        keep_alive,
        &[],
    )
    .await
}

// The only methods the service routes; everything else is a 405.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Method {
    Get,
    Head,
    Options,
    Other,
}

impl Method {
    fn parse(token: &str) -> Method {
        match token {
            "GET" => Method::Get,
            "HEAD" => Method::Head,
            "OPTIONS" => Method::Options,
            _ => Method::Other,
        }
    }
}

/// A parsed request line, target already split at the query string.
#[derive(Debug, Clone, Copy)]
struct RequestLine<'a> {
    method: Method,
    path: &'a str,
    query: Option<&'a str>,
    http11: bool,
}

impl<'a> RequestLine<'a> {
    /// Parse `METHOD /target HTTP/x.y`. Exactly three fields; anything
    /// else is a malformed request.
    fn parse(line: &'a str) -> Option<Self> {
        let mut fields = line.split_ascii_whitespace();
        let method = Method::parse(fields.next()?);
        let target = fields.next()?;
        let version = fields.next()?;
        if fields.next().is_some() {
            return None;
        }

        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (target, None),
        };
        if path.is_empty() {
            return None;
        }

        Some(RequestLine {
            method,
            path,
            query,
            http11: version == "HTTP/1.1",
        })
    }
}

/// The request headers the service acts on: `Range` and `Connection`.
/// Everything else is skipped while scanning.
#[derive(Debug, Default)]
struct RequestHeaders {
    range: Option<String>,
    close_requested: bool,
    keep_alive_requested: bool,
}

impl RequestHeaders {
    /// Feed one trimmed header line. Header names are case-insensitive;
    /// the Connection value is a comma-separated token list.
    fn scan(&mut self, line: &str) {
        let Some((name, value)) = line.split_once(':') else {
            return;
        };
        let value = value.trim();
        if name.eq_ignore_ascii_case("range") {
            if !value.is_empty() {
                self.range = Some(value.to_string());
            }
        } else if name.eq_ignore_ascii_case("connection") {
            for token in value.split(',') {
                let token = token.trim();
                if token.eq_ignore_ascii_case("close") {
                    self.close_requested = true;
                } else if token.eq_ignore_ascii_case("keep-alive") {
                    self.keep_alive_requested = true;
                }
            }
        }
    }

    /// HTTP/1.1 defaults to a persistent connection unless the client
    /// asked to close; HTTP/1.0 needs an explicit keep-alive.
    fn keep_alive(&self, http11: bool) -> bool {
        !self.close_requested && (http11 || self.keep_alive_requested)
    }
}
