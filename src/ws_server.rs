use crate::error::Error;
use crate::session::Shutdown;
use crate::types::VizNote;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{debug, error, info, warn};
use sha1_smol::Sha1;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

/// Delay between attempts to bind the listening port.
pub const BIND_RETRY: Duration = Duration::from_secs(2);

/// Visualization feed: HTTP + WebSocket on one port.
///
/// - `GET /` serves the optional visualization page
/// - WebSocket upgrade → every melody note as one JSON text message
///
/// Delivery is best-effort. A client whose socket errors is dropped; the
/// melody thread never waits on this server.
pub struct VizServer {
    note_rx: Receiver<VizNote>,
    addr: String,
    page: Option<PathBuf>,
    shutdown: Shutdown,
}

struct WsClient {
    stream: TcpStream,
    peer: String,
    alive: bool,
}

impl WsClient {
    fn new(stream: TcpStream) -> Self {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".into());
        let _ = stream.set_nodelay(true);
        let _ = stream.set_write_timeout(Some(Duration::from_millis(250)));
        Self {
            stream,
            peer,
            alive: true,
        }
    }

    fn send_text(&mut self, text: &str) -> bool {
        match self.stream.write_all(&text_frame(text)) {
            Ok(()) => true,
            Err(e) => {
                let err = Error::VisualizationClientDisconnected(format!("{}: {}", self.peer, e));
                info!("viz: {}", err);
                self.alive = false;
                false
            }
        }
    }
}

type ClientList = Arc<Mutex<Vec<WsClient>>>;

fn lock_clients(clients: &ClientList) -> MutexGuard<'_, Vec<WsClient>> {
    clients.lock().unwrap_or_else(|e| e.into_inner())
}

/// Unmasked server-to-client text frame.
fn text_frame(text: &str) -> Vec<u8> {
    let payload = text.as_bytes();
    let len = payload.len();
    let mut frame = Vec::with_capacity(10 + len);
    frame.push(0x81); // FIN + text opcode
    if len < 126 {
        frame.push(len as u8);
    } else if len < 65536 {
        frame.push(126);
        frame.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        frame.push(127);
        frame.extend_from_slice(&(len as u64).to_be_bytes());
    }
    frame.extend_from_slice(payload);
    frame
}

/// Enough of the HTTP request to tell a page fetch from an upgrade.
struct HttpRequest {
    path: String,
    is_upgrade: bool,
    ws_key: Option<String>,
}

fn parse_request(stream: &TcpStream) -> Result<HttpRequest, String> {
    let mut reader = BufReader::new(stream.try_clone().map_err(|e| e.to_string())?);
    let mut req = HttpRequest {
        path: "/".into(),
        is_upgrade: false,
        ws_key: None,
    };
    let mut first = true;

    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).map_err(|e| e.to_string())? == 0 {
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            break;
        }
        if first {
            // "GET /path HTTP/1.1"
            if let Some(path) = trimmed.split_whitespace().nth(1) {
                req.path = path.to_string();
            }
            first = false;
            continue;
        }
        if let Some((name, value)) = trimmed.split_once(':') {
            let name = name.trim().to_ascii_lowercase();
            let value = value.trim();
            if name == "upgrade" && value.to_ascii_lowercase().contains("websocket") {
                req.is_upgrade = true;
            } else if name == "sec-websocket-key" {
                req.ws_key = Some(value.to_string());
            }
        }
    }
    Ok(req)
}

/// `Sec-WebSocket-Accept` value for a client key.
pub fn accept_key(key: &str) -> String {
    const MAGIC: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(MAGIC.as_bytes());
    base64_encode(&hasher.digest().bytes())
}

fn ws_handshake(stream: &mut TcpStream, key: &str) -> std::io::Result<()> {
    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\
         \r\n",
        accept_key(key)
    );
    stream.write_all(response.as_bytes())
}

fn respond(stream: &mut TcpStream, status: &str, content_type: &str, body: &[u8]) {
    let header = format!(
        "HTTP/1.1 {}\r\n\
         Content-Type: {}\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         Cache-Control: no-cache\r\n\
         \r\n",
        status,
        content_type,
        body.len()
    );
    let _ = stream.write_all(header.as_bytes());
    let _ = stream.write_all(body);
}

fn base64_encode(data: &[u8]) -> String {
    const CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut out = String::with_capacity(data.len().div_ceil(3) * 4);
    for chunk in data.chunks(3) {
        let b = [chunk[0], *chunk.get(1).unwrap_or(&0), *chunk.get(2).unwrap_or(&0)];
        let triple = (b[0] as u32) << 16 | (b[1] as u32) << 8 | b[2] as u32;
        for i in 0..4 {
            if i <= chunk.len() {
                out.push(CHARS[((triple >> (18 - 6 * i)) & 0x3F) as usize] as char);
            } else {
                out.push('=');
            }
        }
    }
    out
}

fn handle_connection(mut stream: TcpStream, clients: &ClientList, page: &[u8]) {
    let req = match parse_request(&stream) {
        Ok(r) => r,
        Err(e) => {
            warn!("viz: request parse error: {}", e);
            return;
        }
    };
    if req.is_upgrade {
        let Some(key) = req.ws_key else {
            respond(&mut stream, "400 Bad Request", "text/plain", b"missing Sec-WebSocket-Key");
            return;
        };
        match ws_handshake(&mut stream, &key) {
            Ok(()) => {
                let client = WsClient::new(stream);
                info!("viz: client connected from {}", client.peer);
                lock_clients(clients).push(client);
            }
            Err(e) => warn!("viz: handshake failed: {}", e),
        }
        return;
    }
    match req.path.as_str() {
        "/" | "/index.html" | "/visualization.html" if !page.is_empty() => {
            respond(&mut stream, "200 OK", "text/html; charset=utf-8", page)
        }
        _ => respond(
            &mut stream,
            "404 Not Found",
            "text/html",
            b"<h1>404</h1><p>Connect a WebSocket client to this address for the note feed</p>",
        ),
    }
}

impl VizServer {
    pub fn new(note_rx: Receiver<VizNote>, addr: String, shutdown: Shutdown) -> Self {
        Self {
            note_rx,
            addr,
            page: None,
            shutdown,
        }
    }

    pub fn with_page(mut self, page: Option<PathBuf>) -> Self {
        self.page = page;
        self
    }

    /// Bind, retrying every [`BIND_RETRY`] until it works or shutdown.
    fn bind(addr: &str, shutdown: &Shutdown) -> Option<TcpListener> {
        loop {
            match TcpListener::bind(addr) {
                Ok(l) => return Some(l),
                Err(e) => {
                    warn!("viz: could not bind {}: {}; retrying in {:?}", addr, e, BIND_RETRY);
                    if !shutdown.sleep(BIND_RETRY) {
                        return None;
                    }
                }
            }
        }
    }

    /// Broadcast until the note feed closes or shutdown. The acceptor runs
    /// on its own thread so a slow bind never backs up the feed.
    pub fn run(self) {
        let clients: ClientList = Arc::new(Mutex::new(Vec::new()));

        let page = match &self.page {
            Some(path) => match fs::read(path) {
                Ok(data) => {
                    info!("viz: serving page {} ({} bytes)", path.display(), data.len());
                    Arc::new(data)
                }
                Err(e) => {
                    warn!("viz: could not load {}: {}; page disabled", path.display(), e);
                    Arc::new(Vec::new())
                }
            },
            None => Arc::new(Vec::new()),
        };

        let accept_clients = clients.clone();
        let addr = self.addr.clone();
        let shutdown = self.shutdown.clone();
        let spawned = thread::Builder::new().name("viz-accept".into()).spawn(move || {
            let Some(listener) = Self::bind(&addr, &shutdown) else {
                return;
            };
            match listener.local_addr() {
                Ok(SocketAddr::V4(a)) if a.ip().is_unspecified() => {
                    info!("viz: WebSocket server started on ws://localhost:{}", a.port())
                }
                Ok(a) => info!("viz: WebSocket server started on ws://{}", a),
                Err(_) => info!("viz: WebSocket server started on ws://{}", addr),
            }

            for stream in listener.incoming() {
                if shutdown.is_triggered() {
                    break;
                }
                match stream {
                    Ok(stream) => {
                        let cl = accept_clients.clone();
                        let page = page.clone();
                        // Page fetches close at once; upgrades move to the client list
                        thread::spawn(move || handle_connection(stream, &cl, &page));
                    }
                    Err(e) => warn!("viz: accept error: {}", e),
                }
            }
        });
        if let Err(e) = spawned {
            error!("viz: could not start acceptor: {}", e);
            return;
        }

        let mut sent: u64 = 0;
        loop {
            let note = match self.note_rx.recv_timeout(Duration::from_millis(200)) {
                Ok(n) => n,
                Err(RecvTimeoutError::Timeout) => {
                    if self.shutdown.is_triggered() {
                        break;
                    }
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            };
            let json = match serde_json::to_string(&note) {
                Ok(j) => j,
                Err(e) => {
                    warn!("viz: JSON serialize error: {}", e);
                    continue;
                }
            };

            let mut cl = lock_clients(&clients);
            for client in cl.iter_mut() {
                if client.send_text(&json) {
                    sent += 1;
                }
            }
            cl.retain(|c| c.alive);
        }
        debug!("viz: feed closed after {} messages", sent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base64() {
        assert_eq!(base64_encode(b""), "");
        assert_eq!(base64_encode(b"f"), "Zg==");
        assert_eq!(base64_encode(b"fo"), "Zm8=");
        assert_eq!(base64_encode(b"foo"), "Zm9v");
        assert_eq!(base64_encode(b"foobar"), "Zm9vYmFy");
    }

    #[test]
    fn test_accept_key_rfc_example() {
        assert_eq!(accept_key("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn test_frame_lengths() {
        let short = text_frame("hi");
        assert_eq!(short, vec![0x81, 2, b'h', b'i']);

        let medium = text_frame(&"x".repeat(300));
        assert_eq!(&medium[..4], &[0x81, 126, 0x01, 0x2C]);
        assert_eq!(medium.len(), 304);

        let long = text_frame(&"x".repeat(70_000));
        assert_eq!(long[1], 127);
        assert_eq!(&long[2..10], &70_000u64.to_be_bytes());
    }
}
