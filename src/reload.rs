//! The live-reload channel.
//!
//! Browsers connect to a small websocket server and reload the page when
//! they receive a `"reload"` message. There is one channel per process. It
//! is started on demand by the dev server task; until then, broadcasts are
//! silently dropped so that build tasks can always call
//! [`LiveReload::broadcast`].

use std::sync::{Arc, Mutex};

#[cfg(feature = "live")]
use std::net::{TcpListener, TcpStream};
#[cfg(feature = "live")]
use std::sync::mpsc::Sender;

#[cfg(feature = "live")]
use tungstenite::WebSocket;

#[cfg(feature = "live")]
use crate::error::WatchError;

/// Keep at most this many browser connections open.
#[cfg(feature = "live")]
const MAX_CLIENTS: usize = 10;

#[cfg(feature = "live")]
type Clients = Arc<Mutex<Vec<WebSocket<TcpStream>>>>;

#[cfg(feature = "live")]
struct Channel {
    port: u16,
    clients: Clients,
    tx: Sender<()>,
}

/// Cheap, cloneable handle to the process-wide reload channel.
#[derive(Clone, Default)]
pub struct LiveReload {
    #[cfg(feature = "live")]
    inner: Arc<Mutex<Option<Channel>>>,
    #[cfg(not(feature = "live"))]
    inner: Arc<Mutex<()>>,
}

impl std::fmt::Debug for LiveReload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveReload")
            .field("port", &self.port())
            .finish()
    }
}

impl LiveReload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the websocket server, preferring `port` and falling back to an
    /// ephemeral one if it is taken. Starting twice returns the port of the
    /// running server.
    #[cfg(feature = "live")]
    pub fn start(&self, port: u16) -> Result<u16, WatchError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(channel) = inner.as_ref() {
            return Ok(channel.port);
        }

        let (tcp, port) = reserve_port(port).map_err(WatchError::Bind)?;
        let clients: Clients = Arc::default();

        new_thread_ws_incoming(tcp, clients.clone());
        let tx = new_thread_ws_reload(clients.clone());

        tracing::info!(port, "live reload listening");
        *inner = Some(Channel { port, clients, tx });

        Ok(port)
    }

    /// Port of the running websocket server, if started.
    pub fn port(&self) -> Option<u16> {
        #[cfg(feature = "live")]
        {
            let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.as_ref().map(|channel| channel.port)
        }
        #[cfg(not(feature = "live"))]
        {
            None
        }
    }

    /// Number of connected browsers.
    pub fn clients(&self) -> usize {
        #[cfg(feature = "live")]
        {
            let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.as_ref().map_or(0, |channel| {
                channel.clients.lock().unwrap_or_else(|e| e.into_inner()).len()
            })
        }
        #[cfg(not(feature = "live"))]
        {
            0
        }
    }

    /// Tell every connected browser to reload. Does nothing when the channel
    /// was never started.
    pub fn broadcast(&self) {
        #[cfg(feature = "live")]
        {
            let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            match inner.as_ref() {
                Some(channel) => {
                    if channel.tx.send(()).is_ok() {
                        tracing::info!("reloading browsers");
                    }
                }
                None => tracing::debug!("live reload not running, skipping broadcast"),
            }
        }
        #[cfg(not(feature = "live"))]
        {
            let _ = &self.inner;
            tracing::debug!("live reload not compiled in, skipping broadcast");
        }
    }
}

/// Client-side script that reloads the page on every message.
pub fn refresh_script(port: u16) -> String {
    format!(
        r#"
(() => {{
    const socket = new WebSocket(`ws://${{location.hostname || "localhost"}}:{port}`);
    socket.addEventListener("message", () => window.location.reload());
}})();
"#
    )
}

#[cfg(feature = "live")]
fn reserve_port(port: u16) -> std::io::Result<(TcpListener, u16)> {
    let listener = match TcpListener::bind(("127.0.0.1", port)) {
        Ok(sock) => sock,
        Err(e) => {
            tracing::warn!(port, "couldn't bind live reload port ({e}), using a free one");
            TcpListener::bind("127.0.0.1:0")?
        }
    };

    let port = listener.local_addr()?.port();
    Ok((listener, port))
}

#[cfg(feature = "live")]
fn new_thread_ws_incoming(server: TcpListener, clients: Clients) {
    std::thread::spawn(move || {
        for stream in server.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!("live reload connection failed: {e}");
                    continue;
                }
            };

            match tungstenite::accept(stream) {
                Ok(socket) => clients.lock().unwrap_or_else(|e| e.into_inner()).push(socket),
                Err(e) => tracing::warn!("live reload handshake failed: {e}"),
            }
        }
    });
}

#[cfg(feature = "live")]
fn new_thread_ws_reload(clients: Clients) -> Sender<()> {
    let (tx, rx) = std::sync::mpsc::channel();

    std::thread::spawn(move || {
        while rx.recv().is_ok() {
            let mut clients = clients.lock().unwrap_or_else(|e| e.into_inner());
            let mut broken = vec![];

            for (i, socket) in clients.iter_mut().enumerate() {
                match socket.send("reload".into()) {
                    Ok(_) => {}
                    Err(tungstenite::Error::Io(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                        broken.push(i);
                    }
                    Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                        broken.push(i);
                    }
                    Err(e) => tracing::error!("live reload send failed: {e}"),
                }
            }

            for i in broken.into_iter().rev() {
                clients.remove(i);
            }

            let len = clients.len();
            if len > MAX_CLIENTS {
                for mut socket in clients.drain(0..len - MAX_CLIENTS) {
                    socket.close(None).ok();
                }
            }
        }
    });

    tx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_before_start_is_a_no_op() {
        let reload = LiveReload::new();
        reload.broadcast();
        assert_eq!(reload.port(), None);
        assert_eq!(reload.clients(), 0);
    }

    #[test]
    fn test_refresh_script_uses_port() {
        let script = refresh_script(4242);
        assert!(script.contains(":4242"));
        assert!(script.contains("window.location.reload()"));
    }

    #[cfg(feature = "live")]
    #[test]
    fn test_broadcast_reaches_browser() {
        use std::time::{Duration, Instant};

        let reload = LiveReload::new();
        let port = reload.start(0).unwrap();

        // a second start reuses the server
        assert_eq!(reload.clone().start(0).unwrap(), port);

        let (mut socket, _) = tungstenite::connect(format!("ws://127.0.0.1:{port}")).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while reload.clients() == 0 {
            assert!(Instant::now() < deadline, "browser never registered");
            std::thread::sleep(Duration::from_millis(10));
        }

        reload.broadcast();

        let message = socket.read().unwrap();
        assert_eq!(message.to_text().unwrap(), "reload");
    }
}
