//! Dev server: static HTTP for the output tree and a websocket channel that
//! tells connected browsers to reload.

#[cfg(feature = "live")]
pub use live::LiveReload;

#[cfg(feature = "live")]
mod live {
    use std::net::{TcpListener, TcpStream};
    use std::sync::mpsc::{Sender, channel};
    use std::sync::{Arc, Mutex, PoisonError};
    use std::thread::JoinHandle;

    use tungstenite::WebSocket;

    use crate::orchestrator::{Notifier, Reload};

    type Clients = Arc<Mutex<Vec<WebSocket<TcpStream>>>>;

    /// Browsers keep this many connections at most.
    const MAX_CLIENTS: usize = 10;

    /// Live-reload channel broadcasting `reload`, `css` and `error:<text>`.
    pub struct LiveReload {
        port: u16,
        tx: Sender<String>,
        _threads: (JoinHandle<()>, JoinHandle<()>),
    }

    impl LiveReload {
        /// Binds port 1337, or any free port when it is taken.
        pub fn start() -> std::io::Result<Self> {
            let (tcp, port) = reserve_port()?;
            let clients = Arc::new(Mutex::new(vec![]));

            let incoming = new_thread_ws_incoming(tcp, clients.clone());
            let (tx, outgoing) = new_thread_ws_broadcast(clients);

            tracing::info!("live reload listening on port {port}");

            Ok(Self {
                port,
                tx,
                _threads: (incoming, outgoing),
            })
        }

        pub fn port(&self) -> u16 {
            self.port
        }

        fn send(&self, message: String) {
            if self.tx.send(message).is_err() {
                tracing::warn!("live reload channel is closed");
            }
        }
    }

    impl Notifier for LiveReload {
        fn reload(&self, kind: Reload) {
            self.send(message(kind).to_string());
        }

        fn error(&self, message: &str) {
            self.send(format!("error:{message}"));
        }
    }

    fn message(kind: Reload) -> &'static str {
        match kind {
            Reload::Page => "reload",
            Reload::Styles => "css",
        }
    }

    fn reserve_port() -> std::io::Result<(TcpListener, u16)> {
        let listener = match TcpListener::bind("127.0.0.1:1337") {
            Ok(sock) => sock,
            Err(_) => TcpListener::bind("127.0.0.1:0")?,
        };

        let port = listener.local_addr()?.port();
        Ok((listener, port))
    }

    fn new_thread_ws_incoming(server: TcpListener, clients: Clients) -> JoinHandle<()> {
        std::thread::spawn(move || {
            for stream in server.incoming() {
                let socket = match stream {
                    Ok(stream) => tungstenite::accept(stream),
                    Err(e) => {
                        tracing::warn!("live reload connection failed: {e}");
                        continue;
                    }
                };

                match socket {
                    Ok(socket) => clients
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(socket),
                    Err(e) => tracing::warn!("live reload handshake failed: {e}"),
                }
            }
        })
    }

    fn new_thread_ws_broadcast(clients: Clients) -> (Sender<String>, JoinHandle<()>) {
        let (tx, rx) = channel::<String>();

        let thread = std::thread::spawn(move || {
            while let Ok(message) = rx.recv() {
                let mut clients = clients.lock().unwrap_or_else(PoisonError::into_inner);
                let mut broken = vec![];

                for (i, socket) in clients.iter_mut().enumerate() {
                    match socket.send(message.as_str().into()) {
                        Ok(_) => {}
                        Err(tungstenite::Error::Io(e)) => {
                            tracing::debug!("dropping live reload client: {e}");
                            broken.push(i);
                        }
                        Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                            broken.push(i);
                        }
                        Err(e) => tracing::error!("live reload error: {e:?}"),
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

        (tx, thread)
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_messages() {
            assert_eq!(message(Reload::Page), "reload");
            assert_eq!(message(Reload::Styles), "css");
        }
    }
}

#[cfg(feature = "server")]
pub mod http {
    use std::net::{SocketAddr, TcpListener};
    use std::thread;

    use axum::Router;
    use camino::Utf8PathBuf;
    use console::style;
    use tower_http::services::ServeDir;
    use tracing::{error, info};

    /// Serves `dest` on localhost from a background thread.
    ///
    /// The port is bound before the thread starts, so a port already in use
    /// is returned to the caller.
    pub fn start(
        dest: impl Into<Utf8PathBuf>,
        port: u16,
    ) -> std::io::Result<thread::JoinHandle<Result<(), anyhow::Error>>> {
        let dest = dest.into();
        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], port)))?;
        listener.set_nonblocking(true)?;

        let port = listener.local_addr()?.port();
        info!(url = %style(format!("http://localhost:{port}/")).yellow(), "starting a HTTP server");

        Ok(thread::spawn(move || {
            let result = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(anyhow::Error::from)
                .and_then(|rt| rt.block_on(serve(dest, listener)));

            if let Err(e) = &result {
                error!("HTTP server stopped: {e:#}");
            }

            result
        }))
    }

    async fn serve(dest: Utf8PathBuf, listener: TcpListener) -> Result<(), anyhow::Error> {
        let listener = tokio::net::TcpListener::from_std(listener)?;
        let router = Router::new().fallback_service(ServeDir::new(dest.as_std_path()));

        axum::serve(listener, router).await?;

        Ok(())
    }

}
