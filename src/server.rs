//! Server-side listener and upgrade.
//!
//! The route is an explicit argument to [`listen`]; there is no
//! process-wide handler registry. Each accepted connection gets its own
//! task: the accept loop never blocks on a slow handshake or handler.

use std::future::Future;
use std::net::SocketAddr;

use tokio::io::{AsyncWriteExt, BufReader, BufWriter, ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream};

use crate::{
    conn::{Connection, Options, Role},
    handshake, Result, WebSocketError,
};

/// Listens on `addr` and runs `handler` for every connection upgraded at
/// `path`.
///
/// Runs until the listening socket fails. Handshake failures are answered
/// with an HTTP error status, logged, and do not reach the handler.
pub async fn listen<F, Fut>(addr: &str, path: &str, handler: F) -> Result<()>
where
    F: Fn(Connection<TcpStream>) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    listen_with_options(addr, path, handler, Options::default()).await
}

/// Like [`listen`], with explicit connection [`Options`].
pub async fn listen_with_options<F, Fut>(
    addr: &str,
    path: &str,
    handler: F,
    options: Options,
) -> Result<()>
where
    F: Fn(Connection<TcpStream>) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = Listener::bind(addr, path, options).await?;
    listener.run(handler).await
}

/// A bound WebSocket listener.
///
/// [`Listener::run`] drives the accept loop; [`Listener::accept`] upgrades
/// a single connection, for callers that want to manage tasks themselves.
pub struct Listener {
    inner: TcpListener,
    path: String,
    options: Options,
}

impl Listener {
    /// Binds a TCP listener serving WebSocket upgrades at `path`.
    pub async fn bind(addr: &str, path: &str, options: Options) -> Result<Self> {
        let inner = TcpListener::bind(addr).await?;
        log::info!("listening on {} for websocket upgrades at {}", addr, path);
        Ok(Self {
            inner,
            path: path.to_owned(),
            options,
        })
    }

    /// Local address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.local_addr()?)
    }

    /// Accepts one TCP connection and upgrades it, answering the HTTP
    /// error status on failure.
    pub async fn accept(&self) -> Result<Connection<TcpStream>> {
        let (stream, peer) = self.inner.accept().await?;
        log::debug!("accepted connection from {peer}");
        upgrade(stream, &self.path, &self.options).await
    }

    /// Accept loop: one task per upgraded connection.
    pub async fn run<F, Fut>(self, handler: F) -> Result<()>
    where
        F: Fn(Connection<TcpStream>) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        loop {
            let (stream, peer) = self.inner.accept().await?;
            log::debug!("accepted connection from {peer}");

            let handler = handler.clone();
            let path = self.path.clone();
            let options = self.options.clone();
            tokio::spawn(async move {
                match upgrade(stream, &path, &options).await {
                    Ok(conn) => handler(conn).await,
                    Err(err) => log::debug!("upgrade from {peer} failed: {err}"),
                }
            });
        }
    }
}

/// Performs the server side of the upgrade handshake and wraps the stream
/// in a server-role connection. The whole exchange runs under the
/// configured handshake timeout.
async fn upgrade(stream: TcpStream, path: &str, options: &Options) -> Result<Connection<TcpStream>> {
    let (read, write) = tokio::io::split(stream);
    let mut reader = BufReader::new(read);
    let mut writer = BufWriter::new(write);

    let exchange = exchange(&mut reader, &mut writer, path);
    match tokio::time::timeout(options.handshake_timeout, exchange).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(WebSocketError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "handshake deadline elapsed",
            )))
        }
    }

    Ok(Connection::from_parts(reader, writer, Role::Server, options))
}

async fn exchange(
    reader: &mut BufReader<ReadHalf<TcpStream>>,
    writer: &mut BufWriter<WriteHalf<TcpStream>>,
    path: &str,
) -> Result<()> {
    let head = handshake::read_head(reader).await?;

    let request = match handshake::UpgradeRequest::parse(&head) {
        Ok(request) => request,
        Err(err) => return Err(reject(writer, err).await),
    };

    if request.path != path {
        let err = WebSocketError::Handshake {
            status: 404,
            reason: format!("No websocket endpoint at {}", request.path),
        };
        return Err(reject(writer, err).await);
    }

    match request.validate() {
        Ok(accept) => {
            writer.write_all(&handshake::response_101(&accept)).await?;
            writer.flush().await?;
            Ok(())
        }
        Err(err) => Err(reject(writer, err).await),
    }
}

/// Best-effort HTTP error answer for a failed upgrade; the handshake error
/// itself is what surfaces to the caller.
async fn reject<W>(writer: &mut BufWriter<W>, err: WebSocketError) -> WebSocketError
where
    W: tokio::io::AsyncWrite + Unpin,
{
    if let WebSocketError::Handshake { status, reason } = &err {
        let status_text = match status {
            400 => "Bad Request",
            404 => "Not Found",
            _ => "Error",
        };
        let response = handshake::response_error(*status, status_text, reason);
        if writer.write_all(&response).await.is_ok() {
            let _ = writer.flush().await;
        }
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{dial, OpCode};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn bound_listener() -> (Listener, String) {
        let listener = Listener::bind("127.0.0.1:0", "/chat", Options::default())
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("local addr");
        (listener, addr.to_string())
    }

    #[tokio::test]
    async fn test_dial_and_echo_over_tcp() {
        let (listener, addr) = bound_listener().await;

        let server = tokio::spawn(async move {
            let mut conn = listener.accept().await.expect("Failed to upgrade");
            let (opcode, payload) = conn.receive().await.expect("Failed to receive");
            conn.send(opcode, &payload).await.expect("Failed to echo");
        });

        let mut client = dial(&format!("ws://{addr}/chat")).await.expect("Failed to dial");
        client
            .send(OpCode::Text, b"Hello Websocket World!")
            .await
            .expect("Failed to send");

        let (opcode, payload) = client.receive().await.expect("Failed to receive echo");
        assert_eq!(opcode, OpCode::Text);
        assert_eq!(&payload[..], b"Hello Websocket World!");

        server.await.expect("server task failed");
    }

    #[tokio::test]
    async fn test_clean_close_over_tcp() {
        let (listener, addr) = bound_listener().await;

        let server = tokio::spawn(async move {
            let mut conn = listener.accept().await.expect("Failed to upgrade");
            let err = conn.receive().await.expect_err("close must end the read");
            assert!(matches!(err, WebSocketError::ConnectionClosed));
        });

        let mut client = dial(&format!("ws://{addr}/chat")).await.expect("Failed to dial");
        client.close().await.expect("Failed to close");

        let err = client
            .send(OpCode::Text, b"after close")
            .await
            .expect_err("send after close must fail");
        assert!(matches!(err, WebSocketError::ConnectionClosed));

        server.await.expect("server task failed");
    }

    #[tokio::test]
    async fn test_wrong_path_answers_404() {
        let (listener, addr) = bound_listener().await;

        let server = tokio::spawn(async move {
            let err = listener.accept().await.expect_err("upgrade must fail");
            assert!(matches!(
                err,
                WebSocketError::Handshake { status: 404, .. }
            ));
        });

        let err = dial(&format!("ws://{addr}/other"))
            .await
            .expect_err("dial must fail");
        assert!(matches!(err, WebSocketError::InvalidStatusCode(404)));

        server.await.expect("server task failed");
    }

    #[tokio::test]
    async fn test_plain_http_request_answers_400() {
        let (listener, addr) = bound_listener().await;

        let server = tokio::spawn(async move {
            let err = listener.accept().await.expect_err("upgrade must fail");
            assert!(matches!(
                err,
                WebSocketError::Handshake { status: 400, .. }
            ));
        });

        let mut stream = tokio::net::TcpStream::connect(&addr)
            .await
            .expect("Failed to connect");
        stream
            .write_all(b"GET /chat HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .expect("Failed to write request");

        let mut response = Vec::new();
        stream
            .read_to_end(&mut response)
            .await
            .expect("Failed to read response");
        assert!(response.starts_with(b"HTTP/1.1 400 Bad Request"));

        server.await.expect("server task failed");
    }
}
