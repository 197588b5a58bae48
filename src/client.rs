//! Client-side connection establishment.

use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use url::Url;

use crate::{
    conn::{Connection, Options, Role},
    handshake, Result, WebSocketError,
};

/// Opens a WebSocket connection to a `ws://host:port/path` URL.
///
/// Connects over TCP, performs the upgrade handshake, validates the
/// server's `Sec-WebSocket-Accept`, and returns a client-role connection.
///
/// # Errors
/// Fails with a handshake error if the server rejects the upgrade or
/// answers with a bad accept value, and with an I/O error if the TCP
/// connect or the handshake exchange fails or times out.
pub async fn dial(url: &str) -> Result<Connection<TcpStream>> {
    dial_with_options(url, Options::default()).await
}

/// Like [`dial`], with explicit connection [`Options`].
pub async fn dial_with_options(url: &str, options: Options) -> Result<Connection<TcpStream>> {
    let url = Url::parse(url)?;
    if url.scheme() != "ws" {
        return Err(WebSocketError::InvalidHttpScheme);
    }

    let host = url.host_str().ok_or(url::ParseError::EmptyHost)?;
    let port = url.port().unwrap_or(80);
    let addr = format!("{host}:{port}");
    let host_header = if port == 80 {
        host.to_owned()
    } else {
        addr.clone()
    };
    let path = match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_owned(),
    };
    let origin = format!("http://{host_header}");

    log::debug!("connecting to {addr}");
    let stream = TcpStream::connect(&addr).await?;

    let (read, write) = tokio::io::split(stream);
    let mut reader = BufReader::new(read);
    let mut writer = BufWriter::new(write);

    let key = handshake::generate_key();
    let exchange = async {
        writer
            .write_all(&handshake::request_bytes(&path, &host_header, &origin, &key))
            .await?;
        writer.flush().await?;

        let head = handshake::read_head(&mut reader).await?;
        let response = handshake::UpgradeResponse::parse(&head)?;
        response.validate(&key)
    };

    match tokio::time::timeout(options.handshake_timeout, exchange).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(WebSocketError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "handshake deadline elapsed",
            )))
        }
    }

    log::debug!("websocket connection to {addr} established");
    Ok(Connection::from_parts(reader, writer, Role::Client, &options))
}
