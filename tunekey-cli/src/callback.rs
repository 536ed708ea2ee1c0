//! One-shot loopback listener for the authorization redirect.
//!
//! Binds the host and port of the configured redirect URI, waits for the
//! browser to hit it after consent, and forwards what it observed to the
//! manager through the callback channel. The listener serves exactly one
//! redirect and shuts down.

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use url::Url;

use tunekey_core::{AuthCallback, CallbackSender};

const SUCCESS_PAGE: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n\
    <html><body><h1>Authorization complete</h1>\
    <p>You can close this window and return to tunekey.</p></body></html>";

const FAILURE_PAGE: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n\
    <html><body><h1>Authorization failed</h1>\
    <p>Return to tunekey for details.</p></body></html>";

const BAD_REQUEST: &[u8] = b"HTTP/1.1 400 Bad Request\r\n\r\n\
    <html><body><h1>Bad Request</h1></body></html>";

/// Listen on the redirect URI's address for a single authorization
/// redirect and deliver it through `sender`.
pub async fn receive_callback(redirect_uri: &str, sender: CallbackSender) -> Result<()> {
    let url = Url::parse(redirect_uri).context("redirect URI is not a valid URL")?;
    let host = url.host_str().context("redirect URI has no host")?;
    let port = url
        .port_or_known_default()
        .context("redirect URI has no port")?;

    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind callback listener on {}", addr))?;

    tracing::info!(addr = %addr, "waiting for authorization redirect");

    loop {
        let (mut socket, _) = listener
            .accept()
            .await
            .context("failed to accept callback connection")?;

        let mut buffer = [0; 4096];
        let n = socket
            .read(&mut buffer)
            .await
            .context("failed to read callback request")?;
        let request = String::from_utf8_lossy(&buffer[..n]);

        let Some(query) = request_query(&request) else {
            let _ = socket.write_all(BAD_REQUEST).await;
            continue;
        };

        let mut callback = AuthCallback {
            code: None,
            state: None,
            error: None,
            received_uri: format!("{}://{}{}", url.scheme(), addr, url.path()),
        };

        for param in query.split('&') {
            let Some((key, value)) = param.split_once('=') else {
                continue;
            };
            match key {
                "code" => callback.code = Some(value.to_string()),
                "state" => callback.state = Some(value.to_string()),
                "error" => callback.error = Some(value.to_string()),
                _ => {}
            }
        }

        if callback.code.is_none() && callback.error.is_none() {
            let _ = socket.write_all(BAD_REQUEST).await;
            continue;
        }

        let page = if callback.error.is_some() {
            FAILURE_PAGE
        } else {
            SUCCESS_PAGE
        };
        let _ = socket.write_all(page).await;

        if sender.send(callback).is_err() {
            bail!("authorization flow ended before the redirect arrived");
        }
        return Ok(());
    }
}

/// Extract the query string from the request line of a raw HTTP request.
fn request_query(request: &str) -> Option<&str> {
    let first_line = request.lines().next()?;
    let path = first_line.split_whitespace().nth(1)?;
    path.split_once('?').map(|(_, query)| query)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_query_parsing() {
        let request = "GET /callback?code=abc&state=xyz HTTP/1.1\r\nHost: localhost\r\n\r\n";
        assert_eq!(request_query(request), Some("code=abc&state=xyz"));
    }

    #[test]
    fn test_request_without_query() {
        let request = "GET /favicon.ico HTTP/1.1\r\n\r\n";
        assert_eq!(request_query(request), None);
    }
}
