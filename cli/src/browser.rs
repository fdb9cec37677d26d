use async_trait::async_trait;
use jam_core::{AuthError, Browser};
use log::{debug, warn};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use url::Url;

/// Stands in for the user's browser: prints the authorization URL and waits
/// for Spotify to redirect back to the loopback redirect URI.
pub struct LoopbackBrowser {
    redirect: Url,
    current: Mutex<Option<String>>,
}

impl LoopbackBrowser {
    pub fn new(redirect_uri: &str) -> Result<Self, AuthError> {
        let redirect = Url::parse(redirect_uri)?;
        Ok(Self {
            redirect,
            current: Mutex::new(None),
        })
    }

    fn bind_addr(&self) -> Result<String, AuthError> {
        let host = self
            .redirect
            .host_str()
            .ok_or_else(|| AuthError::Browser("redirect URI has no host".to_string()))?;
        let port = self
            .redirect
            .port_or_known_default()
            .ok_or_else(|| AuthError::Browser("redirect URI has no port".to_string()))?;
        Ok(format!("{}:{}", host, port))
    }

    async fn wait_for_redirect(&self) -> Result<String, AuthError> {
        let addr = self.bind_addr()?;
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| AuthError::Browser(format!("bind {} failed: {}", addr, e)))?;
        debug!("Waiting for the authorization redirect on {}", addr);

        loop {
            let (mut stream, _) = listener
                .accept()
                .await
                .map_err(|e| AuthError::Browser(format!("accept failed: {}", e)))?;

            let mut buf = [0u8; 8192];
            let n = stream.read(&mut buf).await.unwrap_or(0);
            let request = String::from_utf8_lossy(&buf[..n]);

            let callback = request_target(&request)
                .and_then(|target| self.redirect.join(target).ok())
                .filter(|url| is_callback(url, &self.redirect));

            let (status, body) = if callback.is_some() {
                ("200 OK", "Spotify login finished. You can close this tab.")
            } else {
                ("404 Not Found", "Not Found")
            };
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            if let Err(e) = stream.write_all(response.as_bytes()).await {
                warn!("Could not answer the browser: {}", e);
            }

            if let Some(url) = callback {
                return Ok(url.into());
            }
        }
    }
}

/// The path of a `GET` request line, e.g. `/callback?code=...`.
fn request_target(request: &str) -> Option<&str> {
    let line = request.lines().next()?;
    let mut parts = line.split_whitespace();
    if parts.next()? != "GET" {
        return None;
    }
    parts.next()
}

fn is_callback(url: &Url, redirect: &Url) -> bool {
    url.path() == redirect.path()
        && url
            .query_pairs()
            .any(|(key, _)| key == "code" || key == "error")
}

#[async_trait]
impl Browser for LoopbackBrowser {
    async fn navigate(&self, url: &str) -> Result<(), AuthError> {
        println!("Open this URL in your browser to log in to Spotify:");
        println!();
        println!("  {}", url);
        println!();

        let callback = self.wait_for_redirect().await?;
        *self.current.lock() = Some(callback);
        Ok(())
    }

    fn current_url(&self) -> Option<String> {
        self.current.lock().clone()
    }

    fn replace_url(&self, url: &str) {
        *self.current.lock() = Some(url.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_target() {
        assert_eq!(
            request_target("GET /callback?code=abc HTTP/1.1\r\nHost: x\r\n\r\n"),
            Some("/callback?code=abc")
        );
        assert_eq!(request_target("POST /callback HTTP/1.1\r\n"), None);
        assert_eq!(request_target(""), None);
    }

    #[test]
    fn test_is_callback() {
        let redirect = Url::parse("http://127.0.0.1:8888/callback").unwrap();
        let hit = redirect.join("/callback?code=abc").unwrap();
        let denied = redirect.join("/callback?error=access_denied").unwrap();
        let favicon = redirect.join("/favicon.ico").unwrap();
        let bare = redirect.join("/callback").unwrap();

        assert!(is_callback(&hit, &redirect));
        assert!(is_callback(&denied, &redirect));
        assert!(!is_callback(&favicon, &redirect));
        assert!(!is_callback(&bare, &redirect));
    }

    #[tokio::test]
    async fn test_captures_redirect() {
        let browser = LoopbackBrowser::new("http://127.0.0.1:18931/callback").unwrap();

        let client = tokio::spawn(async {
            // Give the listener a moment to bind.
            for _ in 0..50 {
                if let Ok(mut stream) = tokio::net::TcpStream::connect("127.0.0.1:18931").await {
                    stream
                        .write_all(b"GET /callback?code=abc123 HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n")
                        .await
                        .unwrap();
                    let mut reply = String::new();
                    stream.read_to_string(&mut reply).await.unwrap();
                    return reply;
                }
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            }
            panic!("listener never came up");
        });

        let url = browser.wait_for_redirect().await.unwrap();
        assert_eq!(url, "http://127.0.0.1:18931/callback?code=abc123");
        assert!(client.await.unwrap().starts_with("HTTP/1.1 200 OK"));
    }
}
