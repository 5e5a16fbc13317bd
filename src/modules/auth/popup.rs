use serde_json::json;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use url::Url;

use crate::models::PopupConfig;
use crate::modules::system::logger;

/// One message posted from the authorization window back to the opener.
#[derive(Debug, Clone)]
pub struct PopupMessage {
    pub origin: String,
    pub payload: serde_json::Value,
}

/// Handle on an open authorization window: the close-detection poll and the
/// forced close at timeout go through this.
pub trait PopupWindow: Send {
    fn is_closed(&self) -> bool;
    fn close(&mut self);
}

/// An open authorization session: the window handle plus the message stream
/// feeding the completion race.
pub struct PopupSession {
    pub window: Box<dyn PopupWindow>,
    pub messages: mpsc::Receiver<PopupMessage>,
}

/// Port for opening the authorization window. The production impl drives the
/// system browser plus a loopback callback listener; tests substitute a fake
/// so the completion race runs without any real window.
pub trait PopupConnector: Send + Sync {
    /// Opening returns an error when the window cannot be created at all
    /// (the popup-blocked case); that is surfaced to the user, never
    /// retried automatically.
    fn open(&self, url: &str, popup: &PopupConfig) -> Result<PopupSession, String>;
}

fn popup_success_html() -> &'static str {
    "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\n\r\n\
    <html>\
    <body style='font-family: sans-serif; text-align: center; padding: 50px;'>\
    <h1 style='color: green;'>Sign-in received</h1>\
    <p>You can close this window and return to Moneta.</p>\
    <script>setTimeout(function() { window.close(); }, 2000);</script>\
    </body>\
    </html>"
}

fn popup_fail_html() -> &'static str {
    "HTTP/1.1 400 Bad Request\r\nContent-Type: text/html; charset=utf-8\r\n\r\n\
    <html>\
    <body style='font-family: sans-serif; text-align: center; padding: 50px;'>\
    <h1 style='color: red;'>Sign-in failed</h1>\
    <p>The sign-in could not be completed. Please return to Moneta and try again.</p>\
    </body>\
    </html>"
}

#[cfg(target_os = "windows")]
fn open_browser_url(url: &str) -> Result<(), String> {
    Command::new("cmd")
        .args(["/C", "start", "", url])
        .spawn()
        .map_err(|e| format!("failed_to_open_browser: {}", e))?;
    Ok(())
}

#[cfg(target_os = "macos")]
fn open_browser_url(url: &str) -> Result<(), String> {
    Command::new("open")
        .arg(url)
        .spawn()
        .map_err(|e| format!("failed_to_open_browser: {}", e))?;
    Ok(())
}

#[cfg(target_os = "linux")]
fn open_browser_url(url: &str) -> Result<(), String> {
    Command::new("xdg-open")
        .arg(url)
        .spawn()
        .map_err(|e| format!("failed_to_open_browser: {}", e))?;
    Ok(())
}

#[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
fn open_browser_url(_url: &str) -> Result<(), String> {
    Err("unsupported_platform_for_auto_browser_open".to_string())
}

struct LoopbackWindow {
    cancel_tx: watch::Sender<bool>,
    closed: Arc<AtomicBool>,
}

impl PopupWindow for LoopbackWindow {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn close(&mut self) {
        let _ = self.cancel_tx.send(true);
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// System-browser implementation of the popup port: binds a loopback
/// listener up front (so the app origin, and with it the redirect URI, is
/// known before the prepare call) and forwards the captured callback URL as
/// an `oauth_success`/`oauth_error` message.
pub struct LoopbackConnector {
    listener: Mutex<Option<TcpListener>>,
    origin: String,
}

impl LoopbackConnector {
    pub async fn bind() -> Result<Self, String> {
        let listener = match TcpListener::bind("127.0.0.1:0").await {
            Ok(l) => l,
            Err(_) => TcpListener::bind("[::1]:0")
                .await
                .map_err(|e| format!("failed_to_bind_local_port: {}", e))?,
        };
        let addr = listener
            .local_addr()
            .map_err(|e| format!("failed_to_get_local_port: {}", e))?;
        let origin = format!("http://{}", addr);
        Ok(Self {
            listener: Mutex::new(Some(listener)),
            origin,
        })
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }
}

fn parse_request_path(request: &str) -> Option<String> {
    let line = request.lines().next()?;
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() >= 2 {
        Some(parts[1].to_string())
    } else {
        None
    }
}

fn callback_error_param(path: &str) -> Option<String> {
    let url = Url::parse(&format!("http://localhost{}", path)).ok()?;
    url.query_pairs()
        .find(|(k, _)| k == "error")
        .map(|(_, v)| v.to_string())
}

impl PopupConnector for LoopbackConnector {
    fn open(&self, url: &str, _popup: &PopupConfig) -> Result<PopupSession, String> {
        let listener = self
            .listener
            .lock()
            .map_err(|_| "loopback_listener_lock_poisoned".to_string())?
            .take()
            .ok_or_else(|| "loopback_listener_already_consumed".to_string())?;

        open_browser_url(url)?;

        let (msg_tx, msg_rx) = mpsc::channel::<PopupMessage>(1);
        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        let closed = Arc::new(AtomicBool::new(false));

        let origin = self.origin.clone();
        let task_closed = closed.clone();
        tokio::spawn(async move {
            let accepted = tokio::select! {
                res = listener.accept() => res.ok(),
                _ = cancel_rx.changed() => None,
            };
            if let Some((mut stream, _)) = accepted {
                let mut buffer = [0u8; 4096];
                let bytes_read = stream.read(&mut buffer).await.unwrap_or(0);
                let request = String::from_utf8_lossy(&buffer[..bytes_read]);

                match parse_request_path(&request) {
                    Some(path) => {
                        let callback_url = format!("{}{}", origin, path);
                        let (payload, response_html) = match callback_error_param(&path) {
                            Some(error) => (
                                json!({
                                    "type": "oauth_error",
                                    "error": error,
                                    "callbackUrl": callback_url,
                                }),
                                popup_fail_html(),
                            ),
                            None => (
                                json!({
                                    "type": "oauth_success",
                                    "callbackUrl": callback_url,
                                }),
                                popup_success_html(),
                            ),
                        };
                        let _ = stream.write_all(response_html.as_bytes()).await;
                        let _ = stream.flush().await;
                        let _ = msg_tx
                            .send(PopupMessage {
                                origin,
                                payload,
                            })
                            .await;
                    }
                    None => {
                        if bytes_read > 0 {
                            logger::log_error(&format!(
                                "[E-AUTH-CALLBACK-PARSE] callback_request_line_unparseable: {}",
                                &request.chars().take(512).collect::<String>()
                            ));
                        }
                        let _ = stream.write_all(popup_fail_html().as_bytes()).await;
                        let _ = stream.flush().await;
                    }
                }
            }
            task_closed.store(true, Ordering::SeqCst);
        });

        Ok(PopupSession {
            window: Box::new(LoopbackWindow { cancel_tx, closed }),
            messages: msg_rx,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request_path() {
        assert_eq!(
            parse_request_path("GET /auth/callback?code=x HTTP/1.1\r\nHost: localhost\r\n"),
            Some("/auth/callback?code=x".to_string())
        );
        assert_eq!(parse_request_path("GARBAGE"), None);
        assert_eq!(parse_request_path(""), None);
    }

    #[test]
    fn test_callback_error_param() {
        assert_eq!(
            callback_error_param("/auth/callback?error=access_denied&state=s"),
            Some("access_denied".to_string())
        );
        assert_eq!(callback_error_param("/auth/callback?code=x&state=s"), None);
    }

    #[tokio::test]
    async fn test_loopback_connector_binds_local_origin() {
        let connector = LoopbackConnector::bind().await.unwrap();
        assert!(connector.origin().starts_with("http://"));
        let port: u16 = connector
            .origin()
            .rsplit(':')
            .next()
            .unwrap()
            .parse()
            .unwrap();
        assert!(port > 0);
    }

    #[tokio::test]
    async fn test_loopback_session_forwards_callback_as_message() {
        let connector = LoopbackConnector::bind().await.unwrap();
        let origin = connector.origin().to_string();

        // The browser launcher may be missing in CI; only assert the message
        // path when the session actually opened.
        let opened = connector.open("http://example.invalid/auth", &PopupConfig::default());
        let Ok(mut session) = opened else {
            return;
        };

        let mut stream = tokio::net::TcpStream::connect(
            origin.trim_start_matches("http://").to_string(),
        )
        .await
        .unwrap();
        stream
            .write_all(b"GET /auth/callback?code=abc&state=oauth_s HTTP/1.1\r\nHost: x\r\n\r\n")
            .await
            .unwrap();
        let msg = session.messages.recv().await.expect("callback message");
        assert_eq!(msg.origin, origin);
        assert_eq!(msg.payload["type"], "oauth_success");
        assert!(msg.payload["callbackUrl"]
            .as_str()
            .unwrap()
            .contains("code=abc"));
    }
}
