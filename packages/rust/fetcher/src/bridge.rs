//! Render bridge: a browser automation subprocess driven over JSON lines.
//!
//! The bridge is any executable (typically a Playwright script) that reads
//! one JSON request per line on stdin and answers one JSON response per line
//! on stdout. It is launched with `--profile-dir <dir>` and must keep a
//! persistent browser profile there, relaunching the browser in headed or
//! headless mode as each request asks, so both modes share cookies, storage
//! and fingerprint.
//!
//! ```text
//! <- {"type":"ready"}
//! -> {"type":"render","id":"req-1","url":"https://…","headless":true,"wait_until":"networkidle","timeout_ms":45000,"settle_ms":2000,"viewport":[1920,1920]}
//! <- {"type":"result","id":"req-1","page":{"html":"…","status":200,"final_url":"https://…"}}
//! <- {"type":"error","id":"req-1","error":"net::ERR_NAME_NOT_RESOLVED"}
//! -> {"type":"shutdown"}
//! ```

use std::path::Path;
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

use porter_shared::{BrowserConfig, PorterError, Result};

use crate::page::RawPage;

// ---------------------------------------------------------------------------
// Protocol types
// ---------------------------------------------------------------------------

/// Request message sent to the bridge.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RequestMessage<'a> {
    Render {
        id: String,
        url: &'a str,
        headless: bool,
        wait_until: &'a str,
        timeout_ms: u64,
        settle_ms: u64,
        viewport: [u32; 2],
    },
    Shutdown,
}

/// Response message received from the bridge.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseMessage {
    Ready,
    Result { id: String, page: RenderedPage },
    Error { id: String, error: String },
}

/// Page content as rendered by the browser.
#[derive(Debug, Clone, Deserialize)]
struct RenderedPage {
    html: String,
    #[serde(default)]
    status: Option<u16>,
    #[serde(default)]
    final_url: Option<String>,
}

/// Parameters of a single render.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RenderRequest<'a> {
    pub url: &'a str,
    pub headless: bool,
    pub timeout_ms: u64,
}

// ---------------------------------------------------------------------------
// Bridge handle
// ---------------------------------------------------------------------------

/// Handle to a spawned render bridge subprocess.
pub(crate) struct RenderBridge {
    child: Child,
    stdin: ChildStdin,
    lines: Lines<BufReader<ChildStdout>>,
    request_counter: u64,
    wait_until: String,
    settle_ms: u64,
    viewport: [u32; 2],
}

impl RenderBridge {
    /// Spawn the bridge and wait for its ready message.
    pub(crate) async fn spawn(config: &BrowserConfig, profile_dir: &Path) -> Result<Self> {
        info!(cmd = %config.command, profile = %profile_dir.display(), "spawning render bridge");

        std::fs::create_dir_all(profile_dir).map_err(|e| PorterError::io(profile_dir, e))?;

        let mut child = Command::new(&config.command)
            .args(&config.args)
            .arg("--profile-dir")
            .arg(profile_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit()) // Bridge logs go to parent stderr
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                PorterError::Render(format!(
                    "failed to spawn render bridge: {e}. Is `{}` installed?",
                    config.command
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PorterError::Render("failed to capture bridge stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PorterError::Render("failed to capture bridge stdout".into()))?;

        let mut bridge = Self {
            child,
            stdin,
            lines: BufReader::new(stdout).lines(),
            request_counter: 0,
            wait_until: config.wait_until.clone(),
            settle_ms: config.settle_ms,
            viewport: config.viewport,
        };

        match bridge.recv().await? {
            ResponseMessage::Ready => {
                debug!("render bridge is ready");
                Ok(bridge)
            }
            other => Err(PorterError::Render(format!(
                "expected ready message, got: {other:?}"
            ))),
        }
    }

    /// Render one page and wait for the response.
    pub(crate) async fn render(&mut self, request: RenderRequest<'_>) -> Result<RawPage> {
        self.request_counter += 1;
        let id = format!("req-{}", self.request_counter);

        let message = RequestMessage::Render {
            id: id.clone(),
            url: request.url,
            headless: request.headless,
            wait_until: &self.wait_until,
            timeout_ms: request.timeout_ms,
            settle_ms: self.settle_ms,
            viewport: self.viewport,
        };
        let json = serde_json::to_string(&message)
            .map_err(|e| PorterError::Render(format!("failed to serialize request: {e}")))?;
        self.send_line(&json).await?;

        match self.recv().await? {
            ResponseMessage::Result { id: resp_id, page } if resp_id == id => Ok(RawPage {
                html: page.html,
                status: page.status,
                final_url: page.final_url,
            }),
            ResponseMessage::Error { id: resp_id, error } if resp_id == id => {
                Err(PorterError::Render(error))
            }
            other => Err(PorterError::Render(format!(
                "out-of-sequence bridge message for {id}: {other:?}"
            ))),
        }
    }

    /// Send shutdown and wait for the bridge to exit.
    pub(crate) async fn shutdown(mut self) {
        if let Ok(json) = serde_json::to_string(&RequestMessage::Shutdown) {
            let _ = self.send_line(&json).await;
        }
        match self.child.wait().await {
            Ok(status) => info!(?status, "render bridge exited"),
            Err(e) => warn!("render bridge wait error: {e}"),
        }
    }

    async fn send_line(&mut self, json: &str) -> Result<()> {
        self.stdin
            .write_all(format!("{json}\n").as_bytes())
            .await
            .map_err(|e| PorterError::Render(format!("failed to write to bridge stdin: {e}")))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| PorterError::Render(format!("failed to flush bridge stdin: {e}")))
    }

    async fn recv(&mut self) -> Result<ResponseMessage> {
        let line = self
            .lines
            .next_line()
            .await
            .map_err(|e| PorterError::Render(format!("bridge read error: {e}")))?
            .ok_or_else(|| PorterError::Render("bridge closed stdout unexpectedly".into()))?;

        serde_json::from_str(line.trim()).map_err(|e| {
            let preview: String = line.chars().take(200).collect();
            PorterError::Render(format!("invalid bridge message: {e} (got: {preview})"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_request_serializes() {
        let msg = RequestMessage::Render {
            id: "req-1".into(),
            url: "https://example.com/",
            headless: false,
            wait_until: "networkidle",
            timeout_ms: 5000,
            settle_ms: 2000,
            viewport: [1920, 1920],
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"render""#));
        assert!(json.contains(r#""headless":false"#));
        assert!(json.contains(r#""viewport":[1920,1920]"#));

        let json = serde_json::to_string(&RequestMessage::Shutdown).unwrap();
        assert_eq!(json, r#"{"type":"shutdown"}"#);
    }

    #[test]
    fn response_messages_deserialize() {
        let msg: ResponseMessage = serde_json::from_str(r#"{"type":"ready"}"#).unwrap();
        assert!(matches!(msg, ResponseMessage::Ready));

        let msg: ResponseMessage = serde_json::from_str(
            r#"{"type":"result","id":"req-2","page":{"html":"<p>x</p>","status":200}}"#,
        )
        .unwrap();
        match msg {
            ResponseMessage::Result { id, page } => {
                assert_eq!(id, "req-2");
                assert_eq!(page.status, Some(200));
                assert_eq!(page.final_url, None);
            }
            other => panic!("unexpected {other:?}"),
        }

        let msg: ResponseMessage =
            serde_json::from_str(r#"{"type":"error","id":"req-3","error":"timeout"}"#).unwrap();
        assert!(matches!(msg, ResponseMessage::Error { .. }));
    }

    #[cfg(unix)]
    fn script_config(script: &str) -> BrowserConfig {
        BrowserConfig {
            command: "sh".into(),
            args: vec!["-c".into(), script.into()],
            ..BrowserConfig::default()
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn renders_through_subprocess() {
        let script = r#"echo '{"type":"ready"}'
read line
echo '{"type":"result","id":"req-1","page":{"html":"<h1>Rendered</h1>","status":200,"final_url":"https://example.com/"}}'
read line"#;
        let profile = std::env::temp_dir().join(format!("porter-bridge-{}", std::process::id()));
        let mut bridge = RenderBridge::spawn(&script_config(script), &profile)
            .await
            .expect("spawn bridge");

        let page = bridge
            .render(RenderRequest {
                url: "https://example.com/",
                headless: true,
                timeout_ms: 1000,
            })
            .await
            .expect("render");
        assert_eq!(page.html, "<h1>Rendered</h1>");
        assert_eq!(page.status, Some(200));

        bridge.shutdown().await;
        let _ = std::fs::remove_dir_all(&profile);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn bridge_error_is_render_error() {
        let script = r#"echo '{"type":"ready"}'
read line
echo '{"type":"error","id":"req-1","error":"navigation failed"}'
read line"#;
        let profile = std::env::temp_dir().join(format!("porter-bridge-err-{}", std::process::id()));
        let mut bridge = RenderBridge::spawn(&script_config(script), &profile)
            .await
            .expect("spawn bridge");

        let err = bridge
            .render(RenderRequest {
                url: "https://example.com/",
                headless: true,
                timeout_ms: 1000,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PorterError::Render(ref m) if m == "navigation failed"));

        bridge.shutdown().await;
        let _ = std::fs::remove_dir_all(&profile);
    }

    #[tokio::test]
    async fn missing_executable_fails_to_spawn() {
        let config = BrowserConfig {
            command: "porter-definitely-not-a-real-binary".into(),
            args: Vec::new(),
            ..BrowserConfig::default()
        };
        let profile = std::env::temp_dir().join("porter-bridge-missing");
        let err = RenderBridge::spawn(&config, &profile).await.err().expect("spawn fails");
        assert!(err.to_string().contains("failed to spawn render bridge"));
        let _ = std::fs::remove_dir_all(&profile);
    }
}
