//! Day-summary relay
//!
//! Fetches each conversation's transcript for one day from the backend,
//! renders it to plain text, forwards it to the remote summarizer, and
//! re-emits the summarizer's streamed output as ordered progress events.
//! Conversations are processed strictly in caller order; within one
//! conversation, events follow byte-arrival order. There is no rollback of
//! progress already emitted when a later conversation fails.

pub mod ndjson;

use futures::StreamExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::env;
use std::time::Duration;
use tauri::{AppHandle, Emitter, State};
use thiserror::Error;
use tracing::{info, warn};
use ulid::Ulid;

use crate::backend::supervisor::{ADDR_ENV, DEFAULT_ADDR};
use crate::config::ConfigStore;
use self::ndjson::LineBuffer;

/// Fixed external summarization webhook.
pub const SUMMARY_WEBHOOK_URL: &str =
    "https://n8n-preview.beqlee.icu/webhook/b2199135-477f-4fab-b45e-dfd21ef1f86b";

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("Chat log fetch failed: {status} {detail}")]
    ChatlogFetch { status: u16, detail: String },
    #[error("Summarizer request failed: {status} {detail}")]
    Summarizer { status: u16, detail: String },
    #[error("HTTP error: {0}")]
    Http(String),
}

impl Serialize for RelayError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        RelayError::Http(err.to_string())
    }
}

/// One summarize invocation: a day plus one or more conversations.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SummarizeRequest {
    pub date: String,
    pub talker: Option<String>,
    pub talkers: Option<String>,
    pub prompt: Option<String>,
    pub request_id: Option<String>,
}

/// One chat message as returned by the backend query endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Message {
    pub time: Option<String>,
    pub talker: Option<String>,
    pub talker_name: Option<String>,
    pub sender: Option<String>,
    pub sender_name: Option<String>,
    pub content: Option<String>,
}

/// Ordered progress events delivered to the caller's sink.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    GroupStarted {
        index: usize,
        total: usize,
        talker: String,
        name: String,
    },
    Progress {
        content: String,
    },
}

/// Deduplicated, trimmed union of the single-talker field and the
/// comma-separated list, original order preserved.
pub fn collect_talkers(talker: Option<&str>, talkers: Option<&str>) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    let single = talker.unwrap_or("");
    let csv = talkers.unwrap_or("");
    for id in std::iter::once(single).chain(csv.split(',')) {
        let id = id.trim();
        if !id.is_empty() && !ids.iter().any(|seen| seen == id) {
            ids.push(id.to_string());
        }
    }
    ids
}

/// Fail fast on bad input; nothing touches the network before this passes.
pub fn validate(req: &SummarizeRequest) -> Result<Vec<String>, RelayError> {
    if req.date.trim().is_empty() {
        return Err(RelayError::InvalidInput("A date must be selected".to_string()));
    }
    let talkers = collect_talkers(req.talker.as_deref(), req.talkers.as_deref());
    if talkers.is_empty() {
        return Err(RelayError::InvalidInput(
            "At least one conversation must be given".to_string(),
        ));
    }
    Ok(talkers)
}

fn format_timestamp(raw: &str) -> String {
    match chrono::DateTime::parse_from_rfc3339(raw) {
        Ok(ts) => ts.format("%Y-%m-%d %H:%M:%S").to_string(),
        Err(_) => raw.to_string(),
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Render one message as `timestamp [room] sender: content` with runs of
/// whitespace collapsed.
pub fn format_message_line(msg: &Message) -> String {
    let ts = msg.time.as_deref().map(format_timestamp).unwrap_or_default();
    let room = msg
        .talker_name
        .as_deref()
        .filter(|s| !s.is_empty())
        .or(msg.talker.as_deref())
        .unwrap_or("");
    let sender = msg
        .sender_name
        .as_deref()
        .filter(|s| !s.is_empty())
        .or(msg.sender.as_deref())
        .unwrap_or("");
    let content = collapse_whitespace(msg.content.as_deref().unwrap_or(""));
    let prefix = if room.is_empty() {
        String::new()
    } else {
        format!("[{room}] ")
    };
    format!("{ts} {prefix}{sender}: {content}").trim().to_string()
}

pub fn render_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(format_message_line)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Correlation id for callers that did not supply one: timestamp plus
/// randomness, unique across concurrent requests.
fn new_request_id() -> String {
    Ulid::new().to_string()
}

/// Global relay client. No total request timeout: summarizer streams run
/// for as long as the model talks.
static CLIENT: RwLock<Option<reqwest::Client>> = RwLock::new(None);

fn get_client() -> reqwest::Client {
    {
        let client = CLIENT.read();
        if let Some(ref c) = *client {
            return c.clone();
        }
    }

    let mut client = CLIENT.write();
    if client.is_none() {
        let built = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        *client = Some(built);
    }
    client.as_ref().unwrap().clone()
}

/// Run the relay for one request, delivering events through `emit`.
/// Conversations are fetched and summarized strictly sequentially.
pub async fn run_relay<F>(
    client: &reqwest::Client,
    base: &str,
    webhook: &str,
    req: &SummarizeRequest,
    mut emit: F,
) -> Result<(), RelayError>
where
    F: FnMut(RelayEvent),
{
    let talkers = validate(req)?;
    let total = talkers.len();
    let date = req.date.trim();

    for (i, talker) in talkers.iter().enumerate() {
        let resp = client
            .get(format!("{base}/api/v1/chatlog"))
            .query(&[("format", "json"), ("time", date), ("talker", talker.as_str())])
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            return Err(RelayError::ChatlogFetch {
                status: status.as_u16(),
                detail: status.canonical_reason().unwrap_or("").to_string(),
            });
        }
        let messages: Vec<Message> = resp.json().await?;

        let name = messages
            .first()
            .and_then(|m| m.talker_name.clone())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| talker.clone());
        emit(RelayEvent::GroupStarted {
            index: i + 1,
            total,
            talker: talker.clone(),
            name: name.clone(),
        });
        emit(RelayEvent::Progress {
            content: format!("\n\n## 群：{name}\n\n"),
        });

        let transcript = render_transcript(&messages);
        let body = json!({
            "prompt": req.prompt.clone().unwrap_or_default(),
            "message": transcript,
        });
        let resp = client.post(webhook).json(&body).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            return Err(RelayError::Summarizer {
                status: status.as_u16(),
                detail: status.canonical_reason().unwrap_or("").to_string(),
            });
        }

        // Streamed and buffered transports decode through the same
        // line buffer, in byte-arrival order.
        let mut buffer = LineBuffer::new();
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            for piece in buffer.push(&chunk) {
                emit(RelayEvent::Progress { content: piece });
            }
        }
        if let Some(piece) = buffer.finish() {
            emit(RelayEvent::Progress { content: piece });
        }
    }

    Ok(())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GroupEvent {
    request_id: String,
    index: usize,
    total: usize,
    talker: String,
    name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProgressEvent {
    request_id: String,
    content: String,
}

// ============ TAURI COMMANDS ============

#[tauri::command]
pub async fn summarize_day(
    app: AppHandle,
    store: State<'_, ConfigStore>,
    payload: SummarizeRequest,
) -> Result<(), RelayError> {
    let request_id = payload
        .request_id
        .clone()
        .filter(|id| !id.is_empty())
        .unwrap_or_else(new_request_id);
    let addr = store
        .server()
        .addr
        .filter(|a| !a.is_empty())
        .or_else(|| env::var(ADDR_ENV).ok().filter(|a| !a.is_empty()))
        .unwrap_or_else(|| DEFAULT_ADDR.to_string());
    let base = format!("http://{addr}");
    info!(request_id = %request_id, date = %payload.date, "Summarize request");

    let client = get_client();
    let result = run_relay(&client, &base, SUMMARY_WEBHOOK_URL, &payload, |event| {
        // Delivery is best-effort; a closed webview must not abort the run.
        match event {
            RelayEvent::GroupStarted {
                index,
                total,
                talker,
                name,
            } => {
                let _ = app.emit(
                    "summarize:group",
                    GroupEvent {
                        request_id: request_id.clone(),
                        index,
                        total,
                        talker,
                        name,
                    },
                );
            }
            RelayEvent::Progress { content } => {
                let _ = app.emit(
                    "summarize:progress",
                    ProgressEvent {
                        request_id: request_id.clone(),
                        content,
                    },
                );
            }
        }
    })
    .await;

    if let Err(err) = &result {
        warn!(request_id = %request_id, error = %err, "Summarize request failed");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn talkers_union_is_trimmed_and_deduplicated_in_order() {
        assert_eq!(
            collect_talkers(Some(" a "), Some("a, b ,,c")),
            vec!["a", "b", "c"]
        );
        assert_eq!(collect_talkers(None, Some("x,y")), vec!["x", "y"]);
        assert!(collect_talkers(Some("  "), Some(" , ")).is_empty());
    }

    #[test]
    fn validation_rejects_missing_date_or_talkers() {
        let req = SummarizeRequest {
            date: "  ".to_string(),
            talker: Some("a".to_string()),
            ..Default::default()
        };
        assert!(matches!(validate(&req), Err(RelayError::InvalidInput(_))));

        let req = SummarizeRequest {
            date: "2024-05-01".to_string(),
            ..Default::default()
        };
        assert!(matches!(validate(&req), Err(RelayError::InvalidInput(_))));
    }

    #[test]
    fn message_lines_carry_room_prefix_and_collapsed_content() {
        let msg = Message {
            time: Some("2024-05-01T12:30:00+08:00".to_string()),
            talker_name: Some("Team".to_string()),
            sender_name: Some("Ann".to_string()),
            content: Some("  hello \n\t world ".to_string()),
            ..Default::default()
        };
        assert_eq!(
            format_message_line(&msg),
            "2024-05-01 12:30:00 [Team] Ann: hello world"
        );
    }

    #[test]
    fn message_lines_without_room_omit_the_prefix() {
        let msg = Message {
            sender: Some("wxid_1".to_string()),
            content: Some("hi".to_string()),
            ..Default::default()
        };
        assert_eq!(format_message_line(&msg), "wxid_1: hi");
    }

    #[test]
    fn unparseable_timestamps_pass_through_raw() {
        let msg = Message {
            time: Some("yesterday".to_string()),
            sender: Some("s".to_string()),
            content: Some("x".to_string()),
            ..Default::default()
        };
        assert_eq!(format_message_line(&msg), "yesterday s: x");
    }

    #[test]
    fn transcripts_join_lines_with_newlines() {
        let messages = vec![
            Message {
                sender: Some("a".to_string()),
                content: Some("one".to_string()),
                ..Default::default()
            },
            Message {
                sender: Some("b".to_string()),
                content: Some("two".to_string()),
                ..Default::default()
            },
        ];
        assert_eq!(render_transcript(&messages), "a: one\nb: two");
    }

    #[tokio::test]
    async fn relay_fails_validation_before_any_request_is_made() {
        let client = reqwest::Client::new();
        let req = SummarizeRequest {
            date: String::new(),
            talker: Some("a".to_string()),
            ..Default::default()
        };
        // An unroutable base would surface as an HTTP error; InvalidInput
        // proves the relay never got that far.
        let err = run_relay(&client, "http://127.0.0.1:1", "http://127.0.0.1:1", &req, |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::InvalidInput(_)));
    }

    /// Minimal HTTP server: answers chat-log queries with one canned
    /// message and everything else with one NDJSON item, closing the
    /// connection after each response.
    async fn serve_canned(listener: tokio::net::TcpListener, requests: usize) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        for _ in 0..requests {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut data = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                data.extend_from_slice(&buf[..n]);
                if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
                    let head = String::from_utf8_lossy(&data[..pos]).to_ascii_lowercase();
                    let body_len = head
                        .lines()
                        .find_map(|l| l.strip_prefix("content-length:"))
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if data.len() >= pos + 4 + body_len {
                        break;
                    }
                }
            }
            let head = String::from_utf8_lossy(&data);
            let body = if head.starts_with("GET") {
                r#"[{"talkerName":"Room","senderName":"Ann","content":"hi"}]"#
            } else {
                "{\"type\":\"item\",\"content\":\"sum\"}\n"
            };
            let resp = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            socket.write_all(resp.as_bytes()).await.unwrap();
        }
    }

    #[tokio::test]
    async fn relay_emits_one_group_event_per_talker_in_order() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Two talkers: one transcript fetch plus one webhook call each.
        let server = tokio::spawn(serve_canned(listener, 4));

        let base = format!("http://{addr}");
        let req = SummarizeRequest {
            date: "2024-05-01".to_string(),
            talkers: Some("a,b".to_string()),
            ..Default::default()
        };
        let client = reqwest::Client::new();
        let mut events = Vec::new();
        run_relay(&client, &base, &base, &req, |event| events.push(event))
            .await
            .unwrap();
        server.await.unwrap();

        let groups: Vec<(usize, &RelayEvent)> = events
            .iter()
            .enumerate()
            .filter(|(_, e)| matches!(e, RelayEvent::GroupStarted { .. }))
            .collect();
        assert_eq!(groups.len(), 2);
        assert_eq!(
            *groups[0].1,
            RelayEvent::GroupStarted {
                index: 1,
                total: 2,
                talker: "a".to_string(),
                name: "Room".to_string(),
            }
        );
        assert_eq!(
            *groups[1].1,
            RelayEvent::GroupStarted {
                index: 2,
                total: 2,
                talker: "b".to_string(),
                name: "Room".to_string(),
            }
        );
        // Nothing from group 2 appears before its group event.
        assert!(events[..groups[1].0]
            .iter()
            .skip(groups[0].0 + 1)
            .all(|e| matches!(e, RelayEvent::Progress { .. })));
        // Each group produced its heading and one summarizer item.
        let contents: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                RelayEvent::Progress { content } => Some(content.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(contents.iter().filter(|c| **c == "sum").count(), 2);
    }
}
