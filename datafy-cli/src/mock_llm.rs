//! Mock text-generation server for offline end-to-end runs.
//!
//! Speaks the Ollama `/api/generate` protocol and the OpenAI chat protocol
//! and answers with canned replies chosen by the keywords of the request it
//! finds inside the prompt.

use anyhow::Result;
use datafy_core::chart_config::ChartType;
use datafy_core::intent::{Intent, StatisticalType};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};
use warp::Filter;

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerateResponse {
    pub model: String,
    pub response: String,
    pub done: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Which of the three generation prompts the server is looking at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    Classification,
    ChartConfiguration,
    Program,
    Unknown,
}

impl PromptKind {
    pub fn detect(prompt: &str) -> Self {
        if prompt.starts_with("Classify the following") {
            PromptKind::Classification
        } else if prompt.contains("appropriate chart configuration") {
            PromptKind::ChartConfiguration
        } else if prompt.starts_with("Write an operation program") {
            PromptKind::Program
        } else {
            PromptKind::Unknown
        }
    }
}

#[derive(Default)]
pub struct MockLlmServer {
    requests: AtomicU64,
}

impl MockLlmServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Canned reply for one prompt
    pub fn reply(&self, prompt: &str) -> String {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let request = labelled_line(prompt, "Request:").unwrap_or_default();
        let column_line = labelled_line(prompt, "Available columns:").unwrap_or_default();
        let columns: Vec<&str> = column_line
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .collect();

        let kind = PromptKind::detect(prompt);
        debug!(?kind, request = %request, "Mock reply");
        match kind {
            PromptKind::Classification => classification_reply(&request),
            PromptKind::ChartConfiguration => chart_reply(&request, &columns),
            PromptKind::Program => program_reply(prompt, &columns),
            PromptKind::Unknown => "I can only help with analytics requests.".to_string(),
        }
    }

    pub fn routes(
        self: Arc<Self>,
    ) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
        let generate_server = self.clone();
        let generate = warp::path!("api" / "generate")
            .and(warp::post())
            .and(warp::body::json())
            .and(warp::any().map(move || generate_server.clone()))
            .and_then(handle_generate);

        let chat_server = self.clone();
        let chat = warp::path!("v1" / "chat" / "completions")
            .and(warp::post())
            .and(warp::body::json())
            .and(warp::any().map(move || chat_server.clone()))
            .and_then(handle_chat);

        let health = warp::path("health").and(warp::get()).map(move || {
            warp::reply::json(&json!({
                "status": "healthy",
                "requests": self.request_count(),
            }))
        });

        generate.or(chat).or(health)
    }

    /// Bind to `addr` and return the bound address plus the serving future
    pub fn bind(
        self: Arc<Self>,
        addr: SocketAddr,
    ) -> (SocketAddr, impl std::future::Future<Output = ()> + Send + 'static) {
        warp::serve(self.routes()).bind_ephemeral(addr)
    }
}

async fn handle_generate(
    request: GenerateRequest,
    server: Arc<MockLlmServer>,
) -> Result<impl warp::Reply, Infallible> {
    let response = GenerateResponse {
        response: server.reply(&request.prompt),
        model: request.model,
        done: true,
    };
    Ok(warp::reply::json(&response))
}

async fn handle_chat(
    request: ChatRequest,
    server: Arc<MockLlmServer>,
) -> Result<impl warp::Reply, Infallible> {
    let prompt = request
        .messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .map(|m| m.content.as_str())
        .unwrap_or_default();
    let content = server.reply(prompt);
    Ok(warp::reply::json(&json!({
        "model": request.model,
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }]
    })))
}

fn labelled_line(prompt: &str, label: &str) -> Option<String> {
    prompt
        .lines()
        .find_map(|line| line.strip_prefix(label))
        .map(|rest| rest.trim().to_string())
}

fn classification_reply(request: &str) -> String {
    let intent = Intent::heuristic(request);
    let mut reply = json!({
        "intent": intent.kind().to_string(),
        "reason": "mock reply based on request keywords",
        "confidence": 0.75,
    });
    let (key, value) = match &intent {
        Intent::Visualization { chart_type, .. } => ("visualization_type", json!(chart_type)),
        Intent::Transformation { operation, .. } => ("transformation_type", json!(operation)),
        Intent::Statistical { test, .. } => ("statistical_type", json!(test)),
    };
    reply[key] = value;
    reply.to_string()
}

fn chart_reply(request: &str, columns: &[&str]) -> String {
    let chart_type = match Intent::heuristic(request) {
        Intent::Visualization { chart_type, .. } => chart_type,
        _ => ChartType::Bar,
    };
    let aggregation = match chart_type {
        ChartType::Scatter | ChartType::Line => "none",
        _ => "sum",
    };
    let x_axis = columns.first().copied().unwrap_or("x");
    let y_axis = columns.get(1).copied().unwrap_or(x_axis);

    format!(
        "```json\n{}\n```",
        json!({
            "chart_type": chart_type,
            "x_axis": x_axis,
            "y_axis": y_axis,
            "aggregation": aggregation,
            "title": format!("{} by {}", y_axis, x_axis),
        })
    )
}

fn program_reply(prompt: &str, columns: &[&str]) -> String {
    let statistical = prompt.starts_with("Write an operation program for the following statistical");
    let request = labelled_line(prompt, "Request:").unwrap_or_default();

    let step: Value = if statistical {
        let op = match Intent::heuristic(&request) {
            Intent::Statistical {
                test: StatisticalType::Correlation,
                ..
            } => json!({"op": "correlation"}),
            _ => json!({"op": "describe"}),
        };
        json!({"assign": "stat_result", "from": "df", "ops": [op]})
    } else {
        let mut ops = Vec::new();
        if let Some(first) = columns.first() {
            ops.push(json!({"op": "sort", "by": [first], "descending": false}));
        }
        ops.push(json!({"op": "limit", "n": 100}));
        json!({"assign": "transformed_df", "from": "df", "ops": ops})
    };
    json!({ "steps": [step] }).to_string()
}

/// Run the mock server until interrupted
pub async fn start_mock_server(port: u16) -> Result<()> {
    let server = Arc::new(MockLlmServer::new());
    let (addr, serving) = server.bind(([127, 0, 0, 1], port).into());
    info!("Mock LLM server listening on http://{}", addr);
    println!("Mock LLM server listening on http://{}", addr);

    tokio::select! {
        _ = serving => {}
        _ = tokio::signal::ctrl_c() => info!("Shutting down mock server"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use datafy_core::extraction::extract_json;
    use datafy_core::program::Program;

    fn prompt(head: &str, request: &str) -> String {
        format!("{}\n\nRequest: {}\n\nAvailable columns: region, sales\n", head, request)
    }

    #[test]
    fn test_detects_prompt_kinds() {
        assert_eq!(
            PromptKind::detect("Classify the following analytics request as ..."),
            PromptKind::Classification
        );
        assert_eq!(
            PromptKind::detect("Based on the following request, determine the appropriate chart configuration."),
            PromptKind::ChartConfiguration
        );
        assert_eq!(
            PromptKind::detect("Write an operation program for the following transformation request (r)."),
            PromptKind::Program
        );
        assert_eq!(PromptKind::detect("hello"), PromptKind::Unknown);
    }

    #[test]
    fn test_classification_follows_keywords() {
        let server = MockLlmServer::new();
        let reply = server.reply(&prompt("Classify the following analytics request", "pie of sales by region"));
        let value = extract_json(&reply).unwrap();

        assert_eq!(value["intent"], "visualization");
        assert_eq!(value["visualization_type"], "pie");
        assert_eq!(server.request_count(), 1);
    }

    #[test]
    fn test_chart_reply_uses_columns() {
        let server = MockLlmServer::new();
        let reply = server.reply(&prompt(
            "Based on the following request, determine the appropriate chart configuration.",
            "bar chart of sales",
        ));
        let value = extract_json(&reply).unwrap();

        assert_eq!(value["x_axis"], "region");
        assert_eq!(value["y_axis"], "sales");
        assert_eq!(value["aggregation"], "sum");
    }

    #[test]
    fn test_program_reply_parses() {
        let server = MockLlmServer::new();
        let reply = server.reply(&prompt(
            "Write an operation program for the following statistical request (r).",
            "correlation between columns",
        ));
        let program = Program::parse(&reply).unwrap();
        assert!(program.assigns("stat_result"));

        let reply = server.reply(&prompt(
            "Write an operation program for the following transformation request (r).",
            "sort it",
        ));
        let program = Program::parse(&reply).unwrap();
        assert!(program.assigns("transformed_df"));
        assert_eq!(program.operation_count(), 2);
    }
}
