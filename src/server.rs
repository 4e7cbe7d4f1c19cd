use anyhow::Result;
use serde_json::json;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::indexer::IndexPipeline;
use crate::scheduler::BackgroundScheduler;

pub struct ServerState {
    pipeline: Arc<IndexPipeline>,
    scheduler: BackgroundScheduler,
}

impl ServerState {
    pub fn new(pipeline: Arc<IndexPipeline>, interval: Duration) -> Self {
        let scheduler = BackgroundScheduler::new(Arc::clone(&pipeline), interval);
        Self {
            pipeline,
            scheduler,
        }
    }

    fn tool_list(&self, id: serde_json::Value) -> serde_json::Value {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "tools": [
                    {
                        "name": "full_index",
                        "description": "Start background indexing for a project: an initial full pass now, then an incremental pass every few minutes. Safe to call repeatedly — it only ensures the workers are running.",
                        "inputSchema": {
                            "type": "object",
                            "properties": {
                                "project_path": { "type": "string", "description": "Absolute path to the project root to index." }
                            },
                            "required": ["project_path"]
                        }
                    },
                    {
                        "name": "status",
                        "description": "Report index state for a project: last index time, current file count, and the live per-file content hashes.",
                        "inputSchema": {
                            "type": "object",
                            "properties": {
                                "project_path": { "type": "string", "description": "Absolute path to the project root." }
                            },
                            "required": ["project_path"]
                        }
                    },
                    {
                        "name": "query",
                        "description": "Semantic search over indexed code blocks. Embeds the query text and returns the nearest blocks with their source, metadata, and distances.",
                        "inputSchema": {
                            "type": "object",
                            "properties": {
                                "project_path": { "type": "string", "description": "Absolute path to the project root." },
                                "text": { "type": "string", "description": "Natural-language description of the code to find." },
                                "top_k": { "type": "integer", "description": "Number of results to return (default 5)." }
                            },
                            "required": ["project_path", "text"]
                        }
                    }
                ]
            }
        })
    }

    fn tool_call(&mut self, id: serde_json::Value, params: &serde_json::Value) -> serde_json::Value {
        let name = params.get("name").and_then(|n| n.as_str()).unwrap_or("");
        let args = params.get("arguments").cloned().unwrap_or(json!({}));

        let payload = match name {
            "full_index" => self.tool_full_index(&args),
            "status" => self.tool_status(&args),
            "query" => self.tool_query(&args),
            other => json!({ "error": format!("Unknown tool: {other}") }),
        };

        let is_error = payload.get("error").is_some();
        let text = serde_json::to_string_pretty(&payload)
            .unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"));
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": { "content": [{"type": "text", "text": text }], "isError": is_error }
        })
    }

    fn project_path_arg(args: &serde_json::Value) -> Result<PathBuf, String> {
        let Some(path) = args.get("project_path").and_then(|v| v.as_str()) else {
            return Err("Missing required parameter 'project_path'.".to_string());
        };
        let path = PathBuf::from(path.trim());
        if !path.is_dir() {
            return Err(format!(
                "Project path '{}' does not exist or is not a directory.",
                path.display()
            ));
        }
        Ok(path)
    }

    fn tool_full_index(&self, args: &serde_json::Value) -> serde_json::Value {
        match Self::project_path_arg(args) {
            Ok(root) => {
                self.scheduler.start_auto_indexing(&root);
                json!({
                    "status": "ok",
                    "message": "Full indexing ensured (started in background if not present)"
                })
            }
            Err(e) => json!({ "error": e }),
        }
    }

    fn tool_status(&self, args: &serde_json::Value) -> serde_json::Value {
        match Self::project_path_arg(args) {
            Ok(root) => match self.pipeline.status(&root) {
                Ok(status) => status,
                Err(e) => json!({ "error": e.to_string() }),
            },
            Err(e) => json!({ "error": e }),
        }
    }

    fn tool_query(&self, args: &serde_json::Value) -> serde_json::Value {
        let root = match Self::project_path_arg(args) {
            Ok(root) => root,
            Err(e) => return json!({ "error": e }),
        };
        let Some(text) = args.get("text").and_then(|v| v.as_str()).filter(|s| !s.trim().is_empty())
        else {
            return json!({ "error": "Missing required parameter 'text'." });
        };
        let top_k = args
            .get("top_k")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
            .filter(|n| *n > 0)
            .unwrap_or(5);

        match self.pipeline.query(&root, text, top_k) {
            Ok(result) => serde_json::to_value(&result)
                .unwrap_or_else(|e| json!({ "error": e.to_string() })),
            Err(e) => json!({ "error": e.to_string() }),
        }
    }
}

pub fn run_stdio_server(pipeline: Arc<IndexPipeline>) -> Result<()> {
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();

    let interval = Duration::from_secs(pipeline.config().index_interval_secs);
    let mut state = ServerState::new(pipeline, interval);

    for line in stdin.lock().lines() {
        let Ok(line) = line else { continue };
        if line.trim().is_empty() {
            continue;
        }

        let msg: serde_json::Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(_) => continue,
        };

        // JSON-RPC notifications have no "id" field — don't respond.
        let has_id = msg.get("id").is_some();
        if !has_id {
            continue;
        }

        let id = msg.get("id").cloned().unwrap_or(json!(null));
        let method = msg.get("method").and_then(|m| m.as_str()).unwrap_or("");

        let reply = match method {
            "initialize" => json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "protocolVersion": msg.get("params").and_then(|p| p.get("protocolVersion")).cloned().unwrap_or(json!("2024-11-05")),
                    "capabilities": { "tools": { "listChanged": true } },
                    "serverInfo": { "name": "semdex", "version": env!("CARGO_PKG_VERSION") }
                }
            }),
            "ping" => json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {}
            }),
            "tools/list" => state.tool_list(id),
            "tools/call" => {
                let params = msg.get("params").cloned().unwrap_or(json!({}));
                state.tool_call(id, &params)
            }
            // Return empty lists for resources/prompts — we don't implement them.
            "resources/list" => json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": { "resources": [] }
            }),
            "prompts/list" => json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": { "prompts": [] }
            }),
            _ => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32601, "message": format!("Method not found: {method}") }
            }),
        };

        writeln!(stdout, "{}", reply)?;
        stdout.flush()?;
    }

    // stdin closed: the host is shutting us down. Stop the periodic worker
    // so in-flight passes finish before the process exits.
    state.scheduler.stop();

    Ok(())
}
