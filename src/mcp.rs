//! MCP stdio JSON-RPC server: exposes every `MemoryCore` operation as a
//! tool, one line of JSON in, one line of JSON out per request.

use std::collections::BTreeSet;

use anyhow::Result;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::block::InformationType;
use crate::orchestrator::MemoryCore;
use crate::decay::DecayPolicy;
use crate::retriever::{RetrievalMode, RetrieveOptions};

const TOOL_NAMES: &[&str] = &[
    "memory_record",
    "memory_encode",
    "memory_link",
    "memory_retrieve",
    "memory_reflect",
    "memory_compress",
    "memory_decay",
    "memory_materialize_context",
    "memory_list_blocks",
    "memory_reindex_all",
    "memory_reset_vectors",
];

pub async fn run_mcp(core: &MemoryCore) -> Result<()> {
    let stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(stdin).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let msg: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(_) => continue,
        };

        let id = msg.get("id").cloned();
        let method = msg.get("method").and_then(|m| m.as_str()).unwrap_or("");

        let reply = match method {
            "initialize" => json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "protocolVersion": msg.get("params").and_then(|p| p.get("protocolVersion")).cloned().unwrap_or(json!("2024-11-05")),
                    "capabilities": { "tools": { "listChanged": true } },
                    "serverInfo": { "name": "memory-core", "version": env!("CARGO_PKG_VERSION") }
                }
            }),
            "tools/list" => json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": { "tools": tool_definitions() }
            }),
            "tools/call" => {
                let params = msg.get("params").cloned().unwrap_or(json!({}));
                let name = params.get("name").and_then(|n| n.as_str()).unwrap_or("");
                let args = params.get("arguments").cloned().unwrap_or(json!({}));
                call_tool(core, name, args, id.clone()).await
            }
            _ => error_reply(id, "method not supported"),
        };

        stdout.write_all(reply.to_string().as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }

    Ok(())
}

fn tool_definitions() -> Value {
    json!([
        {
            "name": "memory_record",
            "description": "Create and persist a new knowledge block",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "title": { "type": "string" },
                    "body": { "type": "string" },
                    "tags": { "type": "array", "items": { "type": "string" } },
                    "information_type": { "type": "string", "enum": ["static", "semi-static", "dynamic", "ephemeral"] }
                },
                "required": ["title", "body"]
            }
        },
        {
            "name": "memory_encode",
            "description": "Embed a block and upsert it into the vector index",
            "inputSchema": { "type": "object", "properties": { "id": { "type": "string" } }, "required": ["id"] }
        },
        {
            "name": "memory_link",
            "description": "Create an explicit relationship between two blocks",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "source_id": { "type": "string" },
                    "target_id": { "type": "string" },
                    "kind": { "type": "string" },
                    "weight": { "type": "number" }
                },
                "required": ["source_id", "target_id", "kind"]
            }
        },
        {
            "name": "memory_retrieve",
            "description": "Hybrid dense + sparse retrieval over knowledge blocks",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "query": { "type": "string" },
                    "top_k": { "type": "integer", "exclusiveMinimum": 0 },
                    "boost": { "type": "array", "items": { "type": "string" } },
                    "exclude": { "type": "array", "items": { "type": "string" } },
                    "mode": { "type": "string", "enum": ["dense", "rrf"] }
                },
                "required": ["query"]
            }
        },
        {
            "name": "memory_reflect",
            "description": "Propose new relationships for a seed block via the reasoning model",
            "inputSchema": { "type": "object", "properties": { "seed_id": { "type": "string" } }, "required": ["seed_id"] }
        },
        {
            "name": "memory_compress",
            "description": "Compress sections of text to fit a token budget",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "sections": { "type": "array", "items": { "type": "string" } },
                    "max_tokens": { "type": "integer", "exclusiveMinimum": 0 }
                },
                "required": ["sections", "max_tokens"]
            }
        },
        {
            "name": "memory_decay",
            "description": "Run a decay cycle archiving stale or rarely-used blocks",
            "inputSchema": {
                "type": "object",
                "properties": { "policy": { "type": "string", "enum": ["time", "usage", "both"] } },
                "required": ["policy"]
            }
        },
        {
            "name": "memory_materialize_context",
            "description": "Retrieve and compress a token-budgeted context block for a query",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "query": { "type": "string" },
                    "max_tokens": { "type": "integer", "exclusiveMinimum": 0 },
                    "top_k": { "type": "integer", "exclusiveMinimum": 0 }
                },
                "required": ["query", "max_tokens"]
            }
        },
        {
            "name": "memory_list_blocks",
            "description": "List the ids of every non-archived block",
            "inputSchema": { "type": "object", "properties": {} }
        },
        {
            "name": "memory_reindex_all",
            "description": "Rebuild the vector index from scratch over every non-archived block",
            "inputSchema": { "type": "object", "properties": {} }
        },
        {
            "name": "memory_reset_vectors",
            "description": "Clear the vector index without touching persisted blocks",
            "inputSchema": { "type": "object", "properties": {} }
        }
    ])
}

async fn call_tool(core: &MemoryCore, name: &str, args: Value, id: Option<Value>) -> Value {
    if !TOOL_NAMES.contains(&name) {
        return error_reply(id, "tool not found");
    }

    let result = match name {
        "memory_record" => handle_record(core, &args),
        "memory_encode" => handle_encode(core, &args).await,
        "memory_link" => handle_link(core, &args).await,
        "memory_retrieve" => handle_retrieve(core, &args).await,
        "memory_reflect" => handle_reflect(core, &args).await,
        "memory_compress" => handle_compress(core, &args).await,
        "memory_decay" => handle_decay(core, &args).await,
        "memory_materialize_context" => handle_materialize_context(core, &args).await,
        "memory_list_blocks" => handle_list_blocks(core),
        "memory_reindex_all" => handle_reindex_all(core).await,
        "memory_reset_vectors" => handle_reset_vectors(core).await,
        _ => unreachable!("checked against TOOL_NAMES above"),
    };

    match result {
        Ok(text) => json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": { "content": [{ "type": "text", "text": text }] }
        }),
        Err(e) => json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": { "content": [{ "type": "text", "text": e.to_string() }], "isError": true }
        }),
    }
}

fn error_reply(id: Option<Value>, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": { "content": [{ "type": "text", "text": message }], "isError": true }
    })
}

fn handle_record(core: &MemoryCore, args: &Value) -> crate::error::MemoryResult<String> {
    let title = args.get("title").and_then(|v| v.as_str()).unwrap_or_default();
    let body = args.get("body").and_then(|v| v.as_str()).unwrap_or_default();
    let tags: BTreeSet<String> = args
        .get("tags")
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|t| t.as_str().map(String::from)).collect())
        .unwrap_or_default();
    let information_type = args
        .get("information_type")
        .and_then(|v| v.as_str())
        .map(parse_information_type)
        .unwrap_or_default();

    let block = core.record(title, body, tags, information_type)?;
    Ok(serde_json::to_string(&block).unwrap_or_default())
}

fn parse_information_type(s: &str) -> InformationType {
    match s {
        "semi-static" => InformationType::SemiStatic,
        "dynamic" => InformationType::Dynamic,
        "ephemeral" => InformationType::Ephemeral,
        _ => InformationType::Static,
    }
}

async fn handle_encode(core: &MemoryCore, args: &Value) -> crate::error::MemoryResult<String> {
    let id = args.get("id").and_then(|v| v.as_str()).unwrap_or_default();
    core.encode(id).await?;
    Ok(json!({ "encoded": id }).to_string())
}

async fn handle_link(core: &MemoryCore, args: &Value) -> crate::error::MemoryResult<String> {
    let source_id = args.get("source_id").and_then(|v| v.as_str()).unwrap_or_default();
    let target_id = args.get("target_id").and_then(|v| v.as_str()).unwrap_or_default();
    let kind = args.get("kind").and_then(|v| v.as_str()).unwrap_or("related_to").to_string();
    let weight = args.get("weight").and_then(|v| v.as_f64()).map(|w| w as f32);

    let relationship = core.link(source_id, target_id, kind, weight).await?;
    Ok(serde_json::to_string(&relationship).unwrap_or_default())
}

async fn handle_retrieve(core: &MemoryCore, args: &Value) -> crate::error::MemoryResult<String> {
    let query = args.get("query").and_then(|v| v.as_str()).unwrap_or_default();
    let top_k = args.get("top_k").and_then(|v| v.as_u64()).unwrap_or(5) as usize;
    let boost = string_array(args, "boost");
    let exclude = string_array(args, "exclude");
    let mode = match args.get("mode").and_then(|v| v.as_str()) {
        Some("rrf") => RetrievalMode::Rrf,
        _ => RetrievalMode::Dense,
    };

    let hits = core.retrieve(query, &RetrieveOptions { top_k, boost, exclude, mode }).await?;
    Ok(serde_json::to_string(&hits.into_iter().map(retrieved_block_json).collect::<Vec<_>>()).unwrap_or_default())
}

fn retrieved_block_json(hit: crate::retriever::RetrievedBlock) -> Value {
    json!({
        "block_id": hit.block_id,
        "score": hit.score,
        "cosine_similarity": hit.cosine_similarity,
        "sparse_score": hit.sparse_score,
        "matched_boosts": hit.matched_boosts,
        "reason": hit.reason,
    })
}

fn string_array(args: &Value, key: &str) -> Vec<String> {
    args.get(key)
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|t| t.as_str().map(String::from)).collect())
        .unwrap_or_default()
}

async fn handle_reflect(core: &MemoryCore, args: &Value) -> crate::error::MemoryResult<String> {
    let seed_id = args.get("seed_id").and_then(|v| v.as_str()).unwrap_or_default();
    let accepted = core.reflect(seed_id).await?;
    Ok(serde_json::to_string(&accepted).unwrap_or_default())
}

async fn handle_compress(core: &MemoryCore, args: &Value) -> crate::error::MemoryResult<String> {
    let sections = string_array(args, "sections");
    let max_tokens = args.get("max_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
    core.compress(&sections, max_tokens).await
}

async fn handle_decay(core: &MemoryCore, args: &Value) -> crate::error::MemoryResult<String> {
    let policy = match args.get("policy").and_then(|v| v.as_str()) {
        Some("usage") => DecayPolicy::Usage,
        Some("both") => DecayPolicy::Both,
        _ => DecayPolicy::Time,
    };
    let archived = core.decay(policy).await?;
    Ok(serde_json::to_string(&archived).unwrap_or_default())
}

async fn handle_materialize_context(core: &MemoryCore, args: &Value) -> crate::error::MemoryResult<String> {
    let query = args.get("query").and_then(|v| v.as_str()).unwrap_or_default();
    let max_tokens = args.get("max_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
    let top_k = args.get("top_k").and_then(|v| v.as_u64()).unwrap_or(5) as usize;
    core.materialize_context(query, max_tokens, &RetrieveOptions { top_k, ..Default::default() }).await
}

fn handle_list_blocks(core: &MemoryCore) -> crate::error::MemoryResult<String> {
    let ids = core.list_blocks()?;
    Ok(serde_json::to_string(&ids).unwrap_or_default())
}

async fn handle_reindex_all(core: &MemoryCore) -> crate::error::MemoryResult<String> {
    let count = core.reindex_all().await?;
    Ok(json!({ "reindexed": count }).to_string())
}

async fn handle_reset_vectors(core: &MemoryCore) -> crate::error::MemoryResult<String> {
    core.reset_vectors().await?;
    Ok(json!({ "reset": true }).to_string())
}
