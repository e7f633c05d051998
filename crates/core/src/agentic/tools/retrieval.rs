//! Knowledge-base retrieval tool
//!
//! Queries the retrieval service and normalizes the hits into transcript
//! text plus structured evidence records. When the model omits
//! `dataset_ids`, the department classifier picks them from the question.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agentic::orchestrator::RunContext;
use crate::service::config::RetrievalConfig;
use crate::util::errors::{AgentError, AgentResult};

use super::classifier::DepartmentClassifier;
use super::framework::{EvidenceChunk, Tool, ToolOutcome, ToolPayload};

#[derive(Debug, Serialize)]
struct RetrievalRequest<'a> {
    question: &'a str,
    dataset_ids: &'a [String],
    document_ids: Vec<String>,
    similarity_threshold: f64,
    vector_similarity_weight: f64,
    top_k: u32,
    keyword: bool,
}

#[derive(Debug, Deserialize)]
struct RetrievalResponse {
    code: i64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<RetrievalData>,
}

#[derive(Debug, Default, Deserialize)]
struct RetrievalData {
    #[serde(default)]
    chunks: Vec<RetrievedChunk>,
    #[serde(default)]
    doc_aggs: Vec<DocAggregate>,
    #[serde(default)]
    total: u64,
}

#[derive(Debug, Deserialize)]
struct RetrievedChunk {
    #[serde(default)]
    content: String,
    #[serde(default)]
    similarity: f64,
    #[serde(default)]
    document_id: String,
    #[serde(default)]
    highlight: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DocAggregate {
    doc_id: String,
    doc_name: String,
}

pub struct RetrievalTool {
    http: reqwest::Client,
    config: RetrievalConfig,
    classifier: DepartmentClassifier,
}

impl RetrievalTool {
    pub fn new(config: RetrievalConfig, classifier: DepartmentClassifier) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            classifier,
        }
    }

    async fn search(
        &self,
        query: &str,
        dataset_ids: &[String],
        top_k: u32,
        ctx: &RunContext,
    ) -> AgentResult<(String, Vec<EvidenceChunk>)> {
        let body = RetrievalRequest {
            question: query,
            dataset_ids,
            document_ids: Vec::new(),
            similarity_threshold: self.config.similarity_threshold,
            vector_similarity_weight: self.config.vector_similarity_weight,
            top_k,
            keyword: true,
        };

        debug!(
            "retrieval request: query={:?} datasets={} top_k={}",
            crate::util::text::preview(query, 50),
            dataset_ids.len(),
            top_k
        );

        let mut request = self
            .http
            .post(&self.config.base_url)
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .json(&body);
        if !self.config.api_key.is_empty() {
            request = request.bearer_auth(&self.config.api_key);
        }

        // Race the call against cancellation; an abandoned in-flight request
        // is simply dropped.
        let response = tokio::select! {
            _ = ctx.cancel().cancelled() => return Err(AgentError::ClientDisconnected),
            response = request.send() => response,
        }
        .map_err(|e| AgentError::tool(format!("retrieval request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AgentError::tool(format!(
                "retrieval service returned HTTP {}",
                status.as_u16()
            )));
        }

        let parsed: RetrievalResponse = response
            .json()
            .await
            .map_err(|e| AgentError::tool(format!("retrieval response decode failed: {}", e)))?;

        if parsed.code != 0 {
            return Err(AgentError::tool(format!(
                "retrieval service error: {}",
                parsed.message.unwrap_or_else(|| "unknown error".to_string())
            )));
        }

        let data = parsed.data.unwrap_or_default();
        Ok(format_results(query, data))
    }
}

/// Render hits into the transcript text and evidence records.
fn format_results(query: &str, data: RetrievalData) -> (String, Vec<EvidenceChunk>) {
    if data.total == 0 || data.chunks.is_empty() {
        return (
            format!("[Retrieval] No relevant documents found for query: '{}'", query),
            Vec::new(),
        );
    }

    let doc_names: HashMap<&str, &str> = data
        .doc_aggs
        .iter()
        .map(|doc| (doc.doc_id.as_str(), doc.doc_name.as_str()))
        .collect();

    let mut text = format!(
        "Retrieval results for '{}' ({} relevant chunks):\n\n",
        query, data.total
    );
    let mut evidence = Vec::with_capacity(data.chunks.len());

    for (index, chunk) in data.chunks.iter().enumerate() {
        let doc_name = doc_names
            .get(chunk.document_id.as_str())
            .copied()
            .unwrap_or("Unknown Document");

        text.push_str(&format!("[{}] Document: {}\n", index + 1, doc_name));
        text.push_str(&format!("Similarity: {:.3}\n", chunk.similarity));
        text.push_str(&format!("Content: {}\n", chunk.content));
        if let Some(highlight) = chunk.highlight.as_deref() {
            if highlight != chunk.content {
                text.push_str(&format!("Highlight: {}\n", highlight));
            }
        }
        text.push_str("\n---\n\n");

        evidence.push(EvidenceChunk {
            title: doc_name.to_string(),
            content: chunk.content.clone(),
            similarity: chunk.similarity,
        });
    }

    (text.trim_end().to_string(), evidence)
}

fn query_from_args(args: &Value) -> Option<String> {
    args.get("query")
        .or_else(|| args.get("question"))
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[async_trait]
impl Tool for RetrievalTool {
    fn name(&self) -> &str {
        "knowledge_retrieval"
    }

    fn description(&self) -> &str {
        "Searches the knowledge base and returns relevant documents with similarity scores"
    }

    fn validate_args(&self, args: &Value) -> AgentResult<()> {
        if query_from_args(args).is_none() {
            return Err(AgentError::BadToolArgs(
                "query must be a non-empty string".to_string(),
            ));
        }
        if let Some(ids) = args.get("dataset_ids") {
            if !ids.is_array() {
                return Err(AgentError::BadToolArgs(
                    "dataset_ids must be an array of strings".to_string(),
                ));
            }
        }
        Ok(())
    }

    async fn execute(&self, args: Value, ctx: &RunContext) -> AgentResult<ToolOutcome> {
        let query = query_from_args(&args)
            .ok_or_else(|| AgentError::BadToolArgs("query must be a non-empty string".to_string()))?;

        let dataset_ids: Vec<String> = args
            .get("dataset_ids")
            .and_then(Value::as_array)
            .map(|ids| {
                ids.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let dataset_ids = if dataset_ids.is_empty() {
            self.classifier.dataset_ids_for(&query, ctx).await
        } else {
            dataset_ids
        };

        let top_k = args
            .get("top_k")
            .and_then(Value::as_u64)
            .map(|k| k as u32)
            .unwrap_or(self.config.top_k);

        let (text, evidence) = self.search(&query, &dataset_ids, top_k, ctx).await?;
        let payload = if evidence.is_empty() {
            None
        } else {
            Some(ToolPayload::Evidence(evidence))
        };
        Ok(ToolOutcome { text, payload })
    }
}
