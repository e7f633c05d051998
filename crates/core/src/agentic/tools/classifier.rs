//! Medical department classifier
//!
//! Infers which knowledge-base datasets to search when a retrieval call
//! omits `dataset_ids`. The classification is a single low-temperature LLM
//! call; every failure path falls back to the default department so that
//! retrieval always has at least one dataset to search.

use log::{debug, info, warn};
use std::sync::Arc;

use crate::agentic::orchestrator::prompts;
use crate::agentic::orchestrator::RunContext;
use crate::infrastructure::llm::{ChatMessage, GenerationConfig, LlmClient};

/// Department name → knowledge-base dataset id.
const DEPARTMENT_DATASETS: &[(&str, &str)] = &[
    ("Nephrology", "654c10c2b53d11f0ba4f0242c0a8a006"),
    ("Otolaryngology", "0da740b4b53111f0b80b0242c0a87006"),
    ("Cardiology", "5732b33ab4c311f098ff0242c0a87006"),
    ("Endocrinology", "1c9c4d369ce411f093700242ac170006"),
];

const DEFAULT_DEPARTMENT: &str = "Endocrinology";

pub struct DepartmentClassifier {
    llm: Arc<LlmClient>,
}

impl DepartmentClassifier {
    pub fn new(llm: Arc<LlmClient>) -> Self {
        Self { llm }
    }

    pub fn departments() -> Vec<&'static str> {
        DEPARTMENT_DATASETS.iter().map(|(name, _)| *name).collect()
    }

    /// Dataset ids for a question. Never fails: classification errors log a
    /// warning and return the default department's dataset.
    pub async fn dataset_ids_for(&self, question: &str, ctx: &RunContext) -> Vec<String> {
        let departments = self.classify(question, ctx).await;
        let ids = dataset_ids_for_departments(&departments);
        info!(
            "department classification: question={:?} departments={:?}",
            truncate_for_log(question),
            departments
        );
        ids
    }

    async fn classify(&self, question: &str, ctx: &RunContext) -> Vec<String> {
        if question.trim().is_empty() {
            return vec![DEFAULT_DEPARTMENT.to_string()];
        }

        let generation = GenerationConfig {
            temperature: 0.3,
            top_p: 0.95,
            presence_penalty: 1.0,
            max_tokens: 512,
            stop_tokens: Vec::new(),
        };
        let messages = vec![
            ChatMessage::system("You are a medical department triage assistant."),
            ChatMessage::user(prompts::classification_prompt(question)),
        ];

        match self.llm.chat(&messages, &generation, ctx.cancel()).await {
            Ok(reply) => {
                debug!("classifier reply: {:?}", truncate_for_log(&reply));
                let departments = parse_departments(&reply);
                if departments.is_empty() {
                    warn!(
                        "classifier reply named no known department; using default: reply={:?}",
                        truncate_for_log(&reply)
                    );
                    vec![DEFAULT_DEPARTMENT.to_string()]
                } else {
                    departments
                }
            }
            Err(e) => {
                warn!("department classification failed; using default: error={}", e);
                vec![DEFAULT_DEPARTMENT.to_string()]
            }
        }
    }
}

/// Match known department names anywhere in the reply, in table order.
fn parse_departments(reply: &str) -> Vec<String> {
    let lowered = reply.to_lowercase();
    DEPARTMENT_DATASETS
        .iter()
        .filter(|(name, _)| lowered.contains(&name.to_lowercase()))
        .map(|(name, _)| name.to_string())
        .collect()
}

fn dataset_ids_for_departments(departments: &[String]) -> Vec<String> {
    let mut ids = Vec::new();
    for department in departments {
        if let Some((_, id)) = DEPARTMENT_DATASETS
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(department))
        {
            if !ids.contains(&id.to_string()) {
                ids.push(id.to_string());
            }
        }
    }
    if ids.is_empty() {
        let default_id = DEPARTMENT_DATASETS
            .iter()
            .find(|(name, _)| *name == DEFAULT_DEPARTMENT)
            .map(|(_, id)| id.to_string())
            .unwrap_or_default();
        ids.push(default_id);
    }
    ids
}

fn truncate_for_log(s: &str) -> String {
    crate::util::text::preview(s, 50)
}
