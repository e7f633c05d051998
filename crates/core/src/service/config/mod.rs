//! Runtime configuration, resolved from the process environment.
//!
//! `ServerConfig::load()` reads `std::env::vars()`; `from_kv` is the
//! testable entry point. Every key is optional and falls back to a
//! documented default; malformed values refuse startup.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::infrastructure::llm::GenerationConfig;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub max_concurrent_requests: usize,
    pub max_rounds: u32,
    pub request_wall_clock_secs: u64,
    pub admission_timeout_secs: u64,
    pub citation_ttl_secs: u64,
    pub token_budget: usize,
    pub llm: LlmBackendConfig,
    pub retrieval: RetrievalConfig,
    pub sandbox: SandboxConfig,
}

#[derive(Debug, Clone)]
pub struct LlmBackendConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    /// Immutable generation template; requests deep-copy before overriding.
    pub generation: GenerationConfig,
}

#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub base_url: String,
    pub api_key: String,
    pub top_k: u32,
    pub similarity_threshold: f64,
    pub vector_similarity_weight: f64,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub base_url: String,
    pub wall_clock_secs: u64,
    pub output_cap_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for StartupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for StartupError {}

impl ServerConfig {
    pub fn load() -> Result<Self, StartupError> {
        let kv: HashMap<String, String> = std::env::vars().collect();
        Self::from_kv(&kv)
    }

    pub fn from_kv(kv: &HashMap<String, String>) -> Result<Self, StartupError> {
        let bind_addr = parse_socket_addr(
            kv.get("BIND_ADDR"),
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 5006),
            "BIND_ADDR",
        )?;

        let max_concurrent_requests =
            parse_usize(kv.get("MAX_CONCURRENT_REQUESTS"), 3, "MAX_CONCURRENT_REQUESTS")?;
        if max_concurrent_requests == 0 {
            return Err(StartupError {
                code: "ERR_INVALID_CONFIG",
                message: "MAX_CONCURRENT_REQUESTS must be >= 1".to_string(),
            });
        }

        let max_rounds = parse_u32(kv.get("MAX_ROUNDS"), 10, "MAX_ROUNDS")?;
        if max_rounds == 0 {
            return Err(StartupError {
                code: "ERR_INVALID_CONFIG",
                message: "MAX_ROUNDS must be >= 1".to_string(),
            });
        }

        let request_wall_clock_secs = parse_u64(
            kv.get("REQUEST_WALL_CLOCK_SECONDS"),
            9000,
            "REQUEST_WALL_CLOCK_SECONDS",
        )?;
        let admission_timeout_secs = parse_u64(
            kv.get("ADMISSION_TIMEOUT_SECONDS"),
            300,
            "ADMISSION_TIMEOUT_SECONDS",
        )?;
        let citation_ttl_secs =
            parse_u64(kv.get("CITATION_TTL_SECONDS"), 3600, "CITATION_TTL_SECONDS")?;
        let token_budget = parse_usize(kv.get("TOKEN_BUDGET"), 108 * 1024, "TOKEN_BUDGET")?;

        let generation = GenerationConfig {
            temperature: parse_f32(kv.get("LLM_TEMPERATURE"), 0.85, "LLM_TEMPERATURE")?,
            top_p: parse_f32(kv.get("LLM_TOP_P"), 0.95, "LLM_TOP_P")?,
            presence_penalty: parse_f32(
                kv.get("LLM_PRESENCE_PENALTY"),
                1.1,
                "LLM_PRESENCE_PENALTY",
            )?,
            max_tokens: parse_u32(kv.get("LLM_MAX_TOKENS"), 10000, "LLM_MAX_TOKENS")?,
            stop_tokens: GenerationConfig::default().stop_tokens,
        };

        let llm = LlmBackendConfig {
            base_url: string_or(kv.get("LLM_BASE_URL"), "http://127.0.0.1:6001/v1"),
            api_key: string_or(kv.get("LLM_API_KEY"), "EMPTY"),
            model: string_or(kv.get("LLM_MODEL"), "deepmed-reasoner"),
            generation,
        };

        let retrieval = RetrievalConfig {
            base_url: string_or(
                kv.get("RETRIEVAL_BASE_URL"),
                "http://127.0.0.1:8080/api/v1/retrieval",
            ),
            api_key: string_or(kv.get("RETRIEVAL_API_KEY"), ""),
            top_k: parse_u32(kv.get("RETRIEVAL_TOP_K"), 4, "RETRIEVAL_TOP_K")?,
            similarity_threshold: parse_f64(
                kv.get("RETRIEVAL_SIMILARITY_THRESHOLD"),
                0.6,
                "RETRIEVAL_SIMILARITY_THRESHOLD",
            )?,
            vector_similarity_weight: parse_f64(
                kv.get("RETRIEVAL_VECTOR_WEIGHT"),
                0.7,
                "RETRIEVAL_VECTOR_WEIGHT",
            )?,
            timeout_secs: parse_u64(kv.get("RETRIEVAL_TIMEOUT_SECONDS"), 30, "RETRIEVAL_TIMEOUT_SECONDS")?,
        };

        let sandbox = SandboxConfig {
            base_url: string_or(kv.get("SANDBOX_BASE_URL"), "http://127.0.0.1:8091/execute"),
            wall_clock_secs: parse_u64(kv.get("SANDBOX_TIMEOUT_SECONDS"), 60, "SANDBOX_TIMEOUT_SECONDS")?,
            output_cap_bytes: parse_usize(
                kv.get("SANDBOX_OUTPUT_CAP_BYTES"),
                16 * 1024,
                "SANDBOX_OUTPUT_CAP_BYTES",
            )?,
        };

        Ok(Self {
            bind_addr,
            max_concurrent_requests,
            max_rounds,
            request_wall_clock_secs,
            admission_timeout_secs,
            citation_ttl_secs,
            token_budget,
            llm,
            retrieval,
            sandbox,
        })
    }
}

fn string_or(value: Option<&String>, default: &str) -> String {
    value
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .unwrap_or(default)
        .to_string()
}

fn parse_socket_addr(
    value: Option<&String>,
    default: SocketAddr,
    key: &'static str,
) -> Result<SocketAddr, StartupError> {
    match value {
        None => Ok(default),
        Some(v) if v.trim().is_empty() => Ok(default),
        Some(v) => v.trim().parse::<SocketAddr>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be a valid host:port socket address", key),
        }),
    }
}

fn parse_usize(
    value: Option<&String>,
    default: usize,
    key: &'static str,
) -> Result<usize, StartupError> {
    match value {
        None => Ok(default),
        Some(v) if v.trim().is_empty() => Ok(default),
        Some(v) => v.trim().parse::<usize>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be an integer", key),
        }),
    }
}

fn parse_u64(value: Option<&String>, default: u64, key: &'static str) -> Result<u64, StartupError> {
    match value {
        None => Ok(default),
        Some(v) if v.trim().is_empty() => Ok(default),
        Some(v) => v.trim().parse::<u64>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be an integer", key),
        }),
    }
}

fn parse_u32(value: Option<&String>, default: u32, key: &'static str) -> Result<u32, StartupError> {
    match value {
        None => Ok(default),
        Some(v) if v.trim().is_empty() => Ok(default),
        Some(v) => v.trim().parse::<u32>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be an integer", key),
        }),
    }
}

fn parse_f32(value: Option<&String>, default: f32, key: &'static str) -> Result<f32, StartupError> {
    match value {
        None => Ok(default),
        Some(v) if v.trim().is_empty() => Ok(default),
        Some(v) => v.trim().parse::<f32>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be a number", key),
        }),
    }
}

fn parse_f64(value: Option<&String>, default: f64, key: &'static str) -> Result<f64, StartupError> {
    match value {
        None => Ok(default),
        Some(v) if v.trim().is_empty() => Ok(default),
        Some(v) => v.trim().parse::<f64>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be a number", key),
        }),
    }
}
