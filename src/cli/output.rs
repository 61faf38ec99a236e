//! scriptable output: text for terminals, JSON-RPC 2.0 envelopes otherwise
//!
//! every JSON line is either `{"jsonrpc":"2.0","result":...,"id":null}` or
//! `{"jsonrpc":"2.0","error":{"code":...,"message":...},"id":null}`.

use serde::Serialize;
use std::io::IsTerminal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Text,
    Json,
    /// errors only, on stderr
    Quiet,
}

impl OutputMode {
    /// `--quiet` beats `--json` beats `--no-json`; unset means JSON when piped
    pub fn from_flags(json: bool, no_json: bool, quiet: bool) -> Self {
        match (quiet, json, no_json) {
            (true, _, _) => Self::Quiet,
            (false, true, _) => Self::Json,
            (false, false, true) => Self::Text,
            (false, false, false) if std::io::stdout().is_terminal() => Self::Text,
            _ => Self::Json,
        }
    }

    pub fn is_json(&self) -> bool {
        *self == Self::Json
    }

    pub fn is_text(&self) -> bool {
        *self == Self::Text
    }
}

#[derive(Serialize)]
#[serde(rename_all = "lowercase")]
enum Body<T> {
    Result(T),
    Error(RpcError),
}

/// one JSON-RPC line; CLI responses never carry a request id
#[derive(Serialize)]
pub struct Envelope<T> {
    jsonrpc: &'static str,
    #[serde(flatten)]
    body: Body<T>,
    id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ErrorData>,
}

#[derive(Debug, Serialize)]
pub struct ErrorData {
    pub details: Vec<String>,
}

impl<T: Serialize> Envelope<T> {
    pub fn success(result: T) -> Self {
        Self {
            jsonrpc: "2.0",
            body: Body::Result(result),
            id: None,
        }
    }
}

impl Envelope<()> {
    /// `exit_code` lands in the application range below -32000
    pub fn failure(exit_code: i32, message: impl Into<String>, details: Vec<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            body: Body::Error(RpcError {
                code: -32000 - exit_code,
                message: message.into(),
                data: (!details.is_empty()).then_some(ErrorData { details }),
            }),
            id: None,
        }
    }
}

fn emit<T: Serialize>(envelope: &Envelope<T>) {
    match serde_json::to_string(envelope) {
        Ok(line) => println!("{}", line),
        Err(e) => eprintln!("failed to encode output: {}", e),
    }
}

pub fn print_json<T: Serialize>(data: &T) {
    emit(&Envelope::success(data));
}

pub fn print_json_error(exit_code: i32, message: &str) {
    emit(&Envelope::failure(exit_code, message, Vec::new()));
}

pub fn print_json_error_with_details(exit_code: i32, message: &str, details: Vec<String>) {
    emit(&Envelope::failure(exit_code, message, details));
}

/// one compiled selector
#[derive(Debug, Serialize)]
pub struct SelectorData {
    pub source: String,
    pub canonical: String,
    pub segments: usize,
    pub root_anchored: bool,
    pub use_cache: bool,
    pub quick_find: bool,
    pub fast_query: bool,
}

/// a selector that failed to compile
#[derive(Debug, Serialize)]
pub struct CompileErrorData {
    pub source: String,
    pub message: String,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Serialize)]
pub struct CheckData {
    pub compiled: Vec<SelectorData>,
    pub errors: Vec<CompileErrorData>,
}

/// a matched node
#[derive(Debug, Serialize)]
pub struct NodeData {
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct QueryData {
    pub selector: String,
    pub matched: bool,
    /// node matched by each segment, in order
    pub chain: Vec<NodeData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<NodeData>,
    pub reads: usize,
}

#[derive(Debug, Serialize)]
pub struct VerifyData {
    pub path: String,
    pub valid: bool,
    pub errors: Vec<String>,
}

/// one performed action during a simulation
#[derive(Debug, Serialize)]
pub struct FiredData {
    pub target: String,
    pub action: String,
}

#[derive(Debug, Serialize)]
pub struct SimulateData {
    pub app: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity: Option<String>,
    pub events: usize,
    pub fired: Vec<FiredData>,
    pub batches: u64,
    pub skipped_batches: u64,
    pub evaluations: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}
