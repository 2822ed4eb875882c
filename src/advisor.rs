// =============================================================================
// Advisor Client — language-model consultation with deterministic fallbacks
// =============================================================================
//
// Each decision node carries a fixed prompt template; the agent fills the
// placeholders with JSON-serialised context. The advisor is told to reply in
// JSON; the first balanced object in the reply text is extracted and parsed.
//
// Without a credential, on a network error, or on a malformed reply, the
// client answers from a deterministic node-specific fallback with low
// confidence, so the agent's control flow never depends on the network.
//
// All numeric parameters coming back from OPTIMIZE_PARAMETERS are clamped
// into fixed safe ranges before anything downstream may use them.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::graph::ParameterOverlay;

/// Hard bound on one advisor round trip.
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);

/// Confidence reported by every fallback reply.
const FALLBACK_CONFIDENCE: f64 = 0.2;
/// Confidence assumed when the advisor reply omits one.
const DEFAULT_CONFIDENCE: f64 = 0.7;

/// Flat blended rate used for the cost estimate.
const COST_PER_1K_TOKENS_USD: f64 = 0.01;

// =============================================================================
// Decision nodes
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    EvaluateMarket,
    EvaluateSimulation,
    OptimizeParameters,
    SearchHistory,
    DecideNextStep,
    AnalyzeFailure,
    GenerateStrategy,
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::EvaluateMarket => "evaluate_market",
            Self::EvaluateSimulation => "evaluate_simulation",
            Self::OptimizeParameters => "optimize_parameters",
            Self::SearchHistory => "search_history",
            Self::DecideNextStep => "decide_next_step",
            Self::AnalyzeFailure => "analyze_failure",
            Self::GenerateStrategy => "generate_strategy",
        };
        write!(f, "{s}")
    }
}

fn prompt_template(node: NodeType) -> &'static str {
    match node {
        NodeType::EvaluateMarket => {
            "Assess the current market for a single-pair spot strategy.\n\
             Market data: {market_data}\nIndicators: {indicators}\n\
             Reply with JSON: {\"assessment\": \"bullish|bearish|neutral\", \
             \"action\": \"trade|hold\", \"reasoning\": \"...\", \"confidence\": 0.0}"
        }
        NodeType::EvaluateSimulation => {
            "Evaluate this paper-trading simulation and pick the next step.\n\
             Results: {simulation_results}\nConfig: {config}\n\
             Market conditions: {market_conditions}\n\
             Reply with JSON: {\"assessment\": \"...\", \
             \"recommended_next_step\": \"run_short_sim|optimize|search_history\", \
             \"reasoning\": \"...\", \"confidence\": 0.0}"
        }
        NodeType::OptimizeParameters => {
            "Tune the strategy parameters given these recent outcomes.\n\
             Recent results: {recent_results}\nCurrent config: {current_config}\n\
             Patterns: {patterns}\n\
             Reply with JSON: {\"optimized_parameters\": {...}, \
             \"changes_made\": [\"...\"], \"reasoning\": \"...\", \"confidence\": 0.0}"
        }
        NodeType::SearchHistory => {
            "Pick the historical parameter version best matched to the \
             present market, if any.\nCurrent conditions: {current_conditions}\n\
             Versions: {historical_versions}\nResults: {historical_results}\n\
             Reply with JSON: {\"best_version_id\": \"...\"|null, \
             \"reasoning\": \"...\", \"confidence\": 0.0}"
        }
        NodeType::DecideNextStep => {
            "Decide the agent's next action.\nAgent state: {agent_state}\n\
             Last simulation: {last_simulation}\nRecent history: {recent_history}\n\
             Global metrics: {global_metrics}\n\
             Reply with JSON: {\"decision\": \"...\", \"priority\": \
             \"low|normal|high\", \"risk_level\": \"low|medium|high\", \
             \"reasoning\": \"...\", \"confidence\": 0.0}"
        }
        NodeType::AnalyzeFailure => {
            "A simulation failed. Analyse the failure.\nError: {error}\n\
             Context: {context}\n\
             Reply with JSON: {\"cause\": \"...\", \"suggestion\": \"...\", \
             \"reasoning\": \"...\", \"confidence\": 0.0}"
        }
        NodeType::GenerateStrategy => {
            "Propose a strategy variant for these market conditions.\n\
             Conditions: {market_conditions}\nConstraints: {constraints}\n\
             Reply with JSON: {\"strategy\": \"conservative|scalping|momentum\", \
             \"parameters\": {...}, \"reasoning\": \"...\", \"confidence\": 0.0}"
        }
    }
}

/// Fill `{name}` placeholders from the context pairs.
fn render_prompt(template: &str, context: &[(&str, String)]) -> String {
    let mut out = template.to_string();
    for (name, value) in context {
        out = out.replace(&format!("{{{name}}}"), value);
    }
    out
}

// =============================================================================
// Outcome
// =============================================================================

/// What one consultation produced, advisor-backed or fallback.
#[derive(Debug, Clone, Serialize)]
pub struct ThinkOutcome {
    pub success: bool,
    pub content: Value,
    pub reasoning: String,
    pub confidence: f64,
    pub tokens_used: u64,
}

/// Running totals for the stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct BrainStats {
    pub enabled: bool,
    pub model: String,
    pub calls: u64,
    pub fallback_calls: u64,
    pub tokens_used: u64,
    pub estimated_cost_usd: f64,
}

/// A parameter pushed back into its safe range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClampNote {
    pub field: String,
    pub from: f64,
    pub to: f64,
}

// =============================================================================
// Client
// =============================================================================

pub struct AdvisorClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    calls: AtomicU64,
    fallback_calls: AtomicU64,
    tokens_used: AtomicU64,
}

impl AdvisorClient {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("failed to build reqwest client");

        Self {
            client,
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: api_key.filter(|k| !k.is_empty()),
            calls: AtomicU64::new(0),
            fallback_calls: AtomicU64::new(0),
            tokens_used: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    /// Consult the advisor for `node`. Never fails: every error path lands
    /// on the deterministic fallback for that node.
    pub async fn think(&self, node: NodeType, context: &[(&str, String)]) -> ThinkOutcome {
        self.calls.fetch_add(1, Ordering::Relaxed);

        let Some(api_key) = &self.api_key else {
            return self.fallback(node, "no credential configured");
        };

        let prompt = render_prompt(prompt_template(node), context);
        match self.request(api_key, &prompt).await {
            Ok((text, tokens)) => {
                self.tokens_used.fetch_add(tokens, Ordering::Relaxed);
                match extract_json_block(&text).and_then(|block| serde_json::from_str::<Value>(block).ok())
                {
                    Some(content) => {
                        let confidence = content
                            .get("confidence")
                            .and_then(Value::as_f64)
                            .unwrap_or(DEFAULT_CONFIDENCE)
                            .clamp(0.0, 1.0);
                        let reasoning = content
                            .get("reasoning")
                            .and_then(Value::as_str)
                            .unwrap_or("")
                            .to_string();
                        debug!(node = %node, tokens, "advisor replied");
                        ThinkOutcome {
                            success: true,
                            content,
                            reasoning,
                            confidence,
                            tokens_used: tokens,
                        }
                    }
                    None => self.fallback(node, "malformed reply"),
                }
            }
            Err(e) => {
                warn!(node = %node, error = %e, "advisor call failed");
                self.fallback(node, "request failed")
            }
        }
    }

    async fn request(&self, api_key: &str, prompt: &str) -> Result<(String, u64)> {
        let body = json!({
            "model": self.model,
            "messages": [
                {
                    "role": "system",
                    "content": "You are a trading advisor. Reply with JSON only.",
                },
                { "role": "user", "content": prompt },
            ],
            "temperature": 0.2,
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .context("advisor request failed")?;

        let status = resp.status();
        let reply: Value = resp.json().await.context("failed to parse advisor response")?;
        if !status.is_success() {
            anyhow::bail!("advisor endpoint returned {status}: {reply}");
        }

        let text = reply["choices"][0]["message"]["content"]
            .as_str()
            .context("advisor response missing message content")?
            .to_string();
        let tokens = reply["usage"]["total_tokens"].as_u64().unwrap_or(0);
        Ok((text, tokens))
    }

    fn fallback(&self, node: NodeType, cause: &str) -> ThinkOutcome {
        self.fallback_calls.fetch_add(1, Ordering::Relaxed);
        debug!(node = %node, cause, "using deterministic fallback");
        ThinkOutcome {
            success: true,
            content: fallback_content(node),
            reasoning: format!("deterministic fallback ({cause})"),
            confidence: FALLBACK_CONFIDENCE,
            tokens_used: 0,
        }
    }

    pub fn stats(&self) -> BrainStats {
        let tokens = self.tokens_used.load(Ordering::Relaxed);
        BrainStats {
            enabled: self.is_enabled(),
            model: self.model.clone(),
            calls: self.calls.load(Ordering::Relaxed),
            fallback_calls: self.fallback_calls.load(Ordering::Relaxed),
            tokens_used: tokens,
            estimated_cost_usd: tokens as f64 / 1000.0 * COST_PER_1K_TOKENS_USD,
        }
    }
}

impl std::fmt::Debug for AdvisorClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdvisorClient")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Node-specific deterministic answers for the offline path. Nothing here
/// recommends an action the threshold logic would not also reach, so the
/// agent behaves identically with or without an advisor, minus the prose.
fn fallback_content(node: NodeType) -> Value {
    match node {
        NodeType::EvaluateMarket => json!({
            "assessment": "neutral",
            "action": "hold",
        }),
        NodeType::EvaluateSimulation => json!({
            "assessment": "fallback",
            "recommended_next_step": Value::Null,
        }),
        NodeType::OptimizeParameters => json!({
            "optimized_parameters": {},
            "changes_made": [],
        }),
        NodeType::SearchHistory => json!({
            "best_version_id": Value::Null,
        }),
        NodeType::DecideNextStep => json!({
            "decision": "continue",
            "priority": "normal",
            "risk_level": "medium",
        }),
        NodeType::AnalyzeFailure => json!({
            "cause": "unknown",
            "suggestion": "retry with current parameters",
        }),
        NodeType::GenerateStrategy => json!({
            "strategy": "scalping",
            "parameters": {},
        }),
    }
}

// =============================================================================
// JSON extraction
// =============================================================================

/// First balanced `{...}` block in `text`, brace-counted with string and
/// escape awareness. Models love wrapping JSON in prose and code fences.
pub fn extract_json_block(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

// =============================================================================
// Parameter clamping
// =============================================================================

/// Safe range per tunable parameter. These bounds are the contract: nothing
/// outside them is ever applied, whatever the advisor says.
pub const SAFE_RANGES: &[(&str, f64, f64)] = &[
    ("rsi_oversold", 25.0, 45.0),
    ("rsi_overbought", 55.0, 85.0),
    ("stop_loss_pct", 0.1, 2.0),
    ("take_profit_pct", 0.2, 5.0),
    ("micro_profit_target", 0.05, 1.0),
    ("micro_stop_loss", 0.05, 1.0),
    ("position_size_pct", 5.0, 25.0),
    ("min_time_between_trades", 1.0, 60.0),
    ("cooldown_after_loss", 5.0, 300.0),
    ("min_buy_score", 1.0, 6.0),
    ("min_sell_score", 1.0, 6.0),
    ("price_change_threshold", 0.05, 2.0),
    ("trailing_stop_pct", 0.2, 3.0),
];

/// Clamp a raw `optimized_parameters` object into a usable overlay.
///
/// Returns the overlay, one note per clamped field, and the names of any
/// unknown fields (warned about, never fatal).
pub fn clamp_parameters(raw: &Value) -> (ParameterOverlay, Vec<ClampNote>, Vec<String>) {
    let unknown = ParameterOverlay::unknown_fields(raw);
    let mut notes = Vec::new();

    let mut sanitised = serde_json::Map::new();
    if let Some(map) = raw.as_object() {
        for (field, lo, hi) in SAFE_RANGES {
            if let Some(v) = map.get(*field).and_then(Value::as_f64) {
                let clamped = v.clamp(*lo, *hi);
                if clamped != v {
                    notes.push(ClampNote {
                        field: field.to_string(),
                        from: v,
                        to: clamped,
                    });
                }
                sanitised.insert(field.to_string(), json!(clamped));
            }
        }
    }

    let overlay: ParameterOverlay =
        serde_json::from_value(Value::Object(sanitised)).unwrap_or_default();
    (overlay, notes, unknown)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_plain_object() {
        let text = r#"{"a": 1}"#;
        assert_eq!(extract_json_block(text), Some(r#"{"a": 1}"#));
    }

    #[test]
    fn extracts_object_from_prose() {
        let text = "Sure! Here is the plan:\n```json\n{\"next\": \"optimize\"}\n```\nGood luck.";
        assert_eq!(extract_json_block(text), Some(r#"{"next": "optimize"}"#));
    }

    #[test]
    fn extracts_nested_objects_and_braces_in_strings() {
        let text = r#"note {"outer": {"inner": "a } brace"}, "n": 2} trailing"#;
        let block = extract_json_block(text).unwrap();
        let v: Value = serde_json::from_str(block).unwrap();
        assert_eq!(v["outer"]["inner"], "a } brace");
        assert_eq!(v["n"], 2);
    }

    #[test]
    fn no_object_is_none() {
        assert_eq!(extract_json_block("nothing here"), None);
        assert_eq!(extract_json_block("{unterminated"), None);
    }

    #[test]
    fn clamps_out_of_range_parameters() {
        let raw = json!({
            "rsi_oversold": 10.0,
            "stop_loss_pct": 9.0,
            "position_size_pct": 90.0,
            "min_time_between_trades": 0.1,
        });
        let (overlay, notes, unknown) = clamp_parameters(&raw);
        assert_eq!(overlay.rsi_oversold, Some(25.0));
        assert_eq!(overlay.stop_loss_pct, Some(2.0));
        assert_eq!(overlay.position_size_pct, Some(25.0));
        assert_eq!(overlay.min_time_between_trades, Some(1.0));
        assert_eq!(notes.len(), 4);
        assert!(unknown.is_empty());

        // Everything applied lies inside its documented range.
        for note in &notes {
            let (_, lo, hi) = SAFE_RANGES
                .iter()
                .find(|(f, _, _)| *f == note.field)
                .unwrap();
            assert!(note.to >= *lo && note.to <= *hi);
        }
    }

    #[test]
    fn in_range_values_pass_unclamped() {
        let raw = json!({ "rsi_oversold": 35.0, "take_profit_pct": 1.0 });
        let (overlay, notes, _) = clamp_parameters(&raw);
        assert_eq!(overlay.rsi_oversold, Some(35.0));
        assert_eq!(overlay.take_profit_pct, Some(1.0));
        assert!(notes.is_empty());
    }

    #[test]
    fn unknown_fields_are_reported() {
        let raw = json!({ "rsi_oversold": 35.0, "quantum_flux": 1.0 });
        let (_, _, unknown) = clamp_parameters(&raw);
        assert_eq!(unknown, vec!["quantum_flux".to_string()]);
    }

    #[test]
    fn render_fills_placeholders() {
        let rendered = render_prompt(
            prompt_template(NodeType::EvaluateSimulation),
            &[
                ("simulation_results", "{\"winrate\": 70}".to_string()),
                ("config", "{}".to_string()),
                ("market_conditions", "{}".to_string()),
            ],
        );
        assert!(rendered.contains("{\"winrate\": 70}"));
        assert!(!rendered.contains("{simulation_results}"));
    }

    #[tokio::test]
    async fn no_credential_uses_fallback() {
        let advisor = AdvisorClient::new("http://localhost:0/v1/chat/completions", "test", None);
        let out = advisor.think(NodeType::EvaluateSimulation, &[]).await;
        assert!(out.success);
        assert!(out.confidence <= 0.3);
        assert!(out.reasoning.contains("fallback"));
        assert!(out.content["recommended_next_step"].is_null());
        assert_eq!(advisor.stats().fallback_calls, 1);
    }

    #[tokio::test]
    async fn fallbacks_are_node_specific_and_deterministic() {
        let advisor = AdvisorClient::new("http://localhost:0/v1/chat/completions", "test", None);
        let a = advisor.think(NodeType::OptimizeParameters, &[]).await;
        let b = advisor.think(NodeType::OptimizeParameters, &[]).await;
        assert_eq!(a.content, b.content);
        assert!(a.content["optimized_parameters"].as_object().unwrap().is_empty());

        let search = advisor.think(NodeType::SearchHistory, &[]).await;
        assert!(search.content["best_version_id"].is_null());
        let next = advisor.think(NodeType::DecideNextStep, &[]).await;
        assert_eq!(next.content["decision"], "continue");
    }

    #[test]
    fn stats_track_token_cost() {
        let advisor = AdvisorClient::new("http://localhost", "test", Some("key".to_string()));
        advisor.tokens_used.store(5000, Ordering::Relaxed);
        let stats = advisor.stats();
        assert!(stats.enabled);
        assert_eq!(stats.tokens_used, 5000);
        assert!((stats.estimated_cost_usd - 0.05).abs() < 1e-12);
    }
}
