//! Zinger generation: topic classification, prompt templating and a
//! deterministic fallback when the model fails or rambles.

mod vibe;

use crate::llm::{GenerateRequest, LlmConfig, LlmProvider};
use serde::{Deserialize, Serialize};

pub use vibe::{classify_topic, TopicVibe, GENERAL, VIBES};

/// Longest model answer accepted before falling back
pub const MAX_ZINGER_CHARS: usize = 200;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SmackError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
}

/// Incoming payload; every field is required and must be non-blank
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmackRequest {
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub user_side: Option<String>,
    #[serde(default)]
    pub opposing_side: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

/// Request after validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmackPrompt {
    pub topic: String,
    pub user_side: String,
    pub opposing_side: String,
    pub username: String,
}

fn required(value: &Option<String>, field: &'static str) -> Result<String, SmackError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(SmackError::MissingField(field))
}

impl SmackRequest {
    pub fn validate(&self) -> Result<SmackPrompt, SmackError> {
        Ok(SmackPrompt {
            topic: required(&self.topic, "topic")?,
            user_side: required(&self.user_side, "userSide")?,
            opposing_side: required(&self.opposing_side, "opposingSide")?,
            username: required(&self.username, "username")?,
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ZingerSource {
    Ai,
    Fallback,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SmackResponse {
    pub zinger: String,
    pub source: ZingerSource,
    pub category: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tone: Option<String>,
}

/// Build the model prompt for a validated request
pub fn build_prompt(request: &SmackPrompt, vibe: &TopicVibe) -> String {
    let examples = vibe
        .examples
        .iter()
        .map(|ex| format!("- \"{}\"", ex))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You are a master of witty comebacks and zingers, specializing in {category} debates. Your job is to create the perfect zinger that will make people laugh, think, and want to share it.

CONTEXT ANALYSIS:
- Topic: "{topic}"
- Category: {category}
- Appropriate Tone: {tone}
- Style: {style}
- My Position: "{user_side}"
- Opposing Position: "{opposing_side}"
- My Username: @{username}

ZINGER REQUIREMENTS:
1. Match the {tone} tone perfectly
2. Use {style} approach
3. Be clever, not mean-spirited
4. Maximum 25 words
5. Make people want to share it
6. Support "{user_side}" while playfully challenging "{opposing_side}"
7. Use modern, relatable language
8. Include subtle humor that elevates dopamine
9. Be memorable and quotable

STYLE EXAMPLES FOR {category_upper} TOPICS:
{examples}

EMOTIONAL GOALS:
- Surprise the reader with unexpected wit
- Create a "mic drop" moment
- Make the reader feel clever for choosing {user_side}
- Generate that satisfying "burn" feeling
- Encourage sharing and engagement

AVOID:
- Generic templates
- Offensive content
- Overly complex language
- Boring predictable responses
- Being too serious or too silly (unless topic calls for it)

Now generate ONE perfect zinger that captures the essence of this {category} debate with {tone} energy. Make it so good that people will screenshot it and share it everywhere.

Return ONLY the zinger text, no quotes, no explanation:"#,
        category = vibe.category,
        category_upper = vibe.category.to_uppercase(),
        tone = vibe.tone,
        style = vibe.style,
        topic = request.topic,
        user_side = request.user_side,
        opposing_side = request.opposing_side,
        username = request.username,
        examples = examples,
    )
}

const QUOTES: &[char] = &['"', '\''];

/// Trim and drop one wrapping quote at either end
pub fn clean_zinger(text: &str) -> String {
    let text = text.trim();
    let text = text.strip_prefix(QUOTES).unwrap_or(text);
    let text = text.strip_suffix(QUOTES).unwrap_or(text);
    text.trim().to_string()
}

const SIDE_PHRASES: &[(&str, bool)] = &[
    ("Your side", false),
    ("My side", true),
    ("Your choice", false),
    ("My choice", true),
    ("Your team", false),
    ("My team", true),
];

/// Replace "Your side/choice/team" with the opposing side and "My ..." with the user's
fn substitute_sides(example: &str, user_side: &str, opposing_side: &str) -> String {
    let mut out = String::with_capacity(example.len());
    let mut rest = example;

    while !rest.is_empty() {
        let next = SIDE_PHRASES
            .iter()
            .filter_map(|(phrase, mine)| rest.find(phrase).map(|at| (at, *phrase, *mine)))
            .min_by_key(|(at, _, _)| *at);

        match next {
            Some((at, phrase, mine)) => {
                out.push_str(&rest[..at]);
                out.push_str(if mine { user_side } else { opposing_side });
                rest = &rest[at + phrase.len()..];
            }
            None => {
                out.push_str(rest);
                break;
            }
        }
    }
    out
}

/// FNV-1a, stable across runs and platforms
fn stable_hash(parts: &[&str]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for part in parts {
        for byte in part.bytes().chain(std::iter::once(0)) {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
    }
    hash
}

/// Category example with the sides filled in; same input, same line
pub fn fallback_zinger(request: &SmackPrompt, vibe: &TopicVibe) -> String {
    let seed = stable_hash(&[
        request.topic.as_str(),
        request.user_side.as_str(),
        request.opposing_side.as_str(),
    ]);
    let index = (seed % vibe.examples.len() as u64) as usize;
    substitute_sides(
        vibe.examples[index],
        &request.user_side,
        &request.opposing_side,
    )
}

/// Generates zingers with an optional model and a textual fallback
pub struct SmackGenerator {
    provider: Option<Box<dyn LlmProvider>>,
    config: LlmConfig,
}

impl SmackGenerator {
    pub fn new(provider: Option<Box<dyn LlmProvider>>, config: LlmConfig) -> Self {
        Self { provider, config }
    }

    /// Generator that always answers from the example table
    pub fn fallback_only() -> Self {
        Self::new(None, LlmConfig::default())
    }

    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    pub async fn generate(&self, request: &SmackRequest) -> Result<SmackResponse, SmackError> {
        let prompt = request.validate()?;
        let vibe = classify_topic(&prompt.topic);

        let fallback = || SmackResponse {
            zinger: fallback_zinger(&prompt, vibe),
            source: ZingerSource::Fallback,
            category: vibe.category.to_string(),
            tone: None,
        };

        let Some(provider) = &self.provider else {
            tracing::debug!("No LLM provider configured, using fallback zinger");
            return Ok(fallback());
        };

        let generate_request = GenerateRequest {
            prompt: build_prompt(&prompt, vibe),
            max_tokens: Some(self.config.default_max_tokens),
            timeout: self.config.default_timeout,
        };

        match provider.generate(generate_request).await {
            Ok(response) => {
                let zinger = clean_zinger(&response.text);
                let length = zinger.chars().count();
                if zinger.is_empty() || length > MAX_ZINGER_CHARS {
                    tracing::warn!(
                        "Provider {} returned an unusable zinger ({} chars), using fallback",
                        provider.name(),
                        length
                    );
                    return Ok(fallback());
                }

                tracing::info!(
                    "Generated {} zinger via {} in {}ms",
                    vibe.category,
                    response.metadata.model,
                    response.metadata.latency_ms
                );
                Ok(SmackResponse {
                    zinger,
                    source: ZingerSource::Ai,
                    category: vibe.category.to_string(),
                    tone: Some(vibe.tone.to_string()),
                })
            }
            Err(e) => {
                tracing::error!("Error generating zinger: {}", e);
                Ok(fallback())
            }
        }
    }
}
