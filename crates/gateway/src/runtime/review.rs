//! Keyword moderation for agent input and output.

use regex::{Regex, RegexBuilder};

use tl_domain::config::ReviewConfig;

/// Mask substituted for every keyword occurrence in streamed output.
pub const REDACTION_MASK: &str = "**";

/// Compiled moderation rules. Both sides are inert unless switched on.
#[derive(Debug, Clone, Default)]
pub struct Review {
    input: Option<(Vec<String>, String)>,
    output: Option<Regex>,
}

impl Review {
    pub fn from_config(config: &ReviewConfig) -> Self {
        let keywords: Vec<String> =
            config.keywords.iter().filter(|k| !k.is_empty()).cloned().collect();
        let input = (config.inputs_enabled() && !keywords.is_empty())
            .then(|| (keywords, config.inputs.preset_response.clone()));
        let output = config
            .outputs_enabled()
            .then(|| keyword_pattern(&config.keywords))
            .flatten();
        Self { input, output }
    }

    /// The preset response when `query` contains a keyword. Matching is an
    /// exact, case-sensitive substring test.
    pub fn check_input(&self, query: &str) -> Option<&str> {
        let (keywords, preset) = self.input.as_ref()?;
        keywords
            .iter()
            .any(|k| query.contains(k.as_str()))
            .then_some(preset.as_str())
    }

    /// Mask every keyword in `text` when output review is on.
    pub fn redact(&self, text: &str) -> String {
        match &self.output {
            Some(re) => re.replace_all(text, REDACTION_MASK).into_owned(),
            None => text.to_owned(),
        }
    }
}

/// One case-insensitive alternation of the literal keywords, or `None`
/// when there is nothing to match.
fn keyword_pattern(keywords: &[String]) -> Option<Regex> {
    let alternatives: Vec<String> = keywords
        .iter()
        .filter(|k| !k.is_empty())
        .map(|k| regex::escape(k))
        .collect();
    if alternatives.is_empty() {
        return None;
    }
    match RegexBuilder::new(&alternatives.join("|")).case_insensitive(true).build() {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::warn!(error = %e, "review keywords did not compile; moderation disabled");
            None
        }
    }
}
