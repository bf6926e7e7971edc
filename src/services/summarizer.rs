//! src/services/summarizer.rs
//!
//! SummaryEngine — structuring, template summaries and grounded Q&A over a
//! finished transcript. All calls go through the shared GeminiClient; the
//! structuring pass never fails outward, it falls back to a single section
//! containing the raw transcript.

use crate::services::transcriber::{GeminiClient, TranscribeResult};
use serde::{Deserialize, Serialize};
use tracing::warn;

const SUGGESTIONS_MARKER: &str = "---suggestions---";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarySection {
    pub heading: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredSummary {
    pub summary: String,
    #[serde(default)]
    pub sections: Vec<SummarySection>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub answer: String,
    pub suggestions: Vec<String>,
}

/// Built-in summary prompt templates selectable per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryTemplate {
    Standard,
    Meeting,
    ActionItems,
}

impl SummaryTemplate {
    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "standard" => Some(Self::Standard),
            "meeting" => Some(Self::Meeting),
            "action-items" => Some(Self::ActionItems),
            _ => None,
        }
    }

    pub fn id(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Meeting => "meeting",
            Self::ActionItems => "action-items",
        }
    }

    fn prompt(self) -> &'static str {
        match self {
            Self::Standard => {
                "Summarize the following transcript in 200-300 words, \
                 keeping the key points and their order."
            }
            Self::Meeting => {
                "Summarize the following meeting transcript: list the \
                 participants' main topics, decisions made, and open points."
            }
            Self::ActionItems => {
                "Extract the concrete action items from the following \
                 transcript as a bulleted list, each with an owner if one \
                 was mentioned."
            }
        }
    }
}

impl Default for SummaryTemplate {
    fn default() -> Self {
        Self::Standard
    }
}

#[derive(Clone)]
pub struct SummaryEngine {
    gemini: GeminiClient,
}

impl SummaryEngine {
    pub fn new(gemini: GeminiClient) -> Self {
        Self { gemini }
    }

    /// Structure a transcript into a short summary plus sections.
    ///
    /// The model is asked for JSON; if it returns anything unparseable the
    /// whole transcript becomes one section rather than an error, since the
    /// structured form is decoration over the transcript, not data.
    pub async fn summarize_and_structure(&self, text: &str) -> StructuredSummary {
        let prompt = format!(
            "Analyze the following transcript and return ONLY a JSON object \
             of this shape, no other text:\n\
             {{\"summary\": \"overall summary, 200-300 words\", \
             \"sections\": [{{\"heading\": \"short title\", \"content\": \"section text\"}}]}}\n\n\
             Split the content into 3-5 sections with concise headings, \
             preserving the original wording inside each section.\n\n\
             Transcript:\n{}",
            text
        );

        match self.gemini.generate_text(&prompt).await {
            Ok(raw) => {
                let cleaned = strip_code_fences(&raw);
                match serde_json::from_str::<StructuredSummary>(cleaned) {
                    Ok(structured) => structured,
                    Err(err) => {
                        warn!("structured summary was not valid JSON: {}", err);
                        fallback_summary(text)
                    }
                }
            }
            Err(err) => {
                warn!("structured summary generation failed: {}", err);
                fallback_summary(text)
            }
        }
    }

    /// Template-based summary for the on-demand summarize endpoint.
    pub async fn summarize(
        &self,
        text: &str,
        template: SummaryTemplate,
    ) -> TranscribeResult<String> {
        let prompt = format!("{}\n\nTranscript:\n{}", template.prompt(), text);
        let summary = self.gemini.generate_text(&prompt).await?;
        Ok(summary.trim().to_string())
    }

    /// Answer a question grounded in the transcript, with follow-up
    /// suggestions parsed from a fixed marker.
    pub async fn ask(&self, transcript: &str, question: &str) -> TranscribeResult<Answer> {
        let prompt = format!(
            "Answer the user's question based only on the following transcript.\n\n\
             Rules:\n\
             - Use only information present in the transcript.\n\
             - If the transcript does not contain the answer, say that the \
               audio does not cover it.\n\
             - Keep the answer short and clear; quote the transcript where \
               relevant.\n\
             - After the answer, suggest 2-3 related follow-up questions in \
               exactly this format:\n\
             {}\n\
             - suggested question 1\n\
             - suggested question 2\n\n\
             Transcript:\n{}\n\n\
             Question: {}",
            SUGGESTIONS_MARKER, transcript, question
        );
        let full = self.gemini.generate_text(&prompt).await?;
        let (answer, suggestions) = split_suggestions(&full);
        Ok(Answer {
            answer,
            suggestions,
        })
    }
}

fn fallback_summary(text: &str) -> StructuredSummary {
    let summary: String = if text.chars().count() > 300 {
        let head: String = text.chars().take(300).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    };
    StructuredSummary {
        summary,
        sections: vec![SummarySection {
            heading: "Content".to_string(),
            content: text.to_string(),
        }],
    }
}

/// Strip a leading/trailing markdown code fence the model sometimes wraps
/// JSON output in.
fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
}

fn split_suggestions(full: &str) -> (String, Vec<String>) {
    let full = full.trim();
    match full.find(SUGGESTIONS_MARKER) {
        Some(pos) => {
            let answer = full[..pos].trim().to_string();
            let suggestions = full[pos + SUGGESTIONS_MARKER.len()..]
                .lines()
                .map(|line| line.trim().trim_start_matches('-').trim())
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect();
            (answer, suggestions)
        }
        None => (full.to_string(), Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_json_code_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("{\"a\":1}"), "{\"a\":1}");
    }

    #[test]
    fn splits_answer_and_suggestions() {
        let full = "The meeting was about budget.\n\n---suggestions---\n- What was decided?\n- Who attended?\n";
        let (answer, suggestions) = split_suggestions(full);
        assert_eq!(answer, "The meeting was about budget.");
        assert_eq!(suggestions, vec!["What was decided?", "Who attended?"]);
    }

    #[test]
    fn answer_without_marker_has_no_suggestions() {
        let (answer, suggestions) = split_suggestions("Just an answer.");
        assert_eq!(answer, "Just an answer.");
        assert!(suggestions.is_empty());
    }

    #[test]
    fn fallback_keeps_full_text_as_single_section() {
        let structured = fallback_summary("short transcript");
        assert_eq!(structured.summary, "short transcript");
        assert_eq!(structured.sections.len(), 1);
        assert_eq!(structured.sections[0].content, "short transcript");
    }

    #[test]
    fn fallback_truncates_long_summaries() {
        let long = "x".repeat(1000);
        let structured = fallback_summary(&long);
        assert_eq!(structured.summary.chars().count(), 303);
        assert!(structured.summary.ends_with("..."));
    }

    #[test]
    fn template_ids_round_trip() {
        for template in [
            SummaryTemplate::Standard,
            SummaryTemplate::Meeting,
            SummaryTemplate::ActionItems,
        ] {
            assert_eq!(SummaryTemplate::from_id(template.id()), Some(template));
        }
        assert_eq!(SummaryTemplate::from_id("nope"), None);
    }
}
