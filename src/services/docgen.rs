//! src/services/docgen.rs
//!
//! Renders a finished transcript into a markdown document for drive upload.
//! Long transcripts get an AI summary and structured sections in front of
//! the full text; the structuring pass is fallback-safe, so generation only
//! fails on disk errors.

use crate::services::summarizer::{StructuredSummary, SummaryEngine};
use chrono::Utc;
use std::{io, path::PathBuf};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

pub const DOC_MIME_TYPE: &str = "text/markdown";

/// Transcripts shorter than this skip the AI summary pass.
const MIN_CHARS_FOR_AI_SUMMARY: usize = 500;

#[derive(Clone)]
pub struct DocumentGenerator {
    summary: SummaryEngine,
    output_dir: PathBuf,
}

impl DocumentGenerator {
    pub fn new(summary: SummaryEngine, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            summary,
            output_dir: output_dir.into(),
        }
    }

    /// Write the document to a temp location and return its path. The caller
    /// owns the file and removes it after the drive upload.
    pub async fn generate(&self, transcript: &str, original_name: &str) -> io::Result<PathBuf> {
        let structured = if transcript.chars().count() >= MIN_CHARS_FOR_AI_SUMMARY {
            debug!(chars = transcript.chars().count(), "generating AI summary for document");
            Some(self.summary.summarize_and_structure(transcript).await)
        } else {
            None
        };

        let content = render_markdown(transcript, original_name, structured.as_ref());

        fs::create_dir_all(&self.output_dir).await?;
        let path = self
            .output_dir
            .join(format!("transcript_{}.md", Uuid::new_v4()));
        fs::write(&path, content).await?;
        Ok(path)
    }
}

fn render_markdown(
    transcript: &str,
    original_name: &str,
    structured: Option<&StructuredSummary>,
) -> String {
    let mut doc = String::new();
    doc.push_str("# Transcription Result\n\n");
    doc.push_str(&format!("> **Source file:** {}\n", original_name));
    doc.push_str(&format!(
        "> **Created:** {}\n\n",
        Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    ));

    if let Some(structured) = structured {
        doc.push_str("## Summary\n\n");
        doc.push_str(&structured.summary);
        doc.push_str("\n\n## Content\n\n");
        for section in &structured.sections {
            doc.push_str(&format!("### {}\n\n{}\n\n", section.heading, section.content));
        }
        doc.push_str("## Full Transcript\n\n");
    } else {
        doc.push_str("## Transcript\n\n");
    }
    doc.push_str(transcript);
    doc.push('\n');
    doc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::summarizer::SummarySection;

    #[test]
    fn short_transcript_renders_without_summary() {
        let doc = render_markdown("hello world", "talk.mp3", None);
        assert!(doc.contains("# Transcription Result"));
        assert!(doc.contains("**Source file:** talk.mp3"));
        assert!(doc.contains("## Transcript\n\nhello world"));
        assert!(!doc.contains("## Summary"));
    }

    #[test]
    fn structured_transcript_renders_summary_and_sections() {
        let structured = StructuredSummary {
            summary: "overview".into(),
            sections: vec![SummarySection {
                heading: "Opening".into(),
                content: "greetings".into(),
            }],
        };
        let doc = render_markdown("full text", "talk.mp3", Some(&structured));
        assert!(doc.contains("## Summary\n\noverview"));
        assert!(doc.contains("### Opening\n\ngreetings"));
        assert!(doc.contains("## Full Transcript\n\nfull text"));
    }
}
