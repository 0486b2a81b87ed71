use crate::gemini::LanguageModel;
use crate::ingestion::loader::SourceDocument;
use tracing::warn;

/// Returns the first `max_chars` characters of `text` (not bytes).
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

fn code_prompt(path: &str, code: &str) -> String {
    format!(
        "You are an intelligent senior software engineer who specializes in onboarding junior \
         software engineers onto projects. You are explaining the purpose of the {path} file.\n\
         Here is the code:\n\n{code}\n\n\
         Give a to-the-point summary of the code above in under 5000 characters.\n\
         Make sure the output is under 2000 tokens or 5000 characters."
    )
}

fn commit_prompt(diff: &str) -> String {
    format!(
        "You are an expert programmer. Summarize the following git diff as a simple bullet list \
         of changes. For each change, include:\n\
         - A very short action description (e.g. \"Remove X\", \"Add Y\", \"Rename Z to W\")\n\
         - The file path in square brackets\n\
         Only include actual additions (+) or deletions (-). Ignore context lines.\n\
         Format each bullet like:\n\
         * <Action> [<file path>]\n\n\
         Example summary comments:\n\
         * Raised the amount of returned recordings from '10' to '100' [packages/server/recordings_api.ts]\n\
         * Fixed a typo in the github action name [.github/workflows/summariser.yml]\n\
         * Moved the octokit initialization to a separate file [src/octokit.ts], [src/index.ts]\n\
         * Lowered numeric tolerance for test files\n\n\
         Here's the diff:\n{diff}"
    )
}

/// Explains a file for an onboarding engineer. Never fails: a model error
/// is logged and yields an empty string. The length bound in the prompt is a
/// request; the reply is not cut afterwards.
pub async fn summarize_code(model: &dyn LanguageModel, doc: &SourceDocument, max_chars: usize) -> String {
    let code = truncate_chars(&doc.content, max_chars);
    match model.generate_content(&code_prompt(&doc.path, code)).await {
        Ok(text) => text.trim().to_string(),
        Err(e) => {
            warn!(path = %doc.path, error = %e, "Error while summarising file");
            String::new()
        }
    }
}

/// Bullet-list summary of a diff. Empty diffs skip the model call.
pub async fn summarize_commit(model: &dyn LanguageModel, diff: &str) -> String {
    if diff.is_empty() {
        return String::new();
    }
    match model.generate_content(&commit_prompt(diff)).await {
        Ok(text) => text.trim().to_string(),
        Err(e) => {
            warn!(error = %e, "Error while summarising commit");
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingModel {
        prompts: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl LanguageModel for RecordingModel {
        async fn generate_content(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            if self.fail {
                anyhow::bail!("503 unavailable");
            }
            Ok("  a summary \n".to_string())
        }

        async fn embed_content(&self, _text: &str, _dimensionality: usize) -> Result<Vec<f32>> {
            Ok(Vec::new())
        }
    }

    fn doc(content: &str) -> SourceDocument {
        SourceDocument {
            path: "src/main.rs".into(),
            content: content.into(),
        }
    }

    #[test]
    fn truncate_counts_characters_not_bytes() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("abc", 0), "");
    }

    #[tokio::test]
    async fn code_prompt_carries_truncated_content_and_path() {
        let model = RecordingModel::default();
        let long = "x".repeat(12_000);
        let summary = summarize_code(&model, &doc(&long), 10_000).await;
        assert_eq!(summary, "a summary");

        let prompts = model.prompts.lock().unwrap();
        assert!(prompts[0].contains("src/main.rs"));
        assert!(prompts[0].contains(&"x".repeat(10_000)));
        assert!(!prompts[0].contains(&"x".repeat(10_001)));
    }

    #[tokio::test]
    async fn model_failure_yields_empty_summary() {
        let model = RecordingModel {
            fail: true,
            ..Default::default()
        };
        assert_eq!(summarize_code(&model, &doc("fn main() {}"), 10_000).await, "");
        assert_eq!(summarize_commit(&model, "+added").await, "");
    }

    #[tokio::test]
    async fn empty_diff_skips_model_call() {
        let model = RecordingModel::default();
        assert_eq!(summarize_commit(&model, "").await, "");
        assert!(model.prompts.lock().unwrap().is_empty());
    }
}
