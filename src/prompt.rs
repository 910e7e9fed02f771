//! Prompt templates with `{context}` and `{question}` placeholders.
use thiserror::Error;

const CONTEXT: &str = "{context}";
const QUESTION: &str = "{question}";

/// Template used by the one-shot `ask` command.
pub const ASK_TEMPLATE: &str = r#"
Use the pieces of information provided in the context to answer user's question.
If you dont know the answer, just say that you dont know, dont try to make up an answer.
Dont provide anything out of the given context

Context: {context}
Question: {question}

Start the answer directly and make sure the reader understands the answer like explain in simple,easy words. No small talk please.
"#;

/// Template used by chat sessions.
pub const CHAT_TEMPLATE: &str = r#"
You are MediBot, a highly knowledgeable and concise medical assistant.
Answer the user's question using only the information provided in the context below.
If the answer is not present in the context, respond with "I don't know based on the provided information."
Do not fabricate or guess. Avoid small talk and focus on clarity and accuracy.

Context:
{context}

Question:
{question}

Your answer:
"#;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PromptError {
    #[error("prompt template is missing the {0} placeholder")]
    MissingPlaceholder(&'static str),
}

/// A template known to contain both placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    text: String,
}

impl PromptTemplate {
    pub fn new(text: impl Into<String>) -> Result<Self, PromptError> {
        let text = text.into();
        for placeholder in [CONTEXT, QUESTION] {
            if !text.contains(placeholder) {
                return Err(PromptError::MissingPlaceholder(placeholder));
            }
        }
        Ok(Self { text })
    }

    /// The built-in one-shot template.
    #[must_use]
    pub fn ask() -> Self {
        Self {
            text: ASK_TEMPLATE.to_string(),
        }
    }

    /// The built-in chat template.
    #[must_use]
    pub fn chat() -> Self {
        Self {
            text: CHAT_TEMPLATE.to_string(),
        }
    }

    /// Substitute both placeholders in a single pass, so a `{question}` that
    /// happens to appear inside retrieved context is left untouched.
    #[must_use]
    pub fn render(&self, context: &str, question: &str) -> String {
        let mut out = String::with_capacity(self.text.len() + context.len() + question.len());
        let mut rest = self.text.as_str();
        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let tail = &rest[start..];
            if let Some(after) = tail.strip_prefix(CONTEXT) {
                out.push_str(context);
                rest = after;
            } else if let Some(after) = tail.strip_prefix(QUESTION) {
                out.push_str(question);
                rest = after;
            } else {
                out.push('{');
                rest = &tail[1..];
            }
        }
        out.push_str(rest);
        out
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_templates_are_valid() {
        assert!(PromptTemplate::new(ASK_TEMPLATE).is_ok());
        assert!(PromptTemplate::new(CHAT_TEMPLATE).is_ok());
        assert_eq!(PromptTemplate::ask().as_str(), ASK_TEMPLATE);
    }

    #[test]
    fn test_missing_placeholder_rejected() {
        assert_eq!(
            PromptTemplate::new("Question: {question}"),
            Err(PromptError::MissingPlaceholder("{context}"))
        );
        assert_eq!(
            PromptTemplate::new("Context: {context}"),
            Err(PromptError::MissingPlaceholder("{question}"))
        );
    }

    #[test]
    fn test_render() {
        let t = PromptTemplate::new("C={context}; Q={question}; {other}").unwrap();
        assert_eq!(t.render("facts", "why?"), "C=facts; Q=why?; {other}");
    }

    #[test]
    fn test_render_does_not_rescan_substituted_text() {
        let t = PromptTemplate::new("{context}|{question}").unwrap();
        assert_eq!(t.render("see {question}", "q"), "see {question}|q");
    }

    #[test]
    fn test_render_repeated_placeholders() {
        let t = PromptTemplate::new("{question} {context} {question}").unwrap();
        assert_eq!(t.render("c", "q"), "q c q");
    }
}
