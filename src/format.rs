//! Markdown rendering of answers and their sources.
use crate::store::Passage;

pub const NO_RESPONSE: &str = "No response generated.";
pub const NO_SOURCES: &str = "**Sources:** None";

/// Characters of passage content shown per source.
pub const SNIPPET_CHARS: usize = 200;

/// Metadata keys shown for each source, in display order.
const META_FIELDS: [(&str, &str); 3] = [("source", "Source"), ("title", "Title"), ("page", "Page")];

#[must_use]
pub fn format_answer(text: &str) -> String {
    if text.trim().is_empty() {
        return NO_RESPONSE.to_string();
    }
    format!("**Answer:** {text}")
}

/// Numbered list of sources with their metadata and a content snippet.
#[must_use]
pub fn format_sources(passages: &[Passage]) -> String {
    if passages.is_empty() {
        return NO_SOURCES.to_string();
    }

    let mut out = String::from("**Sources:**\n\n");
    for (i, passage) in passages.iter().enumerate() {
        let meta = META_FIELDS
            .iter()
            .filter_map(|(key, label)| {
                passage
                    .meta_display(key)
                    .map(|value| format!("**{label}**: {value}"))
            })
            .collect::<Vec<_>>();
        let meta = if meta.is_empty() {
            "No metadata available".to_string()
        } else {
            meta.join(" | ")
        };
        out.push_str(&format!(
            "**{}. {meta}**\n> {}\n\n",
            i + 1,
            snippet(&passage.content)
        ));
    }
    out.trim_end().to_string()
}

/// Plain listing for the one-shot command: one line per passage with its
/// full content and metadata.
#[must_use]
pub fn format_plain_sources(passages: &[Passage]) -> String {
    if passages.is_empty() {
        return "[]".to_string();
    }
    passages
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let meta = serde_json::to_string(&p.metadata).unwrap_or_default();
            format!("[{}] {} {meta}", i + 1, p.content.trim())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// First [`SNIPPET_CHARS`] characters, with an ellipsis if anything was cut.
#[must_use]
pub fn snippet(content: &str) -> String {
    match content.char_indices().nth(SNIPPET_CHARS) {
        Some((cut, _)) => format!("{}...", &content[..cut]),
        None => content.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_answer_blank() {
        for blank in ["", " ", "\n\t  \n"] {
            assert_eq!(format_answer(blank), "No response generated.");
        }
    }

    #[test]
    fn test_format_answer() {
        assert_eq!(format_answer("Stay hydrated."), "**Answer:** Stay hydrated.");
    }

    #[test]
    fn test_format_sources_empty() {
        assert_eq!(format_sources(&[]), "**Sources:** None");
    }

    #[test]
    fn test_format_sources_with_metadata() {
        let passages = vec![
            Passage::new("Anemia is a lack of red blood cells.")
                .with_meta("source", json!("data/gale.pdf"))
                .with_meta("page", json!(12))
                .with_meta("title", json!("Gale Encyclopedia")),
            Passage::new("Bare passage."),
        ];
        assert_eq!(
            format_sources(&passages),
            "**Sources:**\n\n\
             **1. **Source**: data/gale.pdf | **Title**: Gale Encyclopedia | **Page**: 12**\n\
             > Anemia is a lack of red blood cells.\n\n\
             **2. No metadata available**\n\
             > Bare passage."
        );
    }

    #[test]
    fn test_unknown_metadata_ignored() {
        let p = Passage::new("x").with_meta("author", json!("someone"));
        assert!(format_sources(&[p]).contains("No metadata available"));
    }

    #[test]
    fn test_snippet_boundaries() {
        let exact = "a".repeat(200);
        assert_eq!(snippet(&exact), exact);

        let long = "b".repeat(201);
        assert_eq!(snippet(&long), format!("{}...", "b".repeat(200)));
    }

    #[test]
    fn test_snippet_counts_characters_not_bytes() {
        let text = "é".repeat(250);
        let cut = snippet(&text);
        assert_eq!(cut.chars().count(), 203);
        assert!(cut.ends_with("..."));

        let short = "é".repeat(150);
        assert_eq!(snippet(&short), short);
    }

    #[test]
    fn test_format_plain_sources() {
        let p = Passage::new("  Fever care. ").with_meta("page", json!(3));
        assert_eq!(format_plain_sources(&[p]), r#"[1] Fever care. {"page":3}"#);
        assert_eq!(format_plain_sources(&[]), "[]");
    }
}
