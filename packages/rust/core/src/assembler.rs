//! Context prompt assembly.
//!
//! Turns a crawl's sections into the single bounded prompt handed to the
//! generator. The output is a pure function of the section list and its
//! order: sections are grouped by source URL in first-seen order, about
//! pages go first under their own heading, and every other URL contributes
//! its first section until the group cap is reached.

use std::collections::HashMap;

use tracing::debug;

use sitechat_shared::{ContextConfig, Section};

/// Heading for the about-page block.
const ABOUT_HEADING: &str = "ABOUT THE COMPANY/WEBSITE:";

const PREAMBLE_BODY: &str = "\
You are the official chatbot for this website. You must respond in a human-like, conversational manner with emotional intelligence. Always try to be helpful, but recognize when a situation needs human escalation.

IMPORTANT RULES:
1. Always respond in a conversational, human-like manner
2. Detect and adapt to user emotions in your responses
3. If a user seems frustrated, confused, or if you cannot fully answer their question after 2-3 attempts, offer to connect them with a human team member
4. When escalation is appropriate, ask for their email address
5. Maintain the conversation context throughout the interaction
6. Be proactive in offering solutions

The following is information extracted from the website. Use this information to answer user questions:
";

const CLOSING_INSTRUCTIONS: &str = "
INSTRUCTIONS:
1. Answer questions based ONLY on the information provided above.
2. If the answer cannot be found in the provided information, say so clearly.
3. Respond as if you are the official chatbot for this website.
4. Be concise but thorough in your responses.
5. Cite specific pages/URLs when possible in your answers.
6. Use a conversational, friendly tone while remaining professional.
7. Show empathy when users express confusion or frustration.
8. Offer escalation to a human team member if:
   - You detect user frustration
   - The user has repeated the same question multiple times
   - You cannot provide a satisfactory answer
   - The request is complex or requires human judgment
   - The user explicitly asks for human assistance

ESCALATION PROCEDURE:
If escalation is needed, say: \"I'd be happy to connect you with a team member who can help further. Could you please provide your email address so they can contact you?\"
";

const LIMITED_CONTENT_BODY: &str = "\
The website appears to have limited content available. Answer user questions politely, and if you don't know information about the website, simply acknowledge that the information is not available.

You must strive to be human-like in all interactions:
- Show empathy and emotional intelligence
- Recognize user frustration or confusion quickly
- Maintain conversation context between messages
- Be proactive in offering solutions
- Escalate to a human agent when appropriate

If the user seems frustrated, confused, or if you cannot fully answer their question after 2-3 attempts, offer to connect them with a human team member by asking for their email address.
";

/// Prompt used before any scan has produced content.
pub fn default_persona_prompt(site_url: &str) -> String {
    format!(
        "You are a helpful AI assistant for the website: {site_url}. Answer user questions about \
         this website and its content in a friendly, professional manner. If you don't know the \
         answer, simply say so politely."
    )
}

/// Prompt for a crawl that produced no sections at all.
pub fn limited_content_prompt(site_url: &str) -> String {
    format!("You are a helpful AI assistant for the website: {site_url}.\n\n{LIMITED_CONTENT_BODY}")
}

/// Builds context prompts with bounded about and content blocks.
#[derive(Debug, Clone, Copy)]
pub struct ContextAssembler {
    max_about_sections: usize,
    max_content_groups: usize,
}

impl ContextAssembler {
    pub fn new(max_about_sections: usize, max_content_groups: usize) -> Self {
        Self {
            max_about_sections,
            max_content_groups,
        }
    }

    /// Assemble the prompt for `site_url` from `sections`.
    pub fn build_prompt(&self, sections: &[Section], site_url: &str) -> String {
        if sections.is_empty() {
            return limited_content_prompt(site_url);
        }

        let groups = group_by_url(sections);
        let (about, other): (Vec<_>, Vec<_>) = groups
            .iter()
            .partition(|(url, _)| url.to_lowercase().contains("about"));

        let mut prompt = format!("You are a helpful AI assistant for the website: {site_url}\n\n");
        prompt.push_str(PREAMBLE_BODY);

        let about_sections: Vec<&Section> = about
            .iter()
            .flat_map(|(_, group)| group.iter().copied())
            .take(self.max_about_sections)
            .collect();
        if !about_sections.is_empty() {
            prompt.push('\n');
            prompt.push_str(ABOUT_HEADING);
            prompt.push('\n');
            for section in &about_sections {
                prompt.push_str(&section.raw_content);
                prompt.push_str("\n\n");
            }
        }

        let mut emitted = 0;
        for (url, group) in other.iter().take(self.max_content_groups) {
            let Some(first) = group.first() else {
                continue;
            };
            prompt.push_str(&format!("\n--- CONTENT FROM: {url} ---\n\n"));
            prompt.push_str(&first.raw_content);
            prompt.push_str("\n\n");
            emitted += 1;
        }

        prompt.push_str(CLOSING_INSTRUCTIONS);

        debug!(
            sections = sections.len(),
            groups = groups.len(),
            about = about_sections.len(),
            content_blocks = emitted,
            chars = prompt.len(),
            "assembled context prompt"
        );

        prompt
    }
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self::from(&ContextConfig::default())
    }
}

impl From<&ContextConfig> for ContextAssembler {
    fn from(config: &ContextConfig) -> Self {
        Self::new(config.max_about_sections, config.max_content_groups)
    }
}

/// Group sections by source URL, groups ordered by first occurrence.
fn group_by_url(sections: &[Section]) -> Vec<(&str, Vec<&Section>)> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<(&str, Vec<&Section>)> = Vec::new();

    for section in sections {
        let url = section.source_url.as_str();
        match index.get(url) {
            Some(&i) => groups[i].1.push(section),
            None => {
                index.insert(url, groups.len());
                groups.push((url, vec![section]));
            }
        }
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(url: &str, raw: &str) -> Section {
        Section::new(url, raw.to_string(), String::new())
    }

    #[test]
    fn empty_sections_use_limited_content_template() {
        let prompt = ContextAssembler::default().build_prompt(&[], "https://x.test");
        assert!(prompt.starts_with("You are a helpful AI assistant for the website: https://x.test."));
        assert!(prompt.contains("limited content available"));
        assert!(!prompt.contains("CONTENT FROM"));
    }

    #[test]
    fn about_block_precedes_content_blocks() {
        let sections = vec![
            section("https://x/", "PAGE TITLE: Home\n\nWelcome home."),
            section("https://x/about", "PAGE TITLE: About\n\nWe are X Inc."),
        ];
        let prompt = ContextAssembler::default().build_prompt(&sections, "https://x");

        let about_heading = prompt.find("ABOUT THE COMPANY/WEBSITE:").unwrap();
        let about_body = prompt.find("We are X Inc.").unwrap();
        let home_heading = prompt.find("--- CONTENT FROM: https://x/ ---").unwrap();
        let home_body = prompt.find("Welcome home.").unwrap();

        assert!(about_heading < about_body);
        assert!(about_body < home_heading);
        assert!(home_heading < home_body);
        assert!(!prompt.contains("CONTENT FROM: https://x/about"));
        assert!(prompt.contains("IMPORTANT RULES:"));
        assert!(prompt.trim_end().ends_with("contact you?\""));
    }

    #[test]
    fn content_groups_capped() {
        let sections: Vec<Section> = (0..40)
            .map(|i| section(&format!("https://x/p{i}"), &format!("page {i}")))
            .collect();
        let prompt = ContextAssembler::default().build_prompt(&sections, "https://x");

        assert_eq!(prompt.matches("--- CONTENT FROM:").count(), 30);
        assert!(prompt.contains("CONTENT FROM: https://x/p29 "));
        assert!(!prompt.contains("CONTENT FROM: https://x/p30 "));
    }

    #[test]
    fn about_sections_capped_and_case_insensitive() {
        let sections = vec![
            section("https://x/About", "about one"),
            section("https://x/about-us", "about two"),
            section("https://x/team/ABOUT", "about three"),
            section("https://x/about/history", "about four"),
        ];
        let prompt = ContextAssembler::default().build_prompt(&sections, "https://x");

        assert!(prompt.contains("about one"));
        assert!(prompt.contains("about three"));
        assert!(!prompt.contains("about four"));
        assert_eq!(prompt.matches("--- CONTENT FROM:").count(), 0);
    }

    #[test]
    fn only_first_section_per_url() {
        let sections = vec![
            section("https://x/faq", "first faq"),
            section("https://x/", "home"),
            section("https://x/faq", "second faq"),
        ];
        let prompt = ContextAssembler::default().build_prompt(&sections, "https://x");

        assert!(prompt.contains("first faq"));
        assert!(!prompt.contains("second faq"));
        let faq = prompt.find("CONTENT FROM: https://x/faq").unwrap();
        let home = prompt.find("CONTENT FROM: https://x/ ").unwrap();
        assert!(faq < home);
    }

    #[test]
    fn output_is_deterministic() {
        let sections = vec![
            section("https://x/", "home"),
            section("https://x/about", "about"),
            section("https://x/contact", "contact"),
        ];
        let assembler = ContextAssembler::new(3, 30);
        assert_eq!(
            assembler.build_prompt(&sections, "https://x"),
            assembler.build_prompt(&sections, "https://x")
        );
    }

    #[test]
    fn default_persona_names_site() {
        assert!(default_persona_prompt("https://x.test").contains("website: https://x.test."));
    }
}
