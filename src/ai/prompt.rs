use crate::models::{CategoryDef, MUST_READ};

const CLASSIFICATION_PROMPT_TEMPLATE: &str = r#"You are a tweet classifier for a financial/tech Twitter briefing service.

Classify each tweet into exactly one category. Return JSON array.

Categories:
{categories_block}

Rules:
- Be liberal with "skip" — most tweets are noise
- If a tweet has media (has_media=true) and mentions charts/data/TA, classify as "charts"
- Must-read is reserved for truly important, can't-miss content
- Retweets of news with no added commentary → skip
- Engagement bait, self-promotion, ads → skip
- When in doubt between two categories, pick the more conservative one

For each tweet, return:
{"id": "<tweet_id>", "category": "<category_key>", "confidence": <0.0-1.0>, "reason": "<brief reason>"}

Return a JSON array of these objects, nothing else."#;

/// Builds the classifier's system instruction from the category table.
/// `must_read` is assigned deterministically, so it never appears here.
pub fn generate_classification_prompt(categories: &[CategoryDef]) -> String {
    let block = categories
        .iter()
        .filter(|cat| cat.key != MUST_READ)
        .map(|cat| format!("- \"{}\": {}", cat.key, cat.description_for_llm))
        .collect::<Vec<_>>()
        .join("\n");

    CLASSIFICATION_PROMPT_TEMPLATE.replace("{categories_block}", &block)
}
