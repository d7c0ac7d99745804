//! Prompt builders for each model-facing step.

use openrag_core::domain::chart::ChartQuery;
use openrag_core::domain::dataset::{ColumnCatalog, DatasetCatalog, DatasetSummary};
use openrag_core::domain::state::ContentBlock;
use openrag_core::formats::{AdminLevelTable, ADMIN_LEVEL_TOKENS, CALCULATIONS, DATE_FORMATS};
use serde::Serialize;

use crate::llm::ChatMessage;

const ANALYST_PERSONA: &str = "You are a Senior Data Analyst with expertise in analyzing \
statistical data. You excel at uncovering insights from the data and identifying relationships \
between different datasets.";

fn render<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value)
        .unwrap_or_else(|error| format!("<unserializable: {error}>"))
}

pub fn dataset_selection(question: &str, catalog: &DatasetCatalog) -> Vec<ChatMessage> {
    vec![ChatMessage::user(format!(
        "Question: {question}\n\n\
         Candidate datasets, keyed by dataset key:\n{}\n\n\
         Select every dataset that can help answer the question. \
         Answer with `dataset_key`, a list of keys taken verbatim from the candidates.",
        render(catalog)
    ))]
}

pub fn chart_planning(
    question: &str,
    columns: &ColumnCatalog,
    admin_levels: &AdminLevelTable,
) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(ANALYST_PERSONA),
        ChatMessage::user(format!(
            "Question: {question}\n\n\
             Datasets with their columns, keyed by chart id:\n{}\n\n\
             Admin levels by region and language:\n{}\n\n\
             Plan one chart per useful dataset. For each chart give its `id`, the x-axis columns \
             (`columnID`, `format`), the measures (`columnID`, `calculation`) and the filter \
             columns (`columnID`, `format`).\n\
             - date and datetime columns take a format from: {}\n\
             - space columns take a format from: {}\n\
             - measures must be integer or float columns; calculation is one of: {}\n\n\
             Finish with a single fenced block:\n\
             ```json\n{{\"charts\": [{{\"id\": \"...\", \"x\": [], \"y\": [], \"filter\": []}}]}}\n```",
            render(columns),
            render(admin_levels),
            DATE_FORMATS.join(", "),
            ADMIN_LEVEL_TOKENS.join(", "),
            CALCULATIONS.join(", "),
        )),
    ]
}

pub fn space_classification(
    datasets: &[DatasetSummary],
    admin_levels: &AdminLevelTable,
) -> Vec<ChatMessage> {
    let known: Vec<String> = admin_levels
        .entries()
        .map(|(region, language, _)| format!("{region}/{language}"))
        .collect();

    vec![ChatMessage::user(format!(
        "Datasets:\n{}\n\n\
         For every dataset decide which region its data covers and which language it is written \
         in. Use only these region/language pairs: {}.\n\
         Answer with `datasets`, one `{{id, region, language}}` entry per dataset.",
        render(datasets),
        known.join(", ")
    ))]
}

pub fn query_generation(question: &str, charts: &[ChartQuery]) -> Vec<ChatMessage> {
    vec![ChatMessage::user(format!(
        "Question: {question}\n\n\
         Chart queries:\n{}\n\n\
         Return every chart query unchanged except for its filters. For each filter choose the \
         `operator` and `value` that restrict the data to what the question asks about, using only \
         the options listed on the filter. Keep `format` on date, datetime and space columns; \
         space formats must be one of: {}.\n\
         Answer with `querys`, the full list of chart queries.",
        render(charts),
        ADMIN_LEVEL_TOKENS.join(", ")
    ))]
}

pub fn query_refinement(question: &str, charts: &[ChartQuery]) -> Vec<ChatMessage> {
    vec![ChatMessage::user(format!(
        "Question: {question}\n\n\
         Chart queries with the filter options the backend accepts:\n{}\n\n\
         Fill in each filter's `operator` and `value` from its options so the query answers the \
         question. Drop filters that do not apply. Keep `format` on date, datetime and space \
         columns; space formats must be one of: {}.\n\
         Answer with `querys`, the full list of chart queries.",
        render(charts),
        ADMIN_LEVEL_TOKENS.join(", ")
    ))]
}

pub fn interpretation(
    question: &str,
    search_results: &[ContentBlock],
    language: &str,
    image: Option<&str>,
) -> Vec<ChatMessage> {
    let mut user = ChatMessage::user(format!(
        "Question: ***{question}***\n\
         Information: {}\n\n\
         The information above was gathered for the question. Analyze it in detail, answer the \
         question and give a conclusion. `json_data` and the attached image are the data actually \
         retrieved; study them carefully.\n\n\
         Output format:\n\
         - Answer in \"{language}\"",
        render(search_results)
    ));
    if let Some(image) = image {
        user = user.with_image(image);
    }
    vec![ChatMessage::system(ANALYST_PERSONA), user]
}

#[cfg(test)]
mod tests {
    use openrag_core::domain::state::ContentBlock;
    use openrag_core::formats::AdminLevelTable;

    use super::{chart_planning, interpretation, space_classification};
    use crate::llm::ChatRole;

    #[test]
    fn interpretation_attaches_image_and_language() {
        let messages = interpretation(
            "Which city is largest?",
            &[ContentBlock::Text("1. Wiki\n   snippet\n\n".to_string())],
            "zh-TW",
            Some("iVBORw0KGgo="),
        );

        assert_eq!(messages[0].role, ChatRole::System);
        assert!(messages[1].content.contains("Which city is largest?"));
        assert!(messages[1].content.contains("\"zh-TW\""));
        assert_eq!(messages[1].images, vec!["iVBORw0KGgo=".to_string()]);
    }

    #[test]
    fn planning_prompt_lists_whitelists() {
        let messages = chart_planning("q", &Default::default(), &AdminLevelTable::default());
        let body = &messages[1].content;

        assert!(body.contains("quarter"));
        assert!(body.contains("admin_level_10"));
        assert!(body.contains("distinct_count"));
        assert!(body.contains("```json"));
    }

    #[test]
    fn space_prompt_offers_known_pairs_only() {
        let mut table = AdminLevelTable::empty();
        table.insert("R1", "L1", "admin_level_4");
        let messages = space_classification(&[], &table);

        assert!(messages[0].content.contains("R1/L1"));
        assert!(!messages[0].content.contains("TW/"));
    }
}
