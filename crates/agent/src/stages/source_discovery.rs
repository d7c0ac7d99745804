use openrag_core::domain::state::ContentBlock;
use tracing::debug;

use crate::html::ContentExtractor;
use crate::tools::{FetchError, PageFetcher, SearchClient};

/// Searches the web for `question` and folds the top hits into one text block.
///
/// Each hit contributes its numbered title and snippet. Pages that fail with a non-success
/// status, or that are PDF or other binary content, contribute nothing further; readable pages
/// add the text of their main content container.
pub async fn run(
    question: &str,
    search: &dyn SearchClient,
    fetcher: &dyn PageFetcher,
    extractor: &ContentExtractor,
    result_count: u8,
) -> Result<ContentBlock, FetchError> {
    let hits = search.search(question, result_count).await?;
    let mut content = String::new();

    for (index, hit) in hits.iter().enumerate() {
        content.push_str(&format!("{}. {}\n   {}\n\n", index + 1, hit.title, hit.snippet));

        let page = fetcher.fetch(&hit.link).await?;
        if !page.is_success() || page.is_binary() {
            debug!(
                event_name = "stage.source_discovery.page_skipped",
                link = %hit.link,
                status = page.status,
                content_type = page.content_type.as_deref().unwrap_or("unknown"),
                "skipping unreadable page"
            );
            continue;
        }

        if let Some(text) = extractor.extract_main_content(&page.body) {
            content.push_str(&text);
            content.push('\n');
        }
    }

    debug!(
        event_name = "stage.source_discovery.collected",
        hits = hits.len(),
        chars = content.chars().count(),
        "web content collected"
    );

    Ok(ContentBlock::Text(content))
}
