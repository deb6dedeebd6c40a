mod content_fetcher;
mod site_registry;

pub use content_fetcher::{strip_html, ArticleExtractor, HttpArticleExtractor};

#[cfg(test)]
pub use content_fetcher::ExtractedArticle;
pub use site_registry::SiteRegistry;
