mod canonical;
mod crawler;
mod fetcher;

pub use crawler::FeedCrawler;
pub use fetcher::{FeedSource, HttpFeedSource};

#[cfg(test)]
pub use fetcher::{FeedEntry, FeedResponse, FeedStatus};
