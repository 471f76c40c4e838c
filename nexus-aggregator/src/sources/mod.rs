pub mod hacker_news;
pub mod rss_feed;

pub use hacker_news::HackerNewsProvider;
pub use rss_feed::RssFeedProvider;
