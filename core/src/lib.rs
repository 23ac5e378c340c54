pub mod config;
pub mod domain_lang;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod langid;
pub mod parse;
pub mod records;
pub mod robots;
pub mod round;
pub mod store;
pub mod url;

pub use config::CrawlerConfig;
pub use round::RoundCoordinator;
