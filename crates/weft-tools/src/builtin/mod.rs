pub mod comprehend;
pub mod http_fetch;

pub use comprehend::{AwsComprehend, KeyPhrasesTool, SentimentTool, TextAnalytics};
pub use http_fetch::HttpFetcherTool;
