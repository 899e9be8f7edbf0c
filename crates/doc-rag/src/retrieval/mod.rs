//! Query-time retrieval with exact-scan fallback

pub mod keyword;
pub mod pages;
mod search;
pub mod similarity;

pub use keyword::{fuse_rankings, keyword_search};
pub use pages::{detect_pages, expand_with_window, is_page_content_query, page_filter_for};
pub use search::{ExactScan, IndexSearch, RetrievalEngine, SearchStrategy};
pub use similarity::{cosine_similarity, rank_by_similarity};
