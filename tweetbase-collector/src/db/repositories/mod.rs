//! Repositories borrow a connection rather than owning the pool, so the same
//! code runs standalone or inside an ingestion transaction.

pub mod hashtag_repository;
pub mod post_repository;
pub mod url_repository;
pub mod user_repository;

pub use hashtag_repository::HashtagRepository;
pub use post_repository::PostRepository;
pub use url_repository::UrlRepository;
pub use user_repository::UserRepository;
