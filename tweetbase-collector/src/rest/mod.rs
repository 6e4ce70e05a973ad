pub mod client;
pub mod pages;

pub use client::{
    AccountBatch, AccountRef, Endpoint, Quota, RateLimitedClient, SearchPage, INITIAL_BUDGET,
    LOOKUP_BATCH_SIZE, PAGE_SIZE,
};
pub use pages::{ArchivePages, LookupPages};
