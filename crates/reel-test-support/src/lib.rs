#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    unreachable_pub,
    rustdoc::broken_intra_doc_links,
    missing_docs
)]

//! Shared test helpers used across integration suites.
//! Layout: fixtures.rs (seed trees, deterministic payloads, descriptors).

pub mod fixtures;
