//! # Library Management Module
//!
//! Entity data for the songbook core: decoding, caching, active-id tracking,
//! bulk fetch and the ownership library.
//!
//! ## Overview
//!
//! This module manages:
//! - Schema validation of raw backend rows, with a lenient repair path
//! - Entity caches (public songs, private notes) and the library cache
//! - Active-id registries, one per [`RegistryKind`]
//! - The fetch-and-merge pipeline (one batched query per call)
//! - The library slice (add / remove / reload with user-visible error state)

pub mod cache;
pub mod enrich;
pub mod error;
pub mod fetch;
pub mod models;
pub mod registry;
pub mod slice;
pub mod validation;

pub use cache::{CachedEntity, EntityCache, LibraryCache, SharedCache, SharedLibraryCache};
pub use error::{LibraryError, Result};
pub use fetch::{FetchPipeline, FetchReport};
pub use models::{Entity, LibraryEntry, PrivateSong, Slide, Song};
pub use registry::{ActiveIdRegistry, RegistryKind};
pub use slice::{AddToLibraryRequest, LibrarySlice, MembershipChange, RemoveFromLibraryRequest};
pub use validation::{slugify, ValidationError};
