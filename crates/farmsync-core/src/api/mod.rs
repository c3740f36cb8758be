//! REST API client module for the farm backend.
//!
//! `ApiClient` fetches tasks, vaccinations, checkups and the vet directory,
//! and implements `RemoteApi`, the seam the sync engine replays queued
//! mutations through. All requests carry `Authorization: Bearer {token}`.

pub mod client;
pub mod error;

pub use client::{ApiClient, RemoteApi, DEFAULT_REQUEST_TIMEOUT_SECS};
pub use error::ApiError;
