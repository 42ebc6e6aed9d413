//! Server-side services around the pipeline: webhook authentication and the
//! background job dispatcher.

pub mod dispatcher;
pub mod github_service;
