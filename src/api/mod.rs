//! HTTP front end for the leaf analyzer.
//!
//! `POST /analyze` takes a base64 photo and answers with the segmentation mask,
//! class percentages and, when a classifier is loaded, the disease guess.
//! Inference is blocking and runs on tokio's blocking pool behind a semaphore.

pub mod error;
pub mod router;
pub mod server;
pub mod types;

pub use error::ApiError;
pub use router::{build_router, AppState};
pub use server::serve;
