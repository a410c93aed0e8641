//! # Tower Shed
//!
//! `tower-shed` brings the adaptive shedders of [`shed_limit`] to the
//! [Tower](https://github.com/tower-rs/tower) ecosystem.
//!
//! ## How it works
//! Every request is offered to a [`Shedder`] before the inner service sees it. Rejected
//! requests fail at once with [`ShedError::Overloaded`]. Admitted requests carry a
//! promise which is resolved when the response future completes:
//!
//! 1. **Classification**: a [`Classify`] implementation decides whether the result was
//!    a pass (the service had capacity) or a fail. By default every `Err` fails; with the
//!    `http` feature, [`HttpStatusClassifier`] also fails 5xx responses.
//! 2. **Cancellation**: a response future dropped before completion fails its promise,
//!    so the in-flight count never leaks.
//! 3. **Keyed Shedding**: [`KeyedShedLayer`] gives each route or tenant its own shedder
//!    from a [`shed_limit::ShedderPool`].
//!
//! ## The Managed Stack
//! [`ManagedShedLayer`] combines shedding with a hard deadline and maps every error into
//! the cloneable [`ShedError`] domain.
//!
//! ## Feature Flags
//!
//! - `http`: Enables [`HttpStatusClassifier`].
//! - `axum`: Enables `IntoResponse` for [`ShedError`], allowing automatic conversion
//!   to HTTP status codes (503, 408, 500).

mod classify;
mod error;
mod layer;
mod managed_layer;
mod service;
mod utils;


#[cfg(doc)]
use shed_limit::Shedder;

pub use classify::Classify;
pub use classify::ErrorClassifier;
#[cfg(feature = "http")]
pub use classify::HttpStatusClassifier;
pub use classify::Outcome;
pub use error::ShedError;
pub use layer::AdaptiveShedLayer;
pub use layer::KeyedShedLayer;
pub use managed_layer::ManagedShedLayer;
pub use service::AdaptiveShedService;
pub use service::Admission;
pub use service::Keyed;
pub use service::ResponseFuture;
pub use utils::ServiceBuilderExt;
