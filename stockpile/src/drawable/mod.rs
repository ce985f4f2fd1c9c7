//! Decoded image caching for rendering call sites.
//!
//! [`DrawableCache`] keeps a bounded set of decoded images keyed by resource
//! and requested size. [`DrawableLoader`] fills it in the background from
//! resources the coordinator already holds.

mod cache;
mod loader;

pub use cache::{DrawableCache, DrawableKey, DEFAULT_DRAWABLE_CAPACITY, UNSPECIFIED};
pub use loader::{
    scale_to_fit, DecodedImage, DrawableError, DrawableEvent, DrawableLoader, LoadDrawable,
    LoaderContext,
};
