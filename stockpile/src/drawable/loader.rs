//! Background decoding of stored images into the drawable cache.
//!
//! Requests go through an [`OperationQueue`]; each one reads the resource
//! from the coordinator, decodes it, shrinks it to the requested box and
//! publishes it in the cache. Concurrent requests for the same key share a
//! single decode, and the newest request always runs first.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};

use image::imageops::FilterType;
use image::DynamicImage;
use thiserror::Error;
use tracing::{debug, trace};

use super::cache::{DrawableCache, DrawableKey, UNSPECIFIED};
use crate::coordinator::ResourceCoordinator;
use crate::error::StorageError;
use crate::operation::{Operation, OperationQueue};
use crate::task::Crypter;

/// A decoded image shared between the cache and its users.
pub type DecodedImage = Arc<DynamicImage>;

/// Reasons a drawable could not be produced.
#[derive(Debug, Error)]
pub enum DrawableError {
    #[error("Failed to read resource: {0}")]
    Storage(#[from] StorageError),

    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
}

/// Outcome delivered to every caller waiting on a key.
#[derive(Debug, Clone)]
pub enum DrawableEvent {
    Loaded {
        key: DrawableKey,
        image: DecodedImage,
    },
    Failed {
        key: DrawableKey,
        error: Arc<DrawableError>,
    },
}

impl DrawableEvent {
    pub fn key(&self) -> &DrawableKey {
        match self {
            DrawableEvent::Loaded { key, .. } | DrawableEvent::Failed { key, .. } => key,
        }
    }
}

/// Largest size not exceeding `max_width` x `max_height` that keeps the
/// aspect ratio. Images are only ever shrunk; a bound of 0 is ignored.
pub fn scale_to_fit(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (width, height);
    }
    let mut scale = 1.0f64;
    if max_width != UNSPECIFIED && width > max_width {
        scale = scale.min(max_width as f64 / width as f64);
    }
    if max_height != UNSPECIFIED && height > max_height {
        scale = scale.min(max_height as f64 / height as f64);
    }
    if scale >= 1.0 {
        return (width, height);
    }
    let scaled = |side: u32| ((side as f64 * scale).round() as u32).max(1);
    (scaled(width), scaled(height))
}

/// State shared by every load operation.
pub struct LoaderContext {
    coordinator: Arc<ResourceCoordinator>,
    cache: Arc<DrawableCache<DecodedImage>>,
    crypter: Option<Crypter>,
    /// Waiters per key. A key leaves this map only in the same critical
    /// section that puts its image in the cache.
    pending: Mutex<HashMap<DrawableKey, Vec<Sender<DrawableEvent>>>>,
    decodes: AtomicUsize,
}

impl LoaderContext {
    fn decode(&self, key: &DrawableKey) -> Result<DecodedImage, DrawableError> {
        self.decodes.fetch_add(1, Ordering::Relaxed);
        let bytes = match &self.crypter {
            Some(crypter) => self.coordinator.read_decrypted(&key.content_id, crypter)?,
            None => self.coordinator.read_bytes(&key.content_id)?,
        };
        let image = image::load_from_memory(&bytes)?;

        let (width, height) =
            scale_to_fit(image.width(), image.height(), key.max_width, key.max_height);
        let image = if (width, height) == (image.width(), image.height()) {
            image
        } else {
            trace!(content_id = %key.content_id, width, height, "Scaling drawable");
            image.resize_exact(width, height, FilterType::Triangle)
        };
        Ok(Arc::new(image))
    }

    fn publish(&self, key: &DrawableKey, result: Result<DecodedImage, DrawableError>) {
        let event = match result {
            Ok(image) => DrawableEvent::Loaded {
                key: key.clone(),
                image,
            },
            Err(error) => {
                debug!(content_id = %key.content_id, error = %error, "Drawable load failed");
                DrawableEvent::Failed {
                    key: key.clone(),
                    error: Arc::new(error),
                }
            }
        };
        let waiters = {
            let mut pending = self.pending.lock().unwrap();
            if let DrawableEvent::Loaded { image, .. } = &event {
                self.cache.insert_key(Arc::clone(image), key.clone());
            }
            pending.remove(key).unwrap_or_default()
        };
        for waiter in waiters {
            let _ = waiter.send(event.clone());
        }
    }
}

/// One queued decode.
#[derive(Debug)]
pub struct LoadDrawable {
    key: DrawableKey,
    priority: i32,
}

impl LoadDrawable {
    pub fn key(&self) -> &DrawableKey {
        &self.key
    }
}

impl Operation for LoadDrawable {
    type Context = LoaderContext;

    fn run(&mut self, context: &LoaderContext) -> bool {
        let result = match context.cache.lookup_key(&self.key) {
            Some(image) => Ok(image),
            None => context.decode(&self.key),
        };
        let succeeded = result.is_ok();
        context.publish(&self.key, result);
        succeeded
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn name(&self) -> &str {
        "load-drawable"
    }
}

/// Decodes stored images on a small thread pool and caches the results.
pub struct DrawableLoader {
    queue: OperationQueue<LoadDrawable>,
    sequence: AtomicI32,
}

impl DrawableLoader {
    pub fn new(
        coordinator: Arc<ResourceCoordinator>,
        cache: Arc<DrawableCache<DecodedImage>>,
        crypter: Option<Crypter>,
        threads: usize,
    ) -> io::Result<Self> {
        let context = Arc::new(LoaderContext {
            coordinator,
            cache,
            crypter,
            pending: Mutex::new(HashMap::new()),
            decodes: AtomicUsize::new(0),
        });
        Ok(Self {
            queue: OperationQueue::new(context, threads)?,
            sequence: AtomicI32::new(0),
        })
    }

    /// Request the image for `content_id` fitted to the given box.
    ///
    /// A cached image is sent on `reply` immediately. Otherwise the decode is
    /// queued (or joined, if one is already pending for the same key) and
    /// the result arrives on `reply` later. Returns `false` when the
    /// resource is not stored, in which case nothing is sent.
    pub fn load(
        &self,
        content_id: &str,
        max_width: u32,
        max_height: u32,
        reply: Sender<DrawableEvent>,
    ) -> bool {
        let key = DrawableKey::new(content_id, max_width, max_height);
        let context = self.queue.context();

        if let Some(image) = context.cache.lookup_key(&key) {
            let _ = reply.send(DrawableEvent::Loaded { key, image });
            return true;
        }
        if !context.coordinator.is_available(content_id) {
            return false;
        }

        {
            let mut pending = context.pending.lock().unwrap();
            // A load may have finished since the lookup above.
            if let Some(image) = context.cache.lookup_key(&key) {
                drop(pending);
                let _ = reply.send(DrawableEvent::Loaded { key, image });
                return true;
            }
            if let Some(waiters) = pending.get_mut(&key) {
                trace!(content_id, "Joining pending drawable load");
                waiters.push(reply);
                return true;
            }
            pending.insert(key.clone(), vec![reply]);
        }

        let priority = self.sequence.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        let accepted = self.queue.add(
            LoadDrawable {
                key: key.clone(),
                priority,
            },
            None,
        );
        if !accepted {
            context.pending.lock().unwrap().remove(&key);
        }
        accepted
    }

    /// Cached image for a key, without queueing anything.
    pub fn cached(&self, content_id: &str, max_width: u32, max_height: u32) -> Option<DecodedImage> {
        self.queue
            .context()
            .cache
            .lookup(content_id, max_width, max_height)
    }

    pub fn is_busy(&self) -> bool {
        self.queue.is_busy()
    }

    /// Images decoded since the loader was created.
    pub fn decode_count(&self) -> usize {
        self.queue.context().decodes.load(Ordering::Relaxed)
    }

    /// Drop queued loads. Their callers see their channel disconnect.
    pub fn clear(&self) -> usize {
        let dropped = self.queue.clear();
        if dropped > 0 {
            // Loads already running publish into an empty entry list.
            self.queue.context().pending.lock().unwrap().clear();
        }
        dropped
    }

    pub fn cache(&self) -> &Arc<DrawableCache<DecodedImage>> {
        &self.queue.context().cache
    }
}
