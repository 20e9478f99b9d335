//! Progress-callback trait for per-request pipeline events.
//!
//! Inject an [`Arc<dyn OfferProgressCallback>`] via
//! [`crate::OfferGenerator::with_progress`] to receive stage transitions and
//! per-page rasterisation events while an offer is generated.
//!
//! # Example
//!
//! ```rust
//! use offerdoc::{OfferProgressCallback, Stage};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct PageCounter {
//!     pages: AtomicUsize,
//! }
//!
//! impl OfferProgressCallback for PageCounter {
//!     fn on_stage(&self, request_id: &str, stage: Stage) {
//!         eprintln!("{request_id}: {stage}");
//!     }
//!
//!     fn on_page_rendered(&self, _page_num: usize, _total_pages: usize) {
//!         self.pages.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//! ```

use crate::output::Stage;
use std::sync::Arc;

/// Called by the generator as a request moves through the pipeline.
///
/// Implementations must be `Send + Sync`: pages are rasterised concurrently,
/// so `on_page_rendered` may be called from several threads at once. All
/// methods default to no-ops.
pub trait OfferProgressCallback: Send + Sync {
    /// Called on every stage transition, including the final
    /// `finalized` or `failed`.
    fn on_stage(&self, request_id: &str, stage: Stage) {
        let _ = (request_id, stage);
    }

    /// Called when one page image has been written.
    ///
    /// # Arguments
    /// * `page_num`   : 1-indexed page number
    /// * `total_pages`: pages in the fixed-layout document
    fn on_page_rendered(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl OfferProgressCallback for NoopProgressCallback {}

/// Shared callback handle as stored by the generator.
pub type ProgressCallback = Arc<dyn OfferProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        stages: Mutex<Vec<Stage>>,
        pages: Mutex<Vec<(usize, usize)>>,
    }

    impl OfferProgressCallback for Recorder {
        fn on_stage(&self, _request_id: &str, stage: Stage) {
            self.stages.lock().unwrap().push(stage);
        }

        fn on_page_rendered(&self, page_num: usize, total_pages: usize) {
            self.pages.lock().unwrap().push((page_num, total_pages));
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_stage("oferta_1", Stage::Assembling);
        cb.on_page_rendered(1, 3);
    }

    #[test]
    fn recorder_receives_events_through_arc_dyn() {
        let recorder = Arc::new(Recorder::default());
        let cb: ProgressCallback = recorder.clone();
        cb.on_stage("oferta_1", Stage::Converting);
        cb.on_page_rendered(2, 3);
        cb.on_stage("oferta_1", Stage::Failed);

        assert_eq!(*recorder.stages.lock().unwrap(), vec![Stage::Converting, Stage::Failed]);
        assert_eq!(*recorder.pages.lock().unwrap(), vec![(2, 3)]);
    }
}
