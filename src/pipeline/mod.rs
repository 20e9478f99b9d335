//! Pipeline stages for offer generation.
//!
//! Each submodule implements exactly one step, so each can be tested on its
//! own and the external tools can be swapped for fakes.
//!
//! ## Data Flow
//!
//! ```text
//! request ──▶ substitute ◀── merge ──▶ convert ──▶ rasterize
//!              (tokens)    (fragments) (soffice)   (pdfium)
//!                 └───── assemble ─────┘
//! ```
//!
//! 1. [`merge`]     : skeleton + products → one package; styles, lists,
//!    images and ids are imported from each fragment
//! 2. [`substitute`]: `{{token}}` replacement across formatting runs
//! 3. [`assemble`]  : validation, then merge + substitute into a working `.docx`
//! 4. [`convert`]   : external converter to a fixed-layout document; bounded
//!    by a timeout, killed on expiry
//! 5. [`rasterize`] : one image per page; runs in `spawn_blocking` because
//!    pdfium is not async-safe
//! 6. [`workspace`] : request ids, scratch and staged output directories

pub mod assemble;
pub mod convert;
pub mod merge;
pub mod rasterize;
pub mod substitute;
pub mod workspace;
