//! Pipeline stages for downloading one chapter.
//!
//! Each submodule implements exactly one step, so each is independently
//! testable against a static page.
//!
//! ## Data Flow
//!
//! ```text
//! page ──▶ identify ──▶ extract ──▶ fetch/encode ──▶ paginate ──▶ document
//!          (label)      (links)    (NNN.jpg)        (group size)  (PDF)
//! ```
//!
//! 1. [`identify`]: resolve `Chapter_NNN` from the page marker or the URL
//! 2. [`extract`]: collect image URLs and locate the next-chapter link
//! 3. [`fetch`]: download each image with retries; the only stage with
//!    network I/O
//! 4. [`encode`]: normalise colour, cap width, write JPEG; runs in
//!    `spawn_blocking`
//! 5. [`paginate`]: choose how many images share one page
//! 6. [`document`]: compose pages and write the PDF; runs in `spawn_blocking`
//!
//! [`detect`] runs once per walk on the start page to estimate the chapter
//! total.

pub mod detect;
pub mod document;
pub mod encode;
pub mod extract;
pub mod fetch;
pub mod identify;
pub mod paginate;
