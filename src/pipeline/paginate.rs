//! Adaptive pagination: how many chapter images share one PDF page.
//!
//! Webtoon strips are very tall. Stacking ten of them on one page produces
//! pages that readers refuse to render, so the group size shrinks as the
//! tallest image grows, keeping composite pages around 20 000 px.

use std::path::{Path, PathBuf};
use tracing::debug;

/// Target upper bound for a composite page's height, in pixels.
pub const SAFE_PAGE_HEIGHT: u32 = 20_000;

/// Group size for a chapter whose tallest image is `max_height` pixels.
///
/// Always within `1..=10` and non-increasing in `max_height`.
pub fn images_per_page(max_height: u32) -> usize {
    if max_height == 0 {
        return 10;
    }
    if max_height > SAFE_PAGE_HEIGHT {
        return 1;
    }
    let fit = (SAFE_PAGE_HEIGHT / max_height) as usize;
    let cap = if max_height > 10_000 {
        4
    } else if max_height > 5_000 {
        8
    } else {
        10
    };
    fit.clamp(1, cap)
}

/// Height of the tallest readable image. Unreadable files count as 0.
pub fn tallest_image(paths: &[PathBuf]) -> u32 {
    paths
        .iter()
        .filter_map(|p| image_height(p))
        .max()
        .unwrap_or(0)
}

fn image_height(path: &Path) -> Option<u32> {
    match image::image_dimensions(path) {
        Ok((_, h)) => Some(h),
        Err(e) => {
            debug!("Skipping '{}' for page sizing: {e}", path.display());
            None
        }
    }
}
