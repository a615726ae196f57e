//! Progress bar for download runs.

use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use mirrorer_core::download::ItemCallback;
use mirrorer_core::{DownloadDescriptor, DownloadError};

/// Builds the bar and the engine callback that advances it.
///
/// Returns `None` when the bar is disabled or there is nothing to download.
pub(crate) fn progress_callback(
    enabled: bool,
    total: usize,
) -> Option<(ProgressBar, ItemCallback)> {
    if !enabled || total == 0 {
        return None;
    }
    let bar = ProgressBar::new(u64::try_from(total).unwrap_or(u64::MAX));
    bar.set_style(
        ProgressStyle::with_template("{spinner} [{pos}/{len}] {wide_bar} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let handle = bar.clone();
    let callback: ItemCallback = Arc::new(
        move |descriptor: &DownloadDescriptor, error: Option<&DownloadError>| {
            let label = descriptor.out_path.clone();
            match error {
                Some(_) => handle.set_message(format!("failed {label}")),
                None => handle.set_message(label),
            }
            handle.inc(1);
        },
    );
    Some((bar, callback))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_callback_disabled_returns_none() {
        assert!(progress_callback(false, 10).is_none());
        assert!(progress_callback(true, 0).is_none());
    }

    #[test]
    fn test_progress_callback_advances_bar() {
        let (bar, callback) = progress_callback(true, 2).unwrap();
        let descriptor = DownloadDescriptor::new("https://host/a", "host/a");
        callback(&descriptor, None);
        assert_eq!(bar.position(), 1);
        bar.finish_and_clear();
    }
}
