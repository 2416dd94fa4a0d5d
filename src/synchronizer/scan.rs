use std::path::PathBuf;

use futures::{FutureExt, SinkExt, pin_mut, select};
use futures_channel::mpsc::Sender;
use snafu::Snafu;
use tokio_util::sync::CancellationToken;

use crate::ext::BestEffortPathExt;
use crate::filesystem::WalkError;

/// Hands `action` to the dispatcher, waiting for queue space.
///
/// The wait races the cancellation signal, so a scanner never stays blocked on a
/// queue nobody is going to read anymore.
pub(super) async fn enqueue<T>(
    queue: &mut Sender<T>,
    action: T,
    cancellation: &CancellationToken,
) -> Result<(), ScanError> {
    if cancellation.is_cancelled() {
        return CancelledSnafu.fail();
    }

    let send = queue.send(action).fuse();
    let cancelled = cancellation.cancelled().fuse();
    pin_mut!(send, cancelled);

    select! {
        sent = send => sent.map_err(|_| ScanError::DispatcherStoppedError),
        () = cancelled => CancelledSnafu.fail(),
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(super)))]
pub enum ScanError {
    #[snafu(display("Failed to traverse the tree"))]
    TraversalError { source: WalkError },
    #[snafu(display("Failed to create destination directory {}", path.best_effort_path_display()))]
    DirectoryCreateError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Scan abandoned after cancellation"))]
    CancelledError,
    #[snafu(display("Action dispatcher stopped before the scan finished"))]
    DispatcherStoppedError,
}

impl ScanError {
    /// Whether the scan was stopped from outside rather than failing on its own
    pub fn is_interruption(&self) -> bool {
        matches!(
            self,
            ScanError::CancelledError | ScanError::DispatcherStoppedError
        )
    }
}
