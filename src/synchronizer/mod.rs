//! The scan-diff-transfer pipeline.
//!
//! A run wires two producers and one consumer together:
//!
//! * [`SourceScanner`] walks the source tree, mirrors its directories and queues a
//!   [`SyncAction`] per file.
//! * [`DestinationScanner`] walks the destination tree and queues a [`DeleteAction`]
//!   per entry the source no longer has.
//! * [`ActionDispatcher`] is the only writer of destination file contents. It
//!   applies both queues until they are drained or the run is cancelled.
//!
//! [`Synchronizer`] owns the wiring and the lifetime rules between them.

mod action;
mod destination_scanner;
mod dispatcher;
mod orchestrator;
mod report;
mod scan;
mod source_scanner;
mod transfer;

pub use action::{Action, DeleteAction, SyncAction};
pub use destination_scanner::DestinationScanner;
pub use dispatcher::{ActionDispatcher, ActionError, DispatcherExit};
pub use orchestrator::{SyncError, SyncOptions, Synchronizer, synchronize};
pub use report::{ScanSummary, SyncReport};
pub use scan::ScanError;
pub use source_scanner::{PendingMode, SourceScanner};
pub use transfer::{ChangeDetection, TransferError, TransferOutcome, transfer_file};
