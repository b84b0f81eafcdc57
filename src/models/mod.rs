pub mod batch;
pub mod chapter;
pub mod loaders;
pub mod volume;

pub use batch::{
    BatchFailure, BatchPhase, BatchResult, BatchStatus, ChapterOutcome, VolumeOutcome,
};
pub use chapter::{ChapterNumber, ChapterRecord, ChapterStatus, IncomingFile, UserId};
pub use loaders::{load_inbox, InboxRequest};
pub use volume::{RangeLabel, Volume};
