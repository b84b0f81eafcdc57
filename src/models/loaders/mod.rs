pub mod inbox_loader;

pub use inbox_loader::{load_inbox, InboxRequest};
