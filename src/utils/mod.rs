mod preview;
mod skippable;

pub use preview::preview_compact;
pub use skippable::{is_skippable_dir, is_skippable_file};
