pub mod clipboard;
pub mod paste;
pub mod shortcuts;

pub use clipboard::{ClipboardIo, MemoryClipboard, SystemClipboard};
pub use paste::{PasteSettings, PasteSimulator};
pub use shortcuts::{parse_shortcut, GlobalShortcuts, TriggerEvent};
