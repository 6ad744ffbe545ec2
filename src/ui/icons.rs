//! Shared UI icons.
//!
//! Each icon falls back to plain text on terminals without emoji support.

use console::Emoji;

// Status indicators
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "[SKIP]");

// Stage indicators
pub static RESEARCH: Emoji<'_, '_> = Emoji("🔎 ", "[R]");
pub static PLANNING: Emoji<'_, '_> = Emoji("📝 ", "[P]");
pub static VERIFY: Emoji<'_, '_> = Emoji("🔍 ", "[V]");
pub static BLOCKER: Emoji<'_, '_> = Emoji("🚧 ", "[BLOCK]");

// Execution indicators
pub static WAVE: Emoji<'_, '_> = Emoji("🌊 ", "[W]");
pub static RUNNING: Emoji<'_, '_> = Emoji("▶️  ", "[>]");
pub static PAUSED: Emoji<'_, '_> = Emoji("⏸️  ", "[||]");
pub static HUMAN: Emoji<'_, '_> = Emoji("🙋 ", "[?]");
pub static CLOCK: Emoji<'_, '_> = Emoji("⏱️  ", "[T]");
