//! Minimal ANSI color constants for status output, applied unconditionally
//! since `anstream`'s wrapped `println!`/`eprintln!` already strip them
//! when the output stream doesn't support color.

pub const RED: &str = "\x1b[0;31m";
pub const GREEN: &str = "\x1b[0;32m";
pub const YELLOW: &str = "\x1b[0;33m";
pub const GRAY: &str = "\x1b[38;5;248m";
pub const RESET: &str = "\x1b[0m";
