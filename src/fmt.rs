use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

static FORCE_NO_COLOR: AtomicBool = AtomicBool::new(false);
static COLOR: OnceLock<bool> = OnceLock::new();

pub(crate) fn disable_color() {
    FORCE_NO_COLOR.store(true, Ordering::Relaxed);
}

pub(crate) fn use_color() -> bool {
    if FORCE_NO_COLOR.load(Ordering::Relaxed) {
        return false;
    }
    *COLOR.get_or_init(|| std::env::var("NO_COLOR").is_err() && atty::is(atty::Stream::Stdout))
}

pub(crate) fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_esc = false;
    for ch in s.chars() {
        if in_esc {
            if ch == 'm' {
                in_esc = false;
            }
        } else if ch == '\x1b' {
            in_esc = true;
        } else {
            out.push(ch);
        }
    }
    out
}

macro_rules! cprintln {
    () => { println!() };
    ($($arg:tt)*) => {{
        let s = format!($($arg)*);
        if $crate::fmt::use_color() {
            println!("{s}");
        } else {
            println!("{}", $crate::fmt::strip_ansi(&s));
        }
    }};
}
pub(crate) use cprintln;

macro_rules! ceprintln {
    () => { eprintln!() };
    ($($arg:tt)*) => {{
        let s = format!($($arg)*);
        if $crate::fmt::use_color() {
            eprintln!("{s}");
        } else {
            eprintln!("{}", $crate::fmt::strip_ansi(&s));
        }
    }};
}
pub(crate) use ceprintln;

pub(crate) const RESET: &str = "\x1b[0m";
pub(crate) const BOLD: &str = "\x1b[1m";
pub(crate) const DIM: &str = "\x1b[2m";
pub(crate) const CYAN: &str = "\x1b[36m";
pub(crate) const GREEN: &str = "\x1b[32m";
pub(crate) const YELLOW: &str = "\x1b[33m";

pub(crate) fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

/// Truncate to `max` characters with a trailing ellipsis, never splitting a
/// multi-byte character.
pub(crate) fn trunc(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s
            .char_indices()
            .nth(max.saturating_sub(1))
            .map(|(i, _)| i)
            .unwrap_or(s.len());
        format!("{}…", &s[..end])
    }
}

pub(crate) fn one_line(s: &str) -> String {
    s.replace('\n', " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_ansi_removes_escapes() {
        let s = format!("{BOLD}hi{RESET}");
        assert_eq!(strip_ansi(&s), "hi");
    }

    #[test]
    fn trunc_short_string_unchanged() {
        assert_eq!(trunc("hello", 10), "hello");
    }

    #[test]
    fn trunc_long_string_gets_ellipsis() {
        let t = trunc("hello world", 8);
        assert!(t.ends_with('…'));
        assert!(t.chars().count() <= 8);
    }

    #[test]
    fn trunc_handles_multibyte() {
        let t = trunc("微信聊天记录导出工具", 4);
        assert!(t.ends_with('…'));
    }

    #[test]
    fn short_id_takes_prefix() {
        assert_eq!(short_id("0123456789abcdef"), "01234567");
        assert_eq!(short_id("abc"), "abc");
    }

    #[test]
    fn one_line_flattens() {
        assert_eq!(one_line("a\nb"), "a b");
    }
}
