//! Terminal text helpers shared by the hub and the app capability surface.

use chrono::{TimeZone, Utc};

pub const SEPARATOR_MAX_WIDTH: usize = 120;

pub fn truncate(text: &str, max_len: usize) -> String {
    if text.len() <= max_len {
        return text.to_string();
    }
    let mut end = max_len.saturating_sub(3);
    // Don't split in the middle of a multi-byte character
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

/// Hard cut without ellipsis, still respecting char boundaries.
pub fn clip(text: &str, max_len: usize) -> String {
    if text.len() <= max_len {
        return text.to_string();
    }
    let mut end = max_len;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

pub fn separator(ch: char, width: usize) -> String {
    let width = width.clamp(1, SEPARATOR_MAX_WIDTH);
    std::iter::repeat(ch).take(width).collect()
}

/// Frame a title in an ASCII box:
///
/// ```text
/// +-----------+
/// |   TITLE   |
/// +-----------+
/// ```
pub fn ascii_boxed_title(title: &str) -> String {
    let title = clip(title.trim(), 72);
    let inner = title.chars().count() + 6;
    let bar = format!("+{}+", separator('-', inner));
    format!("{bar}\n|   {title}   |\n{bar}")
}

pub fn format_date(millis: i64) -> String {
    match Utc.timestamp_millis_opt(millis).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M UTC").to_string(),
        None => "unknown".to_string(),
    }
}

pub fn relative_time(millis: i64, now_millis: i64) -> String {
    let delta = now_millis.saturating_sub(millis);
    if delta < 0 || millis <= 0 {
        return "just now".to_string();
    }
    let secs = delta / 1000;
    match secs {
        0..=59 => "just now".to_string(),
        60..=3599 => format!("{}m ago", secs / 60),
        3600..=86_399 => format!("{}h ago", secs / 3600),
        _ => format!("{}d ago", secs / 86_400),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_short() {
        assert_eq!(truncate("hello", 10), "hello");
    }

    #[test]
    fn truncate_long() {
        assert_eq!(truncate("hello world", 8), "hello...");
    }

    #[test]
    fn clip_respects_char_boundary() {
        let s = "héllo";
        let clipped = clip(s, 2);
        assert!(s.starts_with(&clipped));
        assert!(clipped.len() <= 2);
    }

    #[test]
    fn separator_clamps_width() {
        assert_eq!(separator('-', 3), "---");
        assert_eq!(separator('=', 0), "=");
        assert_eq!(separator('=', 10_000).len(), SEPARATOR_MAX_WIDTH);
    }

    #[test]
    fn boxed_title_is_framed() {
        let boxed = ascii_boxed_title("MAIN MENU");
        let lines: Vec<&str> = boxed.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("+-"));
        assert!(lines[1].contains("MAIN MENU"));
        assert_eq!(lines[0], lines[2]);
    }

    #[test]
    fn relative_time_buckets() {
        let now = 1_700_000_000_000;
        assert_eq!(relative_time(now - 5_000, now), "just now");
        assert_eq!(relative_time(now - 120_000, now), "2m ago");
        assert_eq!(relative_time(now - 7_200_000, now), "2h ago");
        assert_eq!(relative_time(now - 172_800_000, now), "2d ago");
    }
}
