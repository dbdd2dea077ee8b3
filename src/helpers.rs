//! Stateless line cleanup and value conversion helpers.
//!
//! Every function here takes line text and returns new text or values; none
//! of them keeps state between calls.

use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Number, Value};

/// Regex pattern for matching and removing control characters at the start of lines.
///
/// Matches carriage returns and backspace characters that may appear at the
/// beginning of terminal output and interfere with line parsing.
pub static IGNORE_START_LINE: Lazy<Regex> =
    Lazy::new(
        || match Regex::new(r"^(\r+(\s+\r+)*)|(\u{8}+(\s+\u{8}+)*)") {
            Ok(re) => re,
            Err(err) => panic!("invalid IGNORE_START_LINE regex: {err}"),
        },
    );

/// Xterm "set window title" sequences (`ESC ] 0 ; title BEL`).
static XTERM_WINDOW_TITLE: Lazy<Regex> =
    Lazy::new(|| match Regex::new(r"\x1b\][0-2];[^\x07]*\x07") {
        Ok(re) => re,
        Err(err) => panic!("invalid XTERM_WINDOW_TITLE regex: {err}"),
    });

/// CSI sequences (colors, cursor movement).
static ANSI_CSI: Lazy<Regex> = Lazy::new(|| match Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]") {
    Ok(re) => re,
    Err(err) => panic!("invalid ANSI_CSI regex: {err}"),
});

static COLUMN_SPLIT: Lazy<Regex> = Lazy::new(|| match Regex::new(r"\s+") {
    Ok(re) => re,
    Err(err) => panic!("invalid COLUMN_SPLIT regex: {err}"),
});

static FREE_TEXT_COLUMN: Lazy<Regex> = Lazy::new(|| match Regex::new(r"^(COMMAND|CMD)") {
    Ok(re) => re,
    Err(err) => panic!("invalid FREE_TEXT_COLUMN regex: {err}"),
});

/// Removes leading carriage returns and backspaces.
pub fn remove_start_line_noise(line: &str) -> Cow<'_, str> {
    IGNORE_START_LINE.replace(line, "")
}

/// Removes xterm window title sequences some shells emit before the prompt.
pub fn remove_xterm_window_title_hack(line: &str) -> Cow<'_, str> {
    XTERM_WINDOW_TITLE.replace_all(line, "")
}

/// Removes ANSI CSI escape sequences.
pub fn strip_ansi(line: &str) -> Cow<'_, str> {
    ANSI_CSI.replace_all(line, "")
}

/// Minimal cleanup applied to every line before observers see it.
pub fn clean_line(line: &str) -> Cow<'_, str> {
    let cleaned = strip_ansi(&remove_xterm_window_title_hack(line)).into_owned();
    match remove_start_line_noise(&cleaned) {
        Cow::Borrowed(s) if s.len() == line.len() => Cow::Borrowed(line),
        other => Cow::Owned(other.into_owned()),
    }
}

/// Converts a text token into the narrowest value it represents.
///
/// An integer is used only when it prints back to exactly the same text
/// (`"007"` is not an integer), then a finite float, otherwise the text.
pub fn convert_data_to_type(data: &str) -> Value {
    if let Ok(int) = data.parse::<i64>()
        && int.to_string() == data
    {
        return Value::Number(int.into());
    }
    if let Ok(float) = data.parse::<f64>()
        && let Some(number) = Number::from_f64(float)
    {
        return Value::Number(number);
    }
    Value::String(data.to_string())
}

/// Splits a whitespace separated header line into column names.
pub fn header_columns(line: &str) -> Vec<String> {
    line.split_whitespace().map(str::to_string).collect()
}

/// Splits a data line into exactly `columns.len()` values.
///
/// The free-text column (`CMD`/`COMMAND`, otherwise the last one) absorbs the
/// tokens exceeding the column count, joined by single spaces. Returns `None`
/// for lines with fewer tokens than columns.
pub fn split_columns(line: &str, columns: &[String]) -> Option<Vec<String>> {
    let trimmed = line.trim();
    if columns.is_empty() || trimmed.is_empty() {
        return None;
    }
    let tokens: Vec<&str> = COLUMN_SPLIT.split(trimmed).collect();
    if tokens.len() < columns.len() {
        return None;
    }

    let free_text = columns
        .iter()
        .position(|c| FREE_TEXT_COLUMN.is_match(c))
        .unwrap_or(columns.len() - 1);
    let extra = tokens.len() - columns.len();

    let mut values = Vec::with_capacity(columns.len());
    let mut tokens = tokens.into_iter();
    for idx in 0..columns.len() {
        let take = if idx == free_text { extra + 1 } else { 1 };
        let value = tokens.by_ref().take(take).collect::<Vec<_>>().join(" ");
        values.push(value);
    }
    Some(values)
}
