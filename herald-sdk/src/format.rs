//! mIRC text formatting removal.
//!
//! Announce bots decorate their lines with colors and bold; extraction
//! patterns are written against the plain text.

use std::iter::Peekable;
use std::str::Chars;

const BOLD: char = '\x02';
const COLOR: char = '\x03';
const HEX_COLOR: char = '\x04';
const RESET: char = '\x0f';
const MONOSPACE: char = '\x11';
const REVERSE: char = '\x16';
const ITALIC: char = '\x1d';
const STRIKETHROUGH: char = '\x1e';
const UNDERLINE: char = '\x1f';

/// Remove all formatting control codes from `text`.
pub fn strip_formatting(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            BOLD | RESET | MONOSPACE | REVERSE | ITALIC | STRIKETHROUGH | UNDERLINE => {}
            COLOR => skip_color(&mut chars, 2, |c| c.is_ascii_digit()),
            HEX_COLOR => skip_color(&mut chars, 6, |c| c.is_ascii_hexdigit()),
            other => out.push(other),
        }
    }

    out
}

/// Skip `fg[,bg]` after a color code. The comma is only consumed when a
/// background value follows it.
fn skip_color(chars: &mut Peekable<Chars<'_>>, width: usize, valid: fn(char) -> bool) {
    if skip_digits(chars, width, valid) == 0 {
        return;
    }
    if chars.peek() != Some(&',') {
        return;
    }
    let mut lookahead = chars.clone();
    lookahead.next();
    if lookahead.peek().is_some_and(|c| valid(*c)) {
        chars.next();
        skip_digits(chars, width, valid);
    }
}

fn skip_digits(chars: &mut Peekable<Chars<'_>>, max: usize, valid: fn(char) -> bool) -> usize {
    let mut taken = 0;
    while taken < max && chars.peek().is_some_and(|c| valid(*c)) {
        chars.next();
        taken += 1;
    }
    taken
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_untouched() {
        assert_eq!(strip_formatting("Name:'foo' uploaded by 'bar'"), "Name:'foo' uploaded by 'bar'");
    }

    #[test]
    fn strips_bold_underline_reset() {
        assert_eq!(strip_formatting("\x02New\x02 \x1fTorrent\x0f!"), "New Torrent!");
    }

    #[test]
    fn strips_colors_with_background() {
        assert_eq!(strip_formatting("\x0304,12red on blue\x03 plain"), "red on blue plain");
        assert_eq!(strip_formatting("\x033green"), "green");
    }

    #[test]
    fn keeps_comma_without_background() {
        assert_eq!(strip_formatting("\x0304,text"), ",text");
        assert_eq!(strip_formatting("\x03,5x"), ",5x");
    }

    #[test]
    fn color_digits_capped_at_two() {
        assert_eq!(strip_formatting("\x03123 items"), "3 items");
    }

    #[test]
    fn strips_hex_color() {
        assert_eq!(strip_formatting("\x04FF0000,00FF00hex\x04 done"), "hex done");
    }
}
