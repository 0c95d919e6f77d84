//! ANSI escape sequence to HTML rendering
//!
//! SGR sequences (colors, bold, italic, underline, strike) become `<span>`
//! elements with inline styles. Every other escape sequence is dropped.

use std::fmt::Write as _;

use once_cell::sync::Lazy;
use regex::Regex;

/// CSI sequences, OSC strings and two-byte escapes
static ESCAPE_SEQUENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\x1b(?:\[([0-9;:?<=>]*)[ -/]*([@-~])|\][^\x07\x1b]*(?:\x07|\x1b\\)?|[()*+#%][ -~]|[@-Z\x5c-\x5f])",
    )
    .expect("static regex is valid")
});

/// The 16 base terminal colors
const PALETTE: [&str; 16] = [
    "#000000", "#aa0000", "#00aa00", "#aa5500", "#0000aa", "#aa00aa", "#00aaaa", "#aaaaaa",
    "#555555", "#ff5555", "#55ff55", "#ffff55", "#5555ff", "#ff55ff", "#55ffff", "#ffffff",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Indexed(u8),
    Rgb(u8, u8, u8),
}

impl Color {
    fn css(self) -> String {
        match self {
            Color::Indexed(n) if n < 16 => PALETTE[n as usize].to_string(),
            Color::Indexed(n) if n < 232 => {
                let i = n - 16;
                let level = |v: u8| if v == 0 { 0 } else { 55 + 40 * v };
                format!(
                    "#{:02x}{:02x}{:02x}",
                    level(i / 36),
                    level((i / 6) % 6),
                    level(i % 6)
                )
            }
            Color::Indexed(n) => {
                let gray = 8 + 10 * (n - 232);
                format!("#{gray:02x}{gray:02x}{gray:02x}")
            }
            Color::Rgb(r, g, b) => format!("#{r:02x}{g:02x}{b:02x}"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Style {
    bold: bool,
    dim: bool,
    italic: bool,
    underline: bool,
    strike: bool,
    fg: Option<Color>,
    bg: Option<Color>,
}

impl Style {
    fn is_plain(&self) -> bool {
        *self == Style::default()
    }

    fn css(&self) -> String {
        let mut rules = Vec::new();
        if let Some(fg) = self.fg {
            rules.push(format!("color:{}", fg.css()));
        }
        if let Some(bg) = self.bg {
            rules.push(format!("background-color:{}", bg.css()));
        }
        if self.bold {
            rules.push("font-weight:bold".to_string());
        }
        if self.dim {
            rules.push("opacity:0.7".to_string());
        }
        if self.italic {
            rules.push("font-style:italic".to_string());
        }
        match (self.underline, self.strike) {
            (true, true) => rules.push("text-decoration:underline line-through".to_string()),
            (true, false) => rules.push("text-decoration:underline".to_string()),
            (false, true) => rules.push("text-decoration:line-through".to_string()),
            (false, false) => {}
        }
        rules.join(";")
    }

    /// Apply one SGR parameter list such as `1;38;5;208`
    fn apply(&mut self, params: &str) {
        let codes: Vec<u16> = if params.is_empty() {
            vec![0]
        } else {
            params
                .split([';', ':'])
                .map(|p| p.parse().unwrap_or(0))
                .collect()
        };

        let mut i = 0;
        while i < codes.len() {
            match codes[i] {
                0 => *self = Style::default(),
                1 => self.bold = true,
                2 => self.dim = true,
                3 => self.italic = true,
                4 => self.underline = true,
                9 => self.strike = true,
                21 | 22 => {
                    self.bold = false;
                    self.dim = false;
                }
                23 => self.italic = false,
                24 => self.underline = false,
                29 => self.strike = false,
                n @ 30..=37 => self.fg = Some(Color::Indexed((n - 30) as u8)),
                39 => self.fg = None,
                n @ 40..=47 => self.bg = Some(Color::Indexed((n - 40) as u8)),
                49 => self.bg = None,
                n @ 90..=97 => self.fg = Some(Color::Indexed((n - 90 + 8) as u8)),
                n @ 100..=107 => self.bg = Some(Color::Indexed((n - 100 + 8) as u8)),
                n @ (38 | 48) => {
                    let (color, consumed) = extended_color(&codes[i + 1..]);
                    if let Some(color) = color {
                        if n == 38 {
                            self.fg = Some(color);
                        } else {
                            self.bg = Some(color);
                        }
                    }
                    i += consumed;
                }
                _ => {}
            }
            i += 1;
        }
    }
}

/// Parse the tail of a 38/48 sequence. Returns the color and how many codes it used.
fn extended_color(rest: &[u16]) -> (Option<Color>, usize) {
    match rest {
        [5, n, ..] => (u8::try_from(*n).ok().map(Color::Indexed), 2),
        [2, r, g, b, ..] => {
            let channel = |v: u16| u8::try_from(v).unwrap_or(u8::MAX);
            (Some(Color::Rgb(channel(*r), channel(*g), channel(*b))), 4)
        }
        _ => (None, rest.len()),
    }
}

fn push_escaped(out: &mut String, text: &str) {
    let text = text.replace("\r\n", "\n");
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
}

/// Render terminal output as HTML
pub fn to_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut style = Style::default();
    let mut span_open = false;
    let mut cursor = 0;

    let emit = |out: &mut String, text: &str, style: &Style, span_open: &mut bool| {
        if text.is_empty() {
            return;
        }
        if !*span_open && !style.is_plain() {
            let _ = write!(out, "<span style=\"{}\">", style.css());
            *span_open = true;
        }
        push_escaped(out, text);
    };

    for caps in ESCAPE_SEQUENCE.captures_iter(input) {
        let Some(whole) = caps.get(0) else { continue };
        emit(&mut out, &input[cursor..whole.start()], &style, &mut span_open);
        cursor = whole.end();

        let is_sgr = caps.get(2).map(|m| m.as_str()) == Some("m");
        if !is_sgr {
            continue;
        }

        let params = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        let mut next = style.clone();
        next.apply(params);
        if next != style {
            if span_open {
                out.push_str("</span>");
                span_open = false;
            }
            style = next;
        }
    }

    emit(&mut out, &input[cursor..], &style, &mut span_open);
    if span_open {
        out.push_str("</span>");
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_plain_text_passes_through() {
        assert_eq!(to_html("hello\n"), "hello\n");
    }

    #[test]
    fn test_basic_color_and_reset() {
        assert_eq!(
            to_html("\x1b[31mred\x1b[0m plain"),
            "<span style=\"color:#aa0000\">red</span> plain"
        );
    }

    #[test]
    fn test_combined_attributes() {
        assert_eq!(
            to_html("\x1b[1;32mok\x1b[22m still green\x1b[m"),
            "<span style=\"color:#00aa00;font-weight:bold\">ok</span>\
             <span style=\"color:#00aa00\"> still green</span>"
        );
    }

    #[test]
    fn test_extended_colors() {
        assert_eq!(
            to_html("\x1b[38;5;196mx\x1b[0m"),
            "<span style=\"color:#ff0000\">x</span>"
        );
        assert_eq!(
            to_html("\x1b[48;2;1;2;3my\x1b[0m"),
            "<span style=\"background-color:#010203\">y</span>"
        );
        assert_eq!(
            to_html("\x1b[38;5;244mz\x1b[0m"),
            "<span style=\"color:#808080\">z</span>"
        );
    }

    #[test]
    fn test_html_is_escaped() {
        assert_eq!(to_html("<b>&'\"</b>"), "&lt;b&gt;&amp;&#39;&quot;&lt;/b&gt;");
    }

    #[test]
    fn test_non_sgr_sequences_are_dropped() {
        let input = "\x1b]0;title\x07\x1b[2K\x1b[1Aline\x1b(B\r\n";
        let html = to_html(input);
        assert_eq!(html, "line\n");
        assert!(!html.contains('\x1b'));
    }

    #[test]
    fn test_unterminated_style_is_closed() {
        assert_eq!(
            to_html("\x1b[4munder"),
            "<span style=\"text-decoration:underline\">under</span>"
        );
    }
}
