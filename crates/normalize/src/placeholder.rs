//! SVG markup for receipts that are not rendered faithfully.

use std::fmt::Write as _;

pub const PDF_PLACEHOLDER_WIDTH: u32 = 612;
pub const PDF_PLACEHOLDER_HEIGHT: u32 = 792;
const UNSUPPORTED_WIDTH: u32 = 612;
const UNSUPPORTED_HEIGHT: u32 = 400;

/// Longest file name shown on a placeholder.
pub const MAX_DISPLAY_NAME_CHARS: usize = 40;

const FONT_STACK: &str = "Helvetica, Arial, DejaVu Sans, sans-serif";
const MONO_STACK: &str = "DejaVu Sans Mono, Menlo, Consolas, monospace";

const TEXT_FONT_SIZE: f32 = 12.0;
const TEXT_LINE_HEIGHT: f32 = 16.0;
const TEXT_CHAR_WIDTH: f32 = 7.2;
const TEXT_PADDING: f32 = 20.0;
const TEXT_MIN_WIDTH: f32 = 200.0;
const TEXT_MAX_WIDTH: f32 = 1600.0;
/// Longer lines are cut so the canvas width stays bounded.
pub const MAX_TEXT_LINE_CHARS: usize = 200;

/// Fixed 1x1 PNG used when even the PDF placeholder cannot be produced.
pub const MINIMAL_PNG_DATA_URL: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

/// Escape the five markup-significant characters and drop characters XML
/// cannot carry.
pub fn escape_markup(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            '\t' => out.push_str("    "),
            c if c.is_control() => out.push(' '),
            c => out.push(c),
        }
    }
    out
}

/// Cut to `max_chars` characters, marking the cut with an ellipsis.
pub fn truncate_chars(raw: &str, max_chars: usize) -> String {
    if raw.chars().count() <= max_chars {
        return raw.to_string();
    }
    let mut cut: String = raw.chars().take(max_chars.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

pub fn pdf_placeholder_svg(name: &str) -> String {
    let display = escape_markup(&truncate_chars(name, MAX_DISPLAY_NAME_CHARS));
    let (w, h) = (PDF_PLACEHOLDER_WIDTH, PDF_PLACEHOLDER_HEIGHT);
    format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">
  <rect width="{w}" height="{h}" fill="#ffffff"/>
  <rect x="56" y="56" width="500" height="680" fill="#f7f7f9" stroke="#c8c8d0" stroke-width="2" stroke-dasharray="8 6"/>
  <rect x="256" y="200" width="100" height="128" fill="#ffffff" stroke="#9a9aa6" stroke-width="3"/>
  <text x="306" y="276" font-family="{FONT_STACK}" font-size="28" font-weight="bold" fill="#b3261e" text-anchor="middle">PDF</text>
  <text x="306" y="400" font-family="{FONT_STACK}" font-size="24" font-weight="bold" fill="#222222" text-anchor="middle">PDF receipt attached</text>
  <text x="306" y="440" font-family="{FONT_STACK}" font-size="16" fill="#555555" text-anchor="middle">The original PDF is included separately with this invoice.</text>
  <text x="306" y="490" font-family="{FONT_STACK}" font-size="14" fill="#333333" text-anchor="middle">{display}</text>
</svg>"##
    )
}

pub fn unsupported_svg(name: &str, content_type: &str) -> String {
    let display = escape_markup(&truncate_chars(name, MAX_DISPLAY_NAME_CHARS));
    let declared = if content_type.trim().is_empty() { "unknown" } else { content_type.trim() };
    let declared = escape_markup(&truncate_chars(declared, MAX_DISPLAY_NAME_CHARS));
    let (w, h) = (UNSUPPORTED_WIDTH, UNSUPPORTED_HEIGHT);
    format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">
  <rect width="{w}" height="{h}" fill="#ffffff"/>
  <rect x="24" y="24" width="564" height="352" fill="#fff8e1" stroke="#e0a800" stroke-width="2"/>
  <text x="306" y="150" font-family="{FONT_STACK}" font-size="24" font-weight="bold" fill="#222222" text-anchor="middle">Unsupported receipt format</text>
  <text x="306" y="200" font-family="{FONT_STACK}" font-size="16" fill="#333333" text-anchor="middle">{display}</text>
  <text x="306" y="236" font-family="{FONT_STACK}" font-size="14" fill="#666666" text-anchor="middle">Declared type: {declared}</text>
</svg>"##
    )
}

/// A laid-out text receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextLayout {
    pub svg: String,
    pub lines_rendered: usize,
    pub total_lines: usize,
}

impl TextLayout {
    pub fn truncated(&self) -> bool {
        self.lines_rendered < self.total_lines
    }
}

/// Monospace layout of `text` on a canvas sized to its content, keeping at
/// most `max_lines` lines (one `<text>` element per line).
pub fn text_svg(text: &str, max_lines: usize) -> TextLayout {
    let normalized = text.replace("\r\n", "\n");
    let all: Vec<&str> = normalized.lines().collect();
    let total_lines = all.len();
    let kept: Vec<String> = all
        .iter()
        .take(max_lines.max(1))
        .map(|line| truncate_chars(line, MAX_TEXT_LINE_CHARS))
        .collect();

    let widest = kept.iter().map(|l| l.chars().count()).max().unwrap_or(0);
    let width = (TEXT_PADDING * 2.0 + widest as f32 * TEXT_CHAR_WIDTH)
        .clamp(TEXT_MIN_WIDTH, TEXT_MAX_WIDTH)
        .ceil() as u32;
    let height = (TEXT_PADDING * 2.0 + kept.len().max(1) as f32 * TEXT_LINE_HEIGHT).ceil() as u32;

    let mut svg = format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="{width}" height="{height}" viewBox="0 0 {width} {height}">
  <rect width="{width}" height="{height}" fill="#ffffff"/>
"##
    );
    for (i, line) in kept.iter().enumerate() {
        let y = TEXT_PADDING + TEXT_FONT_SIZE + i as f32 * TEXT_LINE_HEIGHT;
        let _ = writeln!(
            svg,
            r##"  <text x="{TEXT_PADDING}" y="{y}" font-family="{MONO_STACK}" font-size="{TEXT_FONT_SIZE}" fill="#111111" xml:space="preserve">{}</text>"##,
            escape_markup(line)
        );
    }
    svg.push_str("</svg>");

    TextLayout { svg, lines_rendered: kept.len(), total_lines }
}
