//! Minimal PDF 1.4 writer: A4 pages, the two standard Helvetica faces,
//! filled/stroked paths and single-line text. Content streams are stored
//! uncompressed.

use std::fmt::Write as _;

pub const PAGE_WIDTH: f64 = 595.0;
pub const PAGE_HEIGHT: f64 = 842.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Font {
    Regular,
    Bold,
}

impl Font {
    fn resource(self) -> &'static str {
        match self {
            Font::Regular => "/F1",
            Font::Bold => "/F2",
        }
    }
}

/// RGB in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color(pub f64, pub f64, pub f64);

impl Color {
    pub const BLACK: Color = Color(0.0, 0.0, 0.0);
    pub const GREY: Color = Color(0.75, 0.75, 0.75);
}

/// Approximate Helvetica advance width of `text` at `size`.
pub fn text_width(text: &str, size: f64) -> f64 {
    text.chars().count() as f64 * size * 0.52
}

/// One page's content stream. Coordinates are PDF points from the bottom left.
#[derive(Debug, Default)]
pub struct Page {
    ops: String,
}

impl Page {
    pub fn text(&mut self, x: f64, y: f64, font: Font, size: f64, text: &str) {
        let _ = writeln!(
            self.ops,
            "BT {} {} Tf {} {} Td ({}) Tj ET",
            font.resource(),
            num(size),
            num(x),
            num(y),
            escape(text)
        );
    }

    pub fn text_centered(&mut self, cx: f64, y: f64, font: Font, size: f64, text: &str) {
        self.text(cx - text_width(text, size) / 2.0, y, font, size, text);
    }

    pub fn line(&mut self, from: (f64, f64), to: (f64, f64), color: Color, width: f64) {
        self.polyline(&[from, to], color, width);
    }

    /// Stroke connected segments through `points`. Fewer than two points draw nothing.
    pub fn polyline(&mut self, points: &[(f64, f64)], color: Color, width: f64) {
        let Some((first, rest)) = points.split_first() else {
            return;
        };
        if rest.is_empty() {
            return;
        }
        let _ = write!(
            self.ops,
            "q {} w {} RG {} {} m",
            num(width),
            rgb(color),
            num(first.0),
            num(first.1)
        );
        for (x, y) in rest {
            let _ = write!(self.ops, " {} {} l", num(*x), num(*y));
        }
        self.ops.push_str(" S Q\n");
    }

    pub fn fill_rect(&mut self, x: f64, y: f64, w: f64, h: f64, color: Color) {
        let _ = writeln!(
            self.ops,
            "q {} rg {} {} {} {} re f Q",
            rgb(color),
            num(x),
            num(y),
            num(w),
            num(h)
        );
    }
}

/// Pages collected in order and serialized by [`PdfDocument::to_bytes`].
#[derive(Debug, Default)]
pub struct PdfDocument {
    pages: Vec<Page>,
}

impl PdfDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a blank page and return it for drawing.
    pub fn add_page(&mut self) -> &mut Page {
        self.pages.push(Page::default());
        let last = self.pages.len() - 1;
        &mut self.pages[last]
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Serialize with a cross-reference table. A document without pages
    /// gets one blank page.
    pub fn to_bytes(&self) -> Vec<u8> {
        let blank = [Page::default()];
        let pages: &[Page] = if self.pages.is_empty() { &blank } else { &self.pages };

        // 1 catalog, 2 page tree, 3-4 fonts, then (page, content) pairs.
        let page_id = |i: usize| 5 + 2 * i;
        let kids: Vec<String> = (0..pages.len()).map(|i| format!("{} 0 R", page_id(i))).collect();

        let mut objects = vec![
            "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
            format!(
                "<< /Type /Pages /Kids [{}] /Count {} >>",
                kids.join(" "),
                pages.len()
            ),
            "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>"
                .to_string(),
            "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica-Bold /Encoding /WinAnsiEncoding >>"
                .to_string(),
        ];
        for (i, page) in pages.iter().enumerate() {
            objects.push(format!(
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {} {}] \
                 /Resources << /Font << /F1 3 0 R /F2 4 0 R >> >> /Contents {} 0 R >>",
                num(PAGE_WIDTH),
                num(PAGE_HEIGHT),
                page_id(i) + 1
            ));
            objects.push(format!(
                "<< /Length {} >>\nstream\n{}endstream",
                page.ops.len(),
                page.ops
            ));
        }

        let mut out = String::from("%PDF-1.4\n");
        let mut offsets = Vec::with_capacity(objects.len());
        for (i, body) in objects.iter().enumerate() {
            offsets.push(out.len());
            let _ = write!(out, "{} 0 obj\n{}\nendobj\n", i + 1, body);
        }

        let xref_at = out.len();
        let _ = write!(out, "xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1);
        for offset in offsets {
            let _ = write!(out, "{offset:010} 00000 n \n");
        }
        let _ = write!(
            out,
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            xref_at
        );
        out.into_bytes()
    }
}

/// Escape a string literal. Characters outside printable ASCII become `?`,
/// which keeps every byte offset equal to the string offset.
fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' | '(' | ')' => {
                out.push('\\');
                out.push(c);
            }
            ' '..='~' => out.push(c),
            _ => out.push('?'),
        }
    }
    out
}

fn num(v: f64) -> String {
    let s = format!("{v:.2}");
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s.is_empty() || s == "-" || s == "-0" {
        "0".to_string()
    } else {
        s.to_string()
    }
}

fn rgb(c: Color) -> String {
    format!("{} {} {}", num(c.0), num(c.1), num(c.2))
}
