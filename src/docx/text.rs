//! Read-only text views over WordprocessingML.

use super::xml::{Element, XmlDocument};

pub const W_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";
pub const R_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

/// Visible text of a paragraph. Tabs and breaks become `\t` / `\n`.
///
/// Paragraphs nested inside text boxes are not included.
pub fn paragraph_text(p: &Element) -> String {
    let mut out = String::new();
    collect_text(p, &mut out);
    out
}

fn collect_text(el: &Element, out: &mut String) {
    for child in el.elements() {
        match child.name.as_str() {
            "w:t" => out.push_str(&child.text()),
            "w:tab" => out.push('\t'),
            "w:br" | "w:cr" => out.push('\n'),
            "w:p" | "w:pPr" | "w:rPr" | "w:delText" | "w:instrText" | "w:drawing" | "w:pict" => {}
            _ => collect_text(child, out),
        }
    }
}

pub fn body(doc: &XmlDocument) -> Option<&Element> {
    doc.root.child("w:body")
}

/// Text of every paragraph in the document, at any depth (tables included), in order.
pub fn all_paragraph_texts(doc: &XmlDocument) -> Vec<String> {
    let mut texts = Vec::new();
    doc.root.walk(&mut |e| {
        if e.name == "w:p" {
            texts.push(paragraph_text(e));
        }
    });
    texts
}
