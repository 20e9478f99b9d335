//! Placeholder substitution.
//!
//! Tokens look like `{{ name }}`. Word freely splits typed text into several
//! runs (spell-check marks, partial formatting, revision ids), so a token can
//! start in one `w:r` and end two runs later. Each paragraph is therefore
//! flattened into one text stream with a back-mapping to its `w:t` elements,
//! tokens are matched on the stream, and the edits are mapped back:
//!
//! * the replacement goes into the `w:t` holding the opening `{{`, so it
//!   keeps that run's formatting;
//! * the covered parts of later `w:t` elements are cut away;
//! * `w:t` elements left empty are removed, then runs left with nothing but
//!   their `w:rPr`;
//! * line breaks and tabs in a value become `w:br` / `w:tab` inside the
//!   hosting run.
//!
//! Values may not contain `{{` or `}}`, so a substituted document holds no
//! token the same values would replace again.
//!
//! Tabs, breaks, drawings and fields are hard boundaries: a token never
//! matches across them.

use crate::config::{NumberFormat, PipelineConfig};
use crate::docx::rels::{resolve_target, Relationships};
use crate::docx::{DocxPackage, Element, XmlNode};
use crate::error::{OfferError, Result};
use crate::request::{OfferRequest, PlaceholderValue};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

/// Stands in for non-text run content in the flattened stream.
const BARRIER: char = '\u{1}';

static TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{([^{}\x01]+)\}\}").expect("token regex is valid"));

/// What happens to a token no value was supplied for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnresolvedPolicy {
    /// Replace with an empty string. (default)
    #[default]
    Empty,
    /// Leave the marker in the document verbatim.
    Keep,
}

/// Render a value the way it is printed into the document.
pub fn render_value(value: &PlaceholderValue, numbers: &NumberFormat, date_format: &str) -> String {
    match value {
        PlaceholderValue::Null => String::new(),
        PlaceholderValue::Integer(n) => numbers.format_integer(*n),
        PlaceholderValue::Number(n) => numbers.format_number(*n),
        PlaceholderValue::Date { date } => date.format(date_format).to_string(),
        PlaceholderValue::Text(s) => s.clone(),
    }
}

/// Rendered token values plus the policy for everything else.
#[derive(Debug, Clone, Default)]
pub struct Substitution {
    values: HashMap<String, String>,
    policy: UnresolvedPolicy,
}

impl Substitution {
    pub fn new(policy: UnresolvedPolicy) -> Self {
        Self {
            values: HashMap::new(),
            policy,
        }
    }

    /// Values from `request`, falling back to `defaults`, rendered per `config`.
    pub fn for_request(
        request: &OfferRequest,
        defaults: &BTreeMap<String, PlaceholderValue>,
        policy: UnresolvedPolicy,
        config: &PipelineConfig,
    ) -> Result<Self> {
        let mut sub = Self::new(policy);
        let supplied = request
            .placeholders
            .iter()
            .filter(|(_, v)| !v.is_null());
        for (name, value) in defaults.iter().chain(supplied) {
            let rendered = render_value(value, &config.number_format, &config.date_format);
            if holds_marker(&rendered) {
                return Err(marker_in_value(name));
            }
            sub.insert(name, rendered);
        }
        Ok(sub)
    }

    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.values
            .insert(name.as_ref().trim().to_string(), value.into());
    }

    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.insert(name, value);
        self
    }

    fn resolve(&self, name: &str) -> Option<&str> {
        match self.values.get(name.trim()) {
            Some(v) => Some(v.as_str()),
            None => match self.policy {
                UnresolvedPolicy::Empty => Some(""),
                UnresolvedPolicy::Keep => None,
            },
        }
    }

    /// Substitute in every paragraph under `root`. Returns the number of tokens replaced.
    pub fn apply(&self, root: &mut Element) -> usize {
        let mut count = 0;
        for child in root.elements_mut() {
            count += self.apply(child);
        }
        if root.name == "w:p" {
            count += self.apply_paragraph(root);
        }
        count
    }

    /// Substitute in the main document and in every header, footer and note part it references.
    pub fn apply_package(&self, pkg: &mut DocxPackage) -> Result<usize> {
        let main = pkg.main_document_part()?;
        let rels = Relationships::load(pkg, &main)?;
        let mut parts = vec![main.clone()];
        parts.extend(
            rels.iter()
                .filter(|r| !r.external)
                .filter(|r| matches!(r.kind(), "header" | "footer" | "footnotes" | "endnotes"))
                .map(|r| resolve_target(&main, &r.target))
                .filter(|p| pkg.has_part(p)),
        );

        let mut total = 0;
        for part in parts {
            let mut doc = pkg.read_xml(&part)?;
            let n = self.apply(&mut doc.root);
            if n > 0 {
                debug!(part = %part, replaced = n, "Substituted placeholders");
                pkg.write_xml(&part, &doc)?;
            }
            total += n;
        }
        Ok(total)
    }

    fn apply_paragraph(&self, p: &mut Element) -> usize {
        let mut slots = Vec::new();
        collect_slots(p, &mut Vec::new(), &mut slots);

        let mut stream = String::new();
        let mut starts = Vec::with_capacity(slots.len());
        for slot in &slots {
            starts.push(stream.len());
            match &slot.path {
                Some(_) => stream.push_str(&slot.text),
                None => stream.push(BARRIER),
            }
        }
        if !stream.contains("{{") {
            return 0;
        }

        let mut texts: Vec<String> = slots.iter().map(|s| s.text.clone()).collect();
        let mut touched = vec![false; slots.len()];
        let mut count = 0;

        let matches: Vec<_> = TOKEN_RE.captures_iter(&stream).collect();
        for caps in matches.iter().rev() {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let Some(replacement) = self.resolve(name.as_str()) else {
                continue;
            };
            let (start, end) = (whole.start(), whole.end());
            let first = slot_at(&starts, start);
            let last = slot_at(&starts, end - 1);

            for k in first..=last {
                let offset = starts[k];
                let text = &texts[k];
                let edited = if k == first && k == last {
                    format!("{}{}{}", &text[..start - offset], replacement, &text[end - offset..])
                } else if k == first {
                    format!("{}{}", &text[..start - offset], replacement)
                } else if k == last {
                    text[end - offset..].to_string()
                } else {
                    String::new()
                };
                texts[k] = edited;
                touched[k] = true;
            }
            count += 1;
        }

        // Deepest/latest first so the paths still to visit stay valid.
        let mut edits: Vec<(&Vec<usize>, &str)> = slots
            .iter()
            .zip(&texts)
            .zip(&touched)
            .filter(|(_, touched)| **touched)
            .filter_map(|((slot, text), _)| Some((slot.path.as_ref()?, text.as_str())))
            .collect();
        edits.sort_unstable_by(|a, b| b.0.cmp(a.0));
        for (path, text) in edits {
            if text.is_empty() {
                remove_text_node(p, path);
            } else {
                write_text_node(p, path, text);
            }
        }
        count
    }
}

/// One `w:t` (with its path inside the paragraph) or a barrier (`path == None`).
struct Slot {
    path: Option<Vec<usize>>,
    text: String,
}

fn collect_slots(el: &Element, path: &mut Vec<usize>, out: &mut Vec<Slot>) {
    for (i, child) in el.children.iter().enumerate() {
        let Some(child) = child.as_element() else {
            continue;
        };
        match child.name.as_str() {
            "w:t" => {
                path.push(i);
                out.push(Slot {
                    path: Some(path.clone()),
                    text: child.text(),
                });
                path.pop();
            }
            "w:rPr" | "w:pPr" | "w:proofErr" | "w:bookmarkStart" | "w:bookmarkEnd" | "w:lastRenderedPageBreak" => {}
            "w:r" | "w:hyperlink" | "w:ins" | "w:smartTag" | "w:sdt" | "w:sdtContent" | "w:customXml" | "w:fldSimple" => {
                path.push(i);
                collect_slots(child, path, out);
                path.pop();
            }
            _ => out.push(Slot {
                path: None,
                text: String::new(),
            }),
        }
    }
}

/// Index of the slot whose stream range contains byte `pos`.
fn slot_at(starts: &[usize], pos: usize) -> usize {
    match starts.binary_search(&pos) {
        Ok(mut k) => {
            // Empty slots share a start with their successor; take the last.
            while k + 1 < starts.len() && starts[k + 1] == pos {
                k += 1;
            }
            k
        }
        Err(k) => k.saturating_sub(1),
    }
}

fn remove_text_node(p: &mut Element, path: &[usize]) {
    let Some((&idx, parent_path)) = path.split_last() else {
        return;
    };
    let Some(parent) = p.at_path_mut(parent_path) else {
        return;
    };
    if idx < parent.children.len() {
        parent.children.remove(idx);
    }
    let run_is_empty = parent.name == "w:r"
        && parent.children.iter().all(|c| c.is("w:rPr"));
    if run_is_empty {
        if let Some((&run_idx, grand_path)) = parent_path.split_last() {
            if let Some(grand) = p.at_path_mut(grand_path) {
                if run_idx < grand.children.len() {
                    grand.children.remove(run_idx);
                }
            }
        }
    }
}

/// Put `text` into the `w:t` at `path`. Line breaks and tabs split it into
/// sibling `w:t`, `w:br` and `w:tab` elements of the same run.
fn write_text_node(p: &mut Element, path: &[usize], text: &str) {
    if !text.contains(['\n', '\t', '\r']) {
        if let Some(t) = p.at_path_mut(path) {
            t.set_text(text);
            t.set_attr("xml:space", "preserve");
        }
        return;
    }
    let Some((&idx, run_path)) = path.split_last() else {
        return;
    };
    let Some(run) = p.at_path_mut(run_path) else {
        return;
    };
    let Some(template) = run.children.get(idx).and_then(XmlNode::as_element).cloned() else {
        return;
    };

    let mut nodes = Vec::new();
    let mut segment = String::new();
    let flush = |segment: &mut String, nodes: &mut Vec<XmlNode>| {
        if !segment.is_empty() {
            let mut t = template.clone();
            t.set_text(std::mem::take(segment));
            t.set_attr("xml:space", "preserve");
            nodes.push(XmlNode::Element(t));
        }
    };
    for c in text.chars() {
        match c {
            '\n' => {
                flush(&mut segment, &mut nodes);
                nodes.push(XmlNode::Element(Element::new("w:br")));
            }
            '\t' => {
                flush(&mut segment, &mut nodes);
                nodes.push(XmlNode::Element(Element::new("w:tab")));
            }
            '\r' => {}
            c => segment.push(c),
        }
    }
    flush(&mut segment, &mut nodes);
    run.children.remove(idx);
    for (offset, node) in nodes.into_iter().enumerate() {
        run.children.insert(idx + offset, node);
    }
}

fn holds_marker(value: &str) -> bool {
    value.contains("{{") || value.contains("}}")
}

fn marker_in_value(name: &str) -> OfferError {
    OfferError::InvalidRequest(format!(
        "value of '{}' contains a placeholder marker ({{{{ or }}}})",
        name.trim()
    ))
}

/// Fail on the first text value that contains `{{` or `}}`.
pub fn check_values<'a>(
    values: impl IntoIterator<Item = (&'a String, &'a PlaceholderValue)>,
) -> Result<()> {
    for (name, value) in values {
        if let PlaceholderValue::Text(text) = value {
            if holds_marker(text) {
                return Err(marker_in_value(name));
            }
        }
    }
    Ok(())
}

/// Token names used anywhere under `root` (names trimmed).
pub fn placeholder_names(root: &Element) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    root.walk(&mut |e| {
        if e.name == "w:p" {
            let mut slots = Vec::new();
            collect_slots(e, &mut Vec::new(), &mut slots);
            let stream: String = slots
                .iter()
                .map(|s| if s.path.is_some() { s.text.as_str() } else { "\u{1}" })
                .collect();
            for caps in TOKEN_RE.captures_iter(&stream) {
                if let Some(name) = caps.get(1) {
                    names.insert(name.as_str().trim().to_string());
                }
            }
        }
    });
    names
}

/// Fail with the first required placeholder that has neither a request value nor a default.
pub fn check_required(
    required: &[String],
    request: &OfferRequest,
    defaults: &BTreeMap<String, PlaceholderValue>,
) -> Result<()> {
    let supplied = |values: &BTreeMap<String, PlaceholderValue>, name: &str| {
        values
            .iter()
            .any(|(key, value)| key.trim() == name && !value.is_null())
    };
    let missing = required.iter().find(|name| {
        let name = name.trim();
        !supplied(&request.placeholders, name) && !supplied(defaults, name)
    });
    match missing {
        Some(name) => Err(OfferError::MissingRequiredPlaceholder {
            name: name.trim().to_string(),
        }),
        None => Ok(()),
    }
}
