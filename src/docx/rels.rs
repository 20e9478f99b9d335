//! Part relationships (`*.rels`) and the `[Content_Types].xml` registry.

use super::package::{DocxPackage, CONTENT_TYPES_PART};
use super::xml::{Element, XmlDocument};
use crate::error::Result;

pub const RELS_NS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";
pub const CONTENT_TYPES_NS: &str = "http://schemas.openxmlformats.org/package/2006/content-types";
pub const REL_TYPE_BASE: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/";

/// One `<Relationship>` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub id: String,
    pub rel_type: String,
    pub target: String,
    pub external: bool,
}

impl Relationship {
    /// Short type name: `image`, `header`, `hyperlink`, …
    pub fn kind(&self) -> &str {
        self.rel_type.rsplit('/').next().unwrap_or(&self.rel_type)
    }
}

/// The relationships of one source part.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Relationships {
    items: Vec<Relationship>,
}

impl Relationships {
    /// Load the relationships of `source_part`; a part without a `.rels` file has none.
    pub fn load(pkg: &DocxPackage, source_part: &str) -> Result<Self> {
        let path = rels_path_for(source_part);
        if !pkg.has_part(&path) {
            return Ok(Self::default());
        }
        Ok(Self::from_document(&pkg.read_xml(&path)?))
    }

    pub fn from_document(doc: &XmlDocument) -> Self {
        let items = doc
            .root
            .elements()
            .filter(|e| e.name == "Relationship")
            .filter_map(|e| {
                Some(Relationship {
                    id: e.attr("Id")?.to_string(),
                    rel_type: e.attr("Type")?.to_string(),
                    target: e.attr("Target")?.to_string(),
                    external: e.attr("TargetMode") == Some("External"),
                })
            })
            .collect();
        Self { items }
    }

    pub fn to_document(&self) -> XmlDocument {
        let mut root = Element::new("Relationships").with_attr("xmlns", RELS_NS);
        for rel in &self.items {
            let mut e = Element::new("Relationship")
                .with_attr("Id", rel.id.as_str())
                .with_attr("Type", rel.rel_type.as_str())
                .with_attr("Target", rel.target.as_str());
            if rel.external {
                e.set_attr("TargetMode", "External");
            }
            root = root.with_child(e);
        }
        XmlDocument::new(root)
    }

    pub fn save(&self, pkg: &mut DocxPackage, source_part: &str) -> Result<()> {
        pkg.write_xml(&rels_path_for(source_part), &self.to_document())
    }

    pub fn get(&self, id: &str) -> Option<&Relationship> {
        self.items.iter().find(|r| r.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Relationship> {
        self.items.iter()
    }

    pub fn first_of_kind(&self, kind: &str) -> Option<&Relationship> {
        self.items.iter().find(|r| r.kind() == kind)
    }

    /// Append a relationship keeping its id.
    pub fn push(&mut self, rel: Relationship) {
        self.items.push(rel);
    }

    /// Add a relationship under a fresh `rIdN` and return the id.
    pub fn add(&mut self, rel_type: &str, target: &str, external: bool) -> String {
        let id = self.next_id();
        self.items.push(Relationship {
            id: id.clone(),
            rel_type: rel_type.to_string(),
            target: target.to_string(),
            external,
        });
        id
    }

    fn next_id(&self) -> String {
        let max = self
            .items
            .iter()
            .filter_map(|r| r.id.strip_prefix("rId")?.parse::<u32>().ok())
            .max()
            .unwrap_or(0);
        let mut n = max + 1;
        // Ids need not follow the rIdN pattern; skip any literal clash.
        while self.get(&format!("rId{n}")).is_some() {
            n += 1;
        }
        format!("rId{n}")
    }
}

/// `word/document.xml` → `word/_rels/document.xml.rels`; `""` → `_rels/.rels`.
pub fn rels_path_for(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((dir, file)) => format!("{dir}/_rels/{file}.rels"),
        None if part.is_empty() => "_rels/.rels".to_string(),
        None => format!("_rels/{part}.rels"),
    }
}

fn part_dir(part: &str) -> &str {
    part.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

/// Resolve a relationship target against the part that owns the relationship.
pub fn resolve_target(source_part: &str, target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return absolute.to_string();
    }
    let mut segments: Vec<&str> = part_dir(source_part)
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();
    for seg in target.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    segments.join("/")
}

/// The target string that makes `source_part` point at `part`.
pub fn relative_target(source_part: &str, part: &str) -> String {
    let dir = part_dir(source_part);
    if dir.is_empty() {
        return part.to_string();
    }
    match part.strip_prefix(dir).and_then(|rest| rest.strip_prefix('/')) {
        Some(rest) => rest.to_string(),
        None => format!("/{part}"),
    }
}

/// `[Content_Types].xml`: extension defaults plus per-part overrides.
#[derive(Debug, Clone)]
pub struct ContentTypes {
    doc: XmlDocument,
}

impl ContentTypes {
    pub fn load(pkg: &DocxPackage) -> Result<Self> {
        Ok(Self {
            doc: pkg.read_xml(CONTENT_TYPES_PART)?,
        })
    }

    pub fn save(&self, pkg: &mut DocxPackage) -> Result<()> {
        pkg.write_xml(CONTENT_TYPES_PART, &self.doc)
    }

    /// Content type of `part`: its override, else the default for its extension.
    pub fn content_type_of(&self, part: &str) -> Option<String> {
        let part_name = format!("/{part}");
        let overridden = self
            .doc
            .root
            .elements()
            .filter(|e| e.name == "Override")
            .find(|e| e.attr("PartName").is_some_and(|p| p.eq_ignore_ascii_case(&part_name)))
            .and_then(|e| e.attr("ContentType"));
        if let Some(ct) = overridden {
            return Some(ct.to_string());
        }
        let ext = part.rsplit_once('.')?.1;
        self.default_for(ext).map(str::to_string)
    }

    fn default_for(&self, ext: &str) -> Option<&str> {
        self.doc
            .root
            .elements()
            .filter(|e| e.name == "Default")
            .find(|e| e.attr("Extension").is_some_and(|x| x.eq_ignore_ascii_case(ext)))
            .and_then(|e| e.attr("ContentType"))
    }

    /// Make sure `part` resolves to `content_type`, adding a default or override as needed.
    pub fn ensure(&mut self, part: &str, content_type: &str) {
        if self.content_type_of(part).as_deref() == Some(content_type) {
            return;
        }
        match part.rsplit_once('.') {
            Some((_, ext)) if self.default_for(ext).is_none() && !ext.eq_ignore_ascii_case("xml") => {
                self.doc.root.children.insert(
                    0,
                    super::xml::XmlNode::Element(
                        Element::new("Default")
                            .with_attr("Extension", ext.to_ascii_lowercase())
                            .with_attr("ContentType", content_type),
                    ),
                );
            }
            _ => {
                self.doc.root.children.push(super::xml::XmlNode::Element(
                    Element::new("Override")
                        .with_attr("PartName", format!("/{part}"))
                        .with_attr("ContentType", content_type),
                ));
            }
        }
    }
}
