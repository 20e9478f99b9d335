//! Fragment merging.
//!
//! The first skeleton fragment is the base: its package (section properties,
//! headers, footers, theme, settings) is kept as is and every other fragment's
//! body is appended to it. Appended bodies bring what they reference along:
//!
//! * relationships (images, hyperlinks, charts) are copied under fresh `rId`s,
//!   internal parts under names that do not clash;
//! * styles the base does not define are copied; a style id the base already
//!   has keeps the base definition;
//! * list definitions are matched against the base's, so an equivalent list
//!   keeps counting across the boundary, unless the fragment restarts numbering;
//! * bookmark ids and drawing ids are renumbered to stay unique.
//!
//! Body-level `w:sectPr` of appended fragments is dropped, as is any section
//! break inside them: the merged document is one section laid out by the base.

use crate::docx::rels::{
    relative_target, resolve_target, ContentTypes, Relationship, Relationships, REL_TYPE_BASE,
};
use crate::docx::text::{paragraph_text, W_NS};
use crate::docx::{DocxPackage, Element, XmlDocument, XmlNode};
use crate::error::{OfferError, Result};
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

const NUMBERING_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.numbering+xml";

/// One fragment taking part in a merge.
#[derive(Debug, Clone, Copy)]
pub struct FragmentRef<'a> {
    pub name: &'a str,
    pub package: &'a DocxPackage,
    /// Lists in this fragment start counting afresh.
    pub restart_numbering: bool,
}

impl<'a> FragmentRef<'a> {
    pub fn new(name: &'a str, package: &'a DocxPackage) -> Self {
        Self {
            name,
            package,
            restart_numbering: false,
        }
    }
}

/// Everything [`merge`] needs for one document.
#[derive(Debug, Clone)]
pub struct MergePlan<'a> {
    /// Template family, for error messages.
    pub family: &'a str,
    /// Skeleton fragments in their fixed order. Must not be empty.
    pub skeleton: Vec<FragmentRef<'a>>,
    /// Index into `skeleton` of the anchor fragment.
    pub anchor: usize,
    /// Inject after the first top-level paragraph of the anchor that matches,
    /// instead of after the whole anchor fragment.
    pub anchor_paragraph: Option<&'a Regex>,
    /// Products in caller order.
    pub products: Vec<FragmentRef<'a>>,
}

/// Merge skeleton and products into one package.
///
/// Order: skeleton up to and including the anchor, products, rest of the
/// skeleton. Every fragment boundary is a page break.
pub fn merge(plan: &MergePlan<'_>) -> Result<DocxPackage> {
    let Some(base) = plan.skeleton.first() else {
        return Err(OfferError::InvalidConfig(format!(
            "template family '{}' has no skeleton fragments",
            plan.family
        )));
    };
    let anchor = plan.skeleton.get(plan.anchor).ok_or_else(|| OfferError::AnchorNotFound {
        family: plan.family.to_string(),
        anchor: plan.anchor.to_string(),
    })?;

    let mut composer = Composer::new(base.package)?;
    let (base_blocks, section) = composer.take_body()?;
    let mut base_blocks = Some(base_blocks);

    let mut out: Vec<XmlNode> = Vec::new();
    for (i, fragment) in plan.skeleton.iter().enumerate() {
        let blocks = match base_blocks.take() {
            Some(blocks) => blocks,
            None => composer.import(fragment)?,
        };
        if i > 0 {
            out.push(page_break());
        }
        debug!(fragment = fragment.name, blocks = blocks.len(), "Appending skeleton fragment");

        if i != plan.anchor {
            out.extend(blocks);
            continue;
        }

        let (head, tail) = match plan.anchor_paragraph {
            Some(re) => {
                let idx = find_anchor_paragraph(&blocks, re).ok_or_else(|| {
                    OfferError::AnchorParagraphNotFound {
                        family: plan.family.to_string(),
                        anchor: anchor.name.to_string(),
                        pattern: re.as_str().to_string(),
                    }
                })?;
                let mut head = blocks;
                let tail = head.split_off(idx + 1);
                (head, tail)
            }
            None => (blocks, Vec::new()),
        };
        out.extend(head);
        for product in &plan.products {
            let product_blocks = composer.import(product)?;
            debug!(product = product.name, blocks = product_blocks.len(), "Injecting product");
            out.push(page_break());
            out.extend(product_blocks);
        }
        if !plan.products.is_empty() && !tail.is_empty() {
            out.push(page_break());
        }
        out.extend(tail);
    }

    composer.finish(out, section)
}

/// Index of the first top-level paragraph whose text matches `re`.
pub fn find_anchor_paragraph(blocks: &[XmlNode], re: &Regex) -> Option<usize> {
    blocks.iter().position(|node| {
        node.as_element()
            .is_some_and(|e| e.name == "w:p" && re.is_match(&paragraph_text(e)))
    })
}

/// Body blocks of a package's main document, without the trailing `w:sectPr`.
pub fn body_blocks(pkg: &DocxPackage) -> Result<Vec<XmlNode>> {
    let doc = pkg.read_xml(&pkg.main_document_part()?)?;
    Ok(split_body(doc)?.0)
}

fn split_body(mut doc: XmlDocument) -> Result<(Vec<XmlNode>, Option<Element>)> {
    let body = doc
        .root
        .child_mut("w:body")
        .ok_or_else(|| OfferError::MalformedDocument("main document has no w:body".into()))?;
    Ok(split_section(std::mem::take(&mut body.children)))
}

fn split_section(mut blocks: Vec<XmlNode>) -> (Vec<XmlNode>, Option<Element>) {
    let section = match blocks.iter().rposition(|n| n.as_element().is_some()) {
        Some(idx) if blocks[idx].is("w:sectPr") => match blocks.remove(idx) {
            XmlNode::Element(e) => Some(e),
            _ => None,
        },
        _ => None,
    };
    (blocks, section)
}

fn page_break() -> XmlNode {
    XmlNode::Element(
        Element::new("w:p").with_child(
            Element::new("w:r").with_child(Element::new("w:br").with_attr("w:type", "page")),
        ),
    )
}

/// A fragment being imported, with the lookups it needs.
struct Source<'a> {
    name: &'a str,
    pkg: &'a DocxPackage,
    main: String,
    rels: Relationships,
    content_types: ContentTypes,
    /// Source part name → name in the merged package.
    parts: HashMap<String, String>,
}

/// The merged package under construction.
struct Composer {
    pkg: DocxPackage,
    main_part: String,
    doc: XmlDocument,
    rels: Relationships,
    content_types: ContentTypes,
    styles: Option<(String, XmlDocument)>,
    numbering: Option<(String, XmlDocument)>,
    next_bookmark: u64,
    next_drawing: u64,
}

impl Composer {
    fn new(base: &DocxPackage) -> Result<Self> {
        let pkg = base.clone();
        let main_part = pkg.main_document_part()?;
        let doc = pkg.read_xml(&main_part)?;
        let rels = Relationships::load(&pkg, &main_part)?;
        let content_types = ContentTypes::load(&pkg)?;
        let styles = load_related(&pkg, &main_part, &rels, "styles")?;
        let numbering = load_related(&pkg, &main_part, &rels, "numbering")?;

        let mut next_bookmark = 0;
        let mut next_drawing = 0;
        let mut scan = |root: &Element| {
            root.walk(&mut |e| {
                let id = |key| e.attr(key).and_then(|v| v.parse::<u64>().ok());
                match e.name.as_str() {
                    "w:bookmarkStart" | "w:bookmarkEnd" => {
                        if let Some(n) = id("w:id") {
                            next_bookmark = next_bookmark.max(n + 1);
                        }
                    }
                    "wp:docPr" => {
                        if let Some(n) = id("id") {
                            next_drawing = next_drawing.max(n + 1);
                        }
                    }
                    _ => {}
                }
            })
        };
        scan(&doc.root);
        for rel in rels.iter().filter(|r| matches!(r.kind(), "header" | "footer")) {
            let part = resolve_target(&main_part, &rel.target);
            if pkg.has_part(&part) {
                scan(&pkg.read_xml(&part)?.root);
            }
        }

        Ok(Self {
            pkg,
            main_part,
            doc,
            rels,
            content_types,
            styles,
            numbering,
            next_bookmark,
            next_drawing: next_drawing.max(1),
        })
    }

    /// Detach the base body, keeping its final section properties aside.
    fn take_body(&mut self) -> Result<(Vec<XmlNode>, Option<Element>)> {
        let body = self
            .doc
            .root
            .child_mut("w:body")
            .ok_or_else(|| OfferError::MalformedDocument("main document has no w:body".into()))?;
        Ok(split_section(std::mem::take(&mut body.children)))
    }

    /// Import a fragment's body into this package and return its blocks.
    fn import(&mut self, fragment: &FragmentRef<'_>) -> Result<Vec<XmlNode>> {
        let src_pkg = fragment.package;
        let main = src_pkg.main_document_part()?;
        let src_doc = src_pkg.read_xml(&main)?;
        let mut source = Source {
            name: fragment.name,
            pkg: src_pkg,
            rels: Relationships::load(src_pkg, &main)?,
            content_types: ContentTypes::load(src_pkg)?,
            main,
            parts: HashMap::new(),
        };
        merge_namespaces(&mut self.doc.root, &src_doc.root);

        let (mut blocks, _section) = split_body(src_doc)?;
        for_each_element(&mut blocks, |e| {
            if e.name == "w:pPr" {
                e.children.retain(|c| !c.is("w:sectPr"));
            }
        });

        let mut styles = self.styles_to_import(&source, &blocks)?;

        let mut used_lists = BTreeSet::new();
        let mut collect_lists = |e: &Element| {
            if e.name == "w:numId" {
                if let Some(v) = e.attr("w:val").filter(|v| *v != "0") {
                    used_lists.insert(v.to_string());
                }
            }
        };
        for node in &blocks {
            if let Some(e) = node.as_element() {
                e.walk(&mut collect_lists);
            }
        }
        for style in &styles {
            style.walk(&mut collect_lists);
        }

        let list_map = self.import_numbering(&source, &used_lists, fragment.restart_numbering)?;
        let remap_lists = |e: &mut Element| {
            if e.name == "w:numId" {
                if let Some(new) = e.attr("w:val").and_then(|v| list_map.get(v)).cloned() {
                    e.set_attr("w:val", new);
                }
            }
        };
        for_each_element(&mut blocks, remap_lists);
        for style in &mut styles {
            style.walk_mut(&mut |e| remap_lists(e));
        }
        if let Some((_, dst_styles)) = &mut self.styles {
            for style in styles {
                debug!(
                    fragment = source.name,
                    style = style.attr("w:styleId").unwrap_or_default(),
                    "Imported style"
                );
                dst_styles.root.children.push(XmlNode::Element(style));
            }
        }

        self.import_relationships(&mut source, &mut blocks)?;
        self.renumber_ids(&mut blocks);
        Ok(blocks)
    }

    /// Source styles referenced by `blocks` (transitively) that the base lacks.
    fn styles_to_import(&mut self, source: &Source<'_>, blocks: &[XmlNode]) -> Result<Vec<Element>> {
        let Some((_, src_styles)) =
            load_related(source.pkg, &source.main, &source.rels, "styles")?
        else {
            return Ok(Vec::new());
        };
        let Some((_, dst_styles)) = &mut self.styles else {
            warn!(fragment = source.name, "Base document has no styles part; fragment styles dropped");
            return Ok(Vec::new());
        };
        merge_namespaces(&mut dst_styles.root, &src_styles.root);

        let mut queue: Vec<String> = Vec::new();
        for node in blocks {
            if let Some(e) = node.as_element() {
                e.walk(&mut |e| {
                    if matches!(e.name.as_str(), "w:pStyle" | "w:rStyle" | "w:tblStyle") {
                        if let Some(v) = e.attr("w:val") {
                            queue.push(v.to_string());
                        }
                    }
                });
            }
        }

        let has_style = |root: &Element, id: &str| {
            root.elements()
                .any(|s| s.name == "w:style" && s.attr("w:styleId") == Some(id))
        };
        let mut seen = BTreeSet::new();
        let mut imported = Vec::new();
        while let Some(id) = queue.pop() {
            if !seen.insert(id.clone()) || has_style(&dst_styles.root, &id) {
                continue;
            }
            let Some(style) = src_styles
                .root
                .elements()
                .find(|s| s.name == "w:style" && s.attr("w:styleId") == Some(id.as_str()))
            else {
                continue;
            };
            for dep in ["w:basedOn", "w:next", "w:link"] {
                if let Some(v) = style.child(dep).and_then(|d| d.attr("w:val")) {
                    queue.push(v.to_string());
                }
            }
            imported.push(style.clone());
        }
        Ok(imported)
    }

    /// Map source list ids onto the merged numbering part.
    fn import_numbering(
        &mut self,
        source: &Source<'_>,
        used: &BTreeSet<String>,
        restart: bool,
    ) -> Result<HashMap<String, String>> {
        let mut map = HashMap::new();
        if used.is_empty() {
            return Ok(map);
        }
        let Some((_, src_numbering)) =
            load_related(source.pkg, &source.main, &source.rels, "numbering")?
        else {
            warn!(fragment = source.name, "Fragment uses lists but has no numbering part");
            return Ok(map);
        };
        let dst = self.numbering_part();
        merge_namespaces(&mut dst.root, &src_numbering.root);

        for num_id in used {
            let Some(num) = find_by_attr(&src_numbering.root, "w:num", "w:numId", num_id) else {
                warn!(fragment = source.name, num_id = %num_id, "List id has no definition");
                continue;
            };
            let Some(abstract_id) = num.child("w:abstractNumId").and_then(|a| a.attr("w:val")) else {
                continue;
            };
            let Some(abstract_num) =
                find_by_attr(&src_numbering.root, "w:abstractNum", "w:abstractNumId", abstract_id)
            else {
                continue;
            };

            if !restart {
                if let Some(existing) = equivalent_list(&dst.root, abstract_num, num) {
                    map.insert(num_id.clone(), existing);
                    continue;
                }
            }

            let new_abstract = next_id(&dst.root, "w:abstractNum", "w:abstractNumId");
            let new_num = next_id(&dst.root, "w:num", "w:numId");

            let mut abstract_copy = abstract_num.clone();
            abstract_copy.set_attr("w:abstractNumId", new_abstract.to_string());
            if let Some(nsid) = abstract_copy.child_mut("w:nsid") {
                let fresh = uuid::Uuid::new_v4().as_u128() as u32;
                nsid.set_attr("w:val", format!("{fresh:08X}"));
            }
            let mut num_copy = num.clone();
            num_copy.set_attr("w:numId", new_num.to_string());
            if let Some(a) = num_copy.child_mut("w:abstractNumId") {
                a.set_attr("w:val", new_abstract.to_string());
            }

            // Every w:abstractNum must precede the first w:num.
            let at = dst
                .root
                .children
                .iter()
                .position(|c| c.is("w:num") || c.is("w:numIdMacAtCleanup"))
                .unwrap_or(dst.root.children.len());
            dst.root.children.insert(at, XmlNode::Element(abstract_copy));
            dst.root.children.push(XmlNode::Element(num_copy));
            map.insert(num_id.clone(), new_num.to_string());
        }
        Ok(map)
    }

    /// The merged numbering part, created (with its relationship) on first use.
    fn numbering_part(&mut self) -> &mut XmlDocument {
        let (_, doc) = self.numbering.get_or_insert_with(|| {
            let part = self.pkg.unique_part_name("word/numbering.xml");
            self.rels.add(
                &format!("{REL_TYPE_BASE}numbering"),
                &relative_target(&self.main_part, &part),
                false,
            );
            self.content_types.ensure(&part, NUMBERING_CONTENT_TYPE);
            let root = Element::new("w:numbering").with_attr("xmlns:w", W_NS);
            (part, XmlDocument::new(root))
        });
        doc
    }

    /// Re-key every `r:*` attribute in `blocks` onto the merged relationships.
    fn import_relationships(&mut self, source: &mut Source<'_>, blocks: &mut [XmlNode]) -> Result<()> {
        let mut referenced = BTreeSet::new();
        for node in blocks.iter() {
            if let Some(e) = node.as_element() {
                e.walk(&mut |e| {
                    for (k, v) in &e.attrs {
                        if k.starts_with("r:") {
                            referenced.insert(v.clone());
                        }
                    }
                });
            }
        }

        let mut id_map = HashMap::new();
        for old_id in referenced {
            let Some(rel) = source.rels.get(&old_id).cloned() else {
                warn!(fragment = source.name, rel_id = %old_id, "Dangling relationship id left as is");
                continue;
            };
            if let Some(new_id) = self.import_relationship(source, &rel)? {
                id_map.insert(old_id, new_id);
            }
        }

        for_each_element(blocks, |e| {
            for (k, v) in e.attrs.iter_mut() {
                if k.starts_with("r:") {
                    if let Some(new) = id_map.get(v.as_str()) {
                        *v = new.clone();
                    }
                }
            }
        });
        Ok(())
    }

    fn import_relationship(&mut self, source: &mut Source<'_>, rel: &Relationship) -> Result<Option<String>> {
        if rel.external {
            return Ok(Some(self.rels.add(&rel.rel_type, &rel.target, true)));
        }
        let src_part = resolve_target(&source.main, &rel.target);
        if !source.pkg.has_part(&src_part) {
            warn!(fragment = source.name, rel_id = %rel.id, target = %rel.target, "Relationship target missing");
            return Ok(None);
        }
        let new_part = self.import_part(source, &src_part)?;
        let existing = self.rels.iter().find(|r| {
            !r.external && r.rel_type == rel.rel_type && resolve_target(&self.main_part, &r.target) == new_part
        });
        if let Some(existing) = existing {
            return Ok(Some(existing.id.clone()));
        }
        let target = relative_target(&self.main_part, &new_part);
        Ok(Some(self.rels.add(&rel.rel_type, &target, false)))
    }

    /// Copy a source part (and what it references) into the merged package.
    fn import_part(&mut self, source: &mut Source<'_>, src_part: &str) -> Result<String> {
        if let Some(done) = source.parts.get(src_part) {
            return Ok(done.clone());
        }
        let src_pkg = source.pkg;
        let data = src_pkg
            .part(src_part)
            .ok_or_else(|| OfferError::MalformedDocument(format!("missing part '{src_part}'")))?;

        // Identical part already present under the same name (shared logo, etc.).
        if self.pkg.part(src_part) == Some(data) {
            source.parts.insert(src_part.to_string(), src_part.to_string());
            return Ok(src_part.to_string());
        }

        let new_part = self.pkg.unique_part_name(src_part);
        source.parts.insert(src_part.to_string(), new_part.clone());
        self.pkg.set_part(new_part.clone(), data.to_vec());
        if let Some(ct) = source.content_types.content_type_of(src_part) {
            self.content_types.ensure(&new_part, &ct);
        }
        debug!(fragment = source.name, from = %src_part, to = %new_part, "Copied part");

        let nested = Relationships::load(src_pkg, src_part)?;
        if nested.iter().next().is_some() {
            let mut rebased = Relationships::default();
            for rel in nested.iter() {
                let mut rel = rel.clone();
                if !rel.external {
                    let target = resolve_target(src_part, &rel.target);
                    if src_pkg.has_part(&target) {
                        let copied = self.import_part(source, &target)?;
                        rel.target = relative_target(&new_part, &copied);
                    }
                }
                rebased.push(rel);
            }
            rebased.save(&mut self.pkg, &new_part)?;
        }
        Ok(new_part)
    }

    fn renumber_ids(&mut self, blocks: &mut [XmlNode]) {
        let mut bookmarks: HashMap<String, u64> = HashMap::new();
        let next_bookmark = &mut self.next_bookmark;
        let next_drawing = &mut self.next_drawing;
        for_each_element(blocks, |e| match e.name.as_str() {
            "w:bookmarkStart" | "w:bookmarkEnd" => {
                if let Some(old) = e.attr("w:id").map(str::to_string) {
                    let new = *bookmarks.entry(old).or_insert_with(|| {
                        let n = *next_bookmark;
                        *next_bookmark += 1;
                        n
                    });
                    e.set_attr("w:id", new.to_string());
                }
            }
            "wp:docPr" => {
                e.set_attr("id", next_drawing.to_string());
                *next_drawing += 1;
            }
            _ => {}
        });
    }

    fn finish(mut self, blocks: Vec<XmlNode>, section: Option<Element>) -> Result<DocxPackage> {
        let body = self
            .doc
            .root
            .child_mut("w:body")
            .ok_or_else(|| OfferError::MalformedDocument("main document has no w:body".into()))?;
        body.children = blocks;
        if let Some(section) = section {
            body.children.push(XmlNode::Element(section));
        }

        self.pkg.write_xml(&self.main_part, &self.doc)?;
        self.rels.save(&mut self.pkg, &self.main_part)?;
        self.content_types.save(&mut self.pkg)?;
        if let Some((part, doc)) = &self.styles {
            self.pkg.write_xml(part, doc)?;
        }
        if let Some((part, doc)) = &self.numbering {
            self.pkg.write_xml(part, doc)?;
        }
        Ok(self.pkg)
    }
}

fn load_related(
    pkg: &DocxPackage,
    source_part: &str,
    rels: &Relationships,
    kind: &str,
) -> Result<Option<(String, XmlDocument)>> {
    let Some(rel) = rels.first_of_kind(kind).filter(|r| !r.external) else {
        return Ok(None);
    };
    let part = resolve_target(source_part, &rel.target);
    if !pkg.has_part(&part) {
        return Ok(None);
    }
    let doc = pkg.read_xml(&part)?;
    Ok(Some((part, doc)))
}

fn for_each_element(blocks: &mut [XmlNode], mut f: impl FnMut(&mut Element)) {
    for node in blocks {
        if let Some(e) = node.as_element_mut() {
            e.walk_mut(&mut f);
        }
    }
}

fn find_by_attr<'a>(root: &'a Element, name: &str, key: &str, value: &str) -> Option<&'a Element> {
    root.elements()
        .find(|e| e.name == name && e.attr(key) == Some(value))
}

fn next_id(root: &Element, name: &str, key: &str) -> u64 {
    root.elements()
        .filter(|e| e.name == name)
        .filter_map(|e| e.attr(key)?.parse::<u64>().ok())
        .max()
        .map_or(1, |n| n + 1)
}

/// List definition with instance-specific ids stripped, for equivalence checks.
fn list_shape(abstract_num: &Element) -> Element {
    let mut shape = abstract_num.clone();
    shape.remove_attr("w:abstractNumId");
    shape
        .children
        .retain(|c| c.as_element().is_some() && !c.is("w:nsid") && !c.is("w:tmpl"));
    shape
}

/// A `w:numId` in `dst` whose definition and overrides match the source list.
fn equivalent_list(dst: &Element, abstract_num: &Element, num: &Element) -> Option<String> {
    let wanted = list_shape(abstract_num);
    let overrides = |n: &Element| -> Vec<Element> {
        n.elements()
            .filter(|c| c.name != "w:abstractNumId")
            .cloned()
            .collect()
    };
    let wanted_overrides = overrides(num);

    dst.elements()
        .filter(|e| e.name == "w:abstractNum" && list_shape(e) == wanted)
        .filter_map(|a| a.attr("w:abstractNumId"))
        .find_map(|abstract_id| {
            dst.elements()
                .filter(|n| n.name == "w:num")
                .find(|n| {
                    n.child("w:abstractNumId").and_then(|a| a.attr("w:val")) == Some(abstract_id)
                        && overrides(n) == wanted_overrides
                })
                .and_then(|n| n.attr("w:numId"))
                .map(str::to_string)
        })
}

/// Declare on `dst` every namespace prefix `src` declares, and merge `mc:Ignorable`.
fn merge_namespaces(dst: &mut Element, src: &Element) {
    for (k, v) in &src.attrs {
        if k.starts_with("xmlns:") && dst.attr(k).is_none() {
            dst.attrs.push((k.clone(), v.clone()));
        }
    }
    let Some(src_ignorable) = src.attr("mc:Ignorable") else {
        return;
    };
    let mut prefixes: Vec<String> = dst
        .attr("mc:Ignorable")
        .unwrap_or_default()
        .split_whitespace()
        .map(str::to_string)
        .collect();
    for prefix in src_ignorable.split_whitespace() {
        let declared = dst.attr(&format!("xmlns:{prefix}")).is_some();
        if declared && !prefixes.iter().any(|p| p == prefix) {
            prefixes.push(prefix.to_string());
        }
    }
    if !prefixes.is_empty() {
        dst.set_attr("mc:Ignorable", prefixes.join(" "));
    }
}
