//! The read-only content library: template families and product fragments.
//!
//! Loaded once at startup from a JSON manifest. Every configuration problem
//! (missing file, unparseable fragment, anchor not among the skeleton, anchor
//! paragraph that matches nothing) surfaces here, not per request. After
//! loading, the library is immutable and shared across requests via `Arc`.
//!
//! ```json
//! {
//!   "templates_dir": "templates",
//!   "products_dir": "produkty",
//!   "families": {
//!     "wolftax": {
//!       "fragments": [
//!         { "name": "title", "file": "1_strona_tytulowa.docx" },
//!         { "name": "intro", "file": "2_wstep.docx" },
//!         { "name": "toc",   "file": "3_spis.docx" },
//!         { "name": "terms", "file": "4_warunki.docx" }
//!       ],
//!       "anchor": "toc",
//!       "required_placeholders": ["NazwaFirmyKlienta"],
//!       "defaults": { "waluta": "PLN" },
//!       "unresolved": "empty"
//!     },
//!     "aidrops": {
//!       "fragments": [{ "name": "oferta", "file": "oferta.docx" }],
//!       "anchor": "oferta",
//!       "anchor_paragraph": "Opis:\\s+"
//!     }
//!   },
//!   "products": { "3.docx": { "restart_numbering": true } }
//! }
//! ```

use crate::docx::DocxPackage;
use crate::error::{OfferError, Result};
use crate::pipeline::merge::{body_blocks, find_anchor_paragraph, FragmentRef, MergePlan};
use crate::pipeline::substitute::{check_values, placeholder_names, UnresolvedPolicy};
use crate::request::PlaceholderValue;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

// ── Manifest ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
struct Manifest {
    #[serde(default = "default_templates_dir")]
    templates_dir: PathBuf,
    #[serde(default = "default_products_dir")]
    products_dir: PathBuf,
    families: BTreeMap<String, FamilySpec>,
    #[serde(default)]
    products: BTreeMap<String, ProductSpec>,
}

fn default_templates_dir() -> PathBuf {
    PathBuf::from("templates")
}

fn default_products_dir() -> PathBuf {
    PathBuf::from("products")
}

/// Declaration of one template family.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FamilySpec {
    pub fragments: Vec<FragmentSpec>,
    /// Name of the fragment products are injected after.
    pub anchor: String,
    /// Regex selecting the paragraph of the anchor fragment to inject after.
    #[serde(default)]
    pub anchor_paragraph: Option<String>,
    #[serde(default)]
    pub required_placeholders: Vec<String>,
    #[serde(default)]
    pub defaults: BTreeMap<String, PlaceholderValue>,
    #[serde(default)]
    pub unresolved: UnresolvedPolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FragmentSpec {
    /// Defaults to the file stem.
    #[serde(default)]
    pub name: Option<String>,
    pub file: PathBuf,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
struct ProductSpec {
    #[serde(default)]
    restart_numbering: bool,
}

// ── Library types ────────────────────────────────────────────────────────

/// One skeleton fragment of a template family.
#[derive(Debug, Clone)]
pub struct SkeletonFragment {
    pub name: String,
    pub package: Arc<DocxPackage>,
}

/// A resolved template family.
#[derive(Debug, Clone)]
pub struct TemplateDescriptor {
    pub family: String,
    /// Skeleton in its fixed order.
    pub fragments: Vec<SkeletonFragment>,
    /// Index into `fragments`.
    pub anchor: usize,
    pub anchor_paragraph: Option<Regex>,
    pub required_placeholders: Vec<String>,
    pub defaults: BTreeMap<String, PlaceholderValue>,
    pub unresolved: UnresolvedPolicy,
}

impl TemplateDescriptor {
    /// Validate a family declaration against its loaded fragments.
    pub fn new(family: &str, spec: FamilySpec, fragments: Vec<SkeletonFragment>) -> Result<Self> {
        if fragments.is_empty() {
            return Err(OfferError::InvalidConfig(format!(
                "template family '{family}' has no fragments"
            )));
        }
        let anchor = fragments
            .iter()
            .position(|f| f.name == spec.anchor)
            .ok_or_else(|| OfferError::AnchorNotFound {
                family: family.to_string(),
                anchor: spec.anchor.clone(),
            })?;

        check_values(&spec.defaults).map_err(|e| {
            OfferError::InvalidConfig(format!("template family '{family}' defaults: {e}"))
        })?;

        for fragment in &fragments {
            body_blocks(&fragment.package).map_err(|e| {
                OfferError::InvalidConfig(format!(
                    "template family '{family}', fragment '{}': {e}",
                    fragment.name
                ))
            })?;
        }

        let anchor_paragraph = match spec.anchor_paragraph.as_deref() {
            Some(pattern) => {
                let re = Regex::new(pattern).map_err(|e| {
                    OfferError::InvalidConfig(format!(
                        "template family '{family}': invalid anchor_paragraph: {e}"
                    ))
                })?;
                let blocks = body_blocks(&fragments[anchor].package)?;
                if find_anchor_paragraph(&blocks, &re).is_none() {
                    return Err(OfferError::AnchorParagraphNotFound {
                        family: family.to_string(),
                        anchor: spec.anchor.clone(),
                        pattern: pattern.to_string(),
                    });
                }
                Some(re)
            }
            None => None,
        };

        Ok(Self {
            family: family.to_string(),
            fragments,
            anchor,
            anchor_paragraph,
            required_placeholders: spec.required_placeholders,
            defaults: spec.defaults,
            unresolved: spec.unresolved,
        })
    }

    pub fn anchor_name(&self) -> &str {
        &self.fragments[self.anchor].name
    }

    /// The merge of this skeleton with `products`.
    pub fn merge_plan<'a>(&'a self, products: &[&'a ProductFragment]) -> MergePlan<'a> {
        MergePlan {
            family: &self.family,
            skeleton: self
                .fragments
                .iter()
                .map(|f| FragmentRef::new(&f.name, &f.package))
                .collect(),
            anchor: self.anchor,
            anchor_paragraph: self.anchor_paragraph.as_ref(),
            products: products
                .iter()
                .map(|p| FragmentRef {
                    name: &p.id,
                    package: &p.package,
                    restart_numbering: p.restart_numbering,
                })
                .collect(),
        }
    }

    /// Token names appearing anywhere in the skeleton's main documents.
    pub fn placeholders(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        for fragment in &self.fragments {
            let Ok(part) = fragment.package.main_document_part() else {
                continue;
            };
            if let Ok(doc) = fragment.package.read_xml(&part) {
                names.extend(placeholder_names(&doc.root));
            }
        }
        names
    }
}

/// A named product fragment.
#[derive(Debug, Clone)]
pub struct ProductFragment {
    /// Identifier requests use: the file name, e.g. `3.docx`.
    pub id: String,
    pub package: Arc<DocxPackage>,
    pub restart_numbering: bool,
}

/// Summary for health checks and the `check` CLI command.
#[derive(Debug, Clone, Serialize)]
pub struct LibraryHealth {
    pub status: &'static str,
    pub families: Vec<FamilyHealth>,
    pub product_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FamilyHealth {
    pub name: String,
    pub fragments: Vec<String>,
    pub anchor: String,
    pub placeholders: Vec<String>,
}

/// Template families and product fragments, shared read-only by all requests.
#[derive(Debug, Clone, Default)]
pub struct ContentLibrary {
    families: BTreeMap<String, TemplateDescriptor>,
    products: BTreeMap<String, ProductFragment>,
}

impl ContentLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a library from its JSON manifest. Relative paths resolve against
    /// the manifest's directory. Blocking; call once at startup.
    pub fn load(manifest_path: &Path) -> Result<Self> {
        let invalid = |detail: String| OfferError::InvalidManifest {
            path: manifest_path.to_path_buf(),
            detail,
        };
        let text = std::fs::read_to_string(manifest_path).map_err(|e| invalid(e.to_string()))?;
        let manifest: Manifest = serde_json::from_str(&text).map_err(|e| invalid(e.to_string()))?;
        let base = manifest_path.parent().unwrap_or_else(|| Path::new("."));
        let templates_dir = base.join(&manifest.templates_dir);
        let products_dir = base.join(&manifest.products_dir);

        let mut library = Self::new();

        let scanned = scan_products(&products_dir).map_err(|e| {
            invalid(format!(
                "cannot read products directory '{}': {e}",
                products_dir.display()
            ))
        })?;
        for (id, path) in scanned {
            let package = DocxPackage::open(&path)?;
            let restart = manifest
                .products
                .get(&id)
                .is_some_and(|p| p.restart_numbering);
            debug!(product = %id, path = %path.display(), "Loaded product fragment");
            library.add_product(id, package, restart);
        }
        if let Some(unknown) = manifest
            .products
            .keys()
            .find(|id| !library.products.contains_key(*id))
        {
            return Err(invalid(format!(
                "product '{unknown}' has options but no file in {}",
                products_dir.display()
            )));
        }

        for (name, spec) in manifest.families {
            let mut fragments = Vec::with_capacity(spec.fragments.len());
            for fragment in &spec.fragments {
                let path = templates_dir.join(&fragment.file);
                let package = DocxPackage::open(&path)?;
                let fragment_name = fragment.name.clone().unwrap_or_else(|| {
                    fragment
                        .file
                        .file_stem()
                        .map(|s| s.to_string_lossy().into_owned())
                        .unwrap_or_default()
                });
                fragments.push(SkeletonFragment {
                    name: fragment_name,
                    package: Arc::new(package),
                });
            }
            library.add_family(&name, spec, fragments)?;
        }

        info!(
            families = library.families.len(),
            products = library.products.len(),
            manifest = %manifest_path.display(),
            "Content library loaded"
        );
        Ok(library)
    }

    /// Register a template family, validating it.
    pub fn add_family(
        &mut self,
        name: &str,
        spec: FamilySpec,
        fragments: Vec<SkeletonFragment>,
    ) -> Result<()> {
        let descriptor = TemplateDescriptor::new(name, spec, fragments)?;
        debug!(
            family = name,
            fragments = descriptor.fragments.len(),
            anchor = descriptor.anchor_name(),
            "Registered template family"
        );
        self.families.insert(name.to_string(), descriptor);
        Ok(())
    }

    pub fn add_product(&mut self, id: impl Into<String>, package: DocxPackage, restart_numbering: bool) {
        let id = id.into();
        self.products.insert(
            id.clone(),
            ProductFragment {
                id,
                package: Arc::new(package),
                restart_numbering,
            },
        );
    }

    pub fn family(&self, name: &str) -> Result<&TemplateDescriptor> {
        self.families
            .get(name)
            .ok_or_else(|| OfferError::UnknownTemplate {
                family: name.to_string(),
            })
    }

    pub fn family_names(&self) -> impl Iterator<Item = &str> {
        self.families.keys().map(String::as_str)
    }

    /// Look up every id, failing on the first one the library does not hold.
    pub fn resolve_products(&self, ids: &[String]) -> Result<Vec<&ProductFragment>> {
        ids.iter()
            .map(|id| {
                self.products
                    .get(id)
                    .ok_or_else(|| OfferError::UnknownProduct {
                        id: id.clone(),
                        available: self.product_ids().join(", "),
                    })
            })
            .collect()
    }

    /// Product identifiers, sorted.
    pub fn product_ids(&self) -> Vec<&str> {
        self.products.keys().map(String::as_str).collect()
    }

    pub fn health(&self) -> LibraryHealth {
        LibraryHealth {
            status: if self.families.is_empty() { "empty" } else { "ok" },
            families: self
                .families
                .values()
                .map(|f| FamilyHealth {
                    name: f.family.clone(),
                    fragments: f.fragments.iter().map(|x| x.name.clone()).collect(),
                    anchor: f.anchor_name().to_string(),
                    placeholders: f.placeholders().into_iter().collect(),
                })
                .collect(),
            product_count: self.products.len(),
        }
    }
}

/// `.docx` files in `dir`, keyed by file name. Word lock files (`~$…`) are skipped.
fn scan_products(dir: &Path) -> std::io::Result<Vec<(String, PathBuf)>> {
    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let is_docx = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("docx"));
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if is_docx && path.is_file() && !name.starts_with("~$") {
            found.push((name.to_string(), path.clone()));
        }
    }
    found.sort();
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docx::fixtures::{package, paragraph};

    fn skeleton(names: &[&str]) -> Vec<SkeletonFragment> {
        names
            .iter()
            .map(|n| SkeletonFragment {
                name: n.to_string(),
                package: Arc::new(package(&[paragraph(&[*n, " {{Temat}}"])])),
            })
            .collect()
    }

    fn spec(anchor: &str) -> FamilySpec {
        FamilySpec {
            anchor: anchor.to_string(),
            ..FamilySpec::default()
        }
    }

    #[test]
    fn anchor_must_be_a_fragment() {
        let err = TemplateDescriptor::new("wolftax", spec("toc"), skeleton(&["title", "intro"]))
            .unwrap_err();
        assert!(matches!(err, OfferError::AnchorNotFound { ref anchor, .. } if anchor == "toc"));
    }

    #[test]
    fn anchor_paragraph_must_match_at_load() {
        let mut s = spec("oferta");
        s.anchor_paragraph = Some(r"Opis:\s+".into());
        let err = TemplateDescriptor::new("aidrops", s, skeleton(&["oferta"])).unwrap_err();
        assert!(matches!(err, OfferError::AnchorParagraphNotFound { .. }));
    }

    #[test]
    fn defaults_may_not_hold_markers() {
        let mut s = spec("toc");
        s.defaults
            .insert("waluta".into(), PlaceholderValue::from("{{kurs}} PLN"));
        let err = TemplateDescriptor::new("wolftax", s, skeleton(&["title", "toc"])).unwrap_err();
        assert!(matches!(err, OfferError::InvalidConfig(_)));
    }

    #[test]
    fn missing_products_directory_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("manifest.json");
        std::fs::write(&manifest, r#"{"families": {}}"#).unwrap();
        let err = ContentLibrary::load(&manifest).unwrap_err();
        assert!(matches!(err, OfferError::InvalidManifest { .. }), "{err}");
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }

    #[test]
    fn unknown_product_lists_available() {
        let mut lib = ContentLibrary::new();
        lib.add_product("1.docx", package(&[]), false);
        lib.add_product("2.docx", package(&[]), false);
        let err = lib.resolve_products(&["1.docx".into(), "9.docx".into()]).unwrap_err();
        match err {
            OfferError::UnknownProduct { id, available } => {
                assert_eq!(id, "9.docx");
                assert_eq!(available, "1.docx, 2.docx");
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn health_reports_families_and_placeholders() {
        let mut lib = ContentLibrary::new();
        lib.add_family("wolftax", spec("toc"), skeleton(&["title", "toc"])).unwrap();
        lib.add_product("1.docx", package(&[]), false);
        let health = lib.health();
        assert_eq!(health.status, "ok");
        assert_eq!(health.product_count, 1);
        assert_eq!(health.families[0].anchor, "toc");
        assert_eq!(health.families[0].placeholders, vec!["Temat"]);
        assert!(matches!(lib.family("aidrops"), Err(OfferError::UnknownTemplate { .. })));
    }

    #[test]
    fn manifest_parses_with_defaults() {
        let json = r#"{
            "families": {
                "aidrops": {
                    "fragments": [{"file": "oferta.docx"}],
                    "anchor": "oferta",
                    "unresolved": "keep",
                    "defaults": {"waluta": "PLN"}
                }
            }
        }"#;
        let m: Manifest = serde_json::from_str(json).unwrap();
        assert_eq!(m.templates_dir, PathBuf::from("templates"));
        let family = &m.families["aidrops"];
        assert_eq!(family.unresolved, UnresolvedPolicy::Keep);
        assert!(family.fragments[0].name.is_none());
        assert!(family.required_placeholders.is_empty());
    }
}
