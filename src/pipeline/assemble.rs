//! Assembly: request + template family → one substituted `.docx` on disk.
//!
//! Split in two so that validation touches nothing but the read-only
//! library: [`prepare`] resolves the family and products and checks required
//! placeholders and values; [`assemble`] merges, substitutes and writes the working file.

use crate::config::PipelineConfig;
use crate::error::{OfferError, Result};
use crate::library::{ContentLibrary, ProductFragment, TemplateDescriptor};
use crate::pipeline::merge::merge;
use crate::pipeline::substitute::{check_required, check_values, Substitution};
use crate::request::OfferRequest;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A validated request bound to its library entries.
#[derive(Debug)]
pub struct AssemblyPlan<'a> {
    pub template: &'a TemplateDescriptor,
    pub products: Vec<&'a ProductFragment>,
    pub request: &'a OfferRequest,
}

/// The merged, substituted working document of one request.
#[derive(Debug, Clone)]
pub struct AssemblyArtifact {
    pub path: PathBuf,
    pub byte_size: u64,
    /// Tokens replaced across all parts.
    pub replaced: usize,
}

/// Validate `request` against `family` in `library`. Performs no I/O.
pub fn prepare<'a>(
    library: &'a ContentLibrary,
    family: &str,
    request: &'a OfferRequest,
) -> Result<AssemblyPlan<'a>> {
    request.validate()?;
    check_values(&request.placeholders)?;
    let template = library.family(family)?;
    let products = library.resolve_products(&request.products)?;
    check_required(&template.required_placeholders, request, &template.defaults)?;
    Ok(AssemblyPlan {
        template,
        products,
        request,
    })
}

/// Merge, substitute, and write `<work_dir>/<file_stem>.docx`.
pub fn assemble(
    plan: &AssemblyPlan<'_>,
    config: &PipelineConfig,
    work_dir: &Path,
    file_stem: &str,
) -> Result<AssemblyArtifact> {
    let template = plan.template;
    let mut merged = merge(&template.merge_plan(&plan.products))?;
    debug!(
        family = %template.family,
        products = plan.products.len(),
        parts = merged.part_names().count(),
        "Fragments merged"
    );

    let substitution = Substitution::for_request(
        plan.request,
        &template.defaults,
        template.unresolved,
        config,
    )?;
    let replaced = substitution.apply_package(&mut merged)?;

    let path = work_dir.join(format!("{file_stem}.docx"));
    merged.save(&path)?;
    let byte_size = std::fs::metadata(&path)
        .map_err(|e| OfferError::io("stat file", &path, e))?
        .len();
    info!(
        family = %template.family,
        replaced,
        byte_size,
        path = %path.display(),
        "Document assembled"
    );
    Ok(AssemblyArtifact {
        path,
        byte_size,
        replaced,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docx::fixtures::{package, paragraph};
    use crate::docx::text::all_paragraph_texts;
    use crate::docx::DocxPackage;
    use crate::error::ErrorKind;
    use crate::library::{FamilySpec, SkeletonFragment};
    use crate::request::OutputFormat;
    use std::sync::Arc;

    fn library() -> ContentLibrary {
        let mut lib = ContentLibrary::new();
        let spec = FamilySpec {
            anchor: "toc".into(),
            required_placeholders: vec!["klient".into()],
            ..FamilySpec::default()
        };
        let fragment = |name: &str, text: &str| SkeletonFragment {
            name: name.to_string(),
            package: Arc::new(package(&[paragraph(&[text])])),
        };
        lib.add_family(
            "wolftax",
            spec,
            vec![
                fragment("title", "Oferta dla {{klient}}"),
                fragment("toc", "Spis treści"),
            ],
        )
        .unwrap();
        lib.add_product("1.docx", package(&[paragraph(&["Produkt {{", "klient", "}}"])]), false);
        lib
    }

    #[test]
    fn prepare_rejects_before_any_io() {
        let lib = library();
        let missing = OfferRequest::new(OutputFormat::StructuredDocument).with_product("1.docx");
        let err = prepare(&lib, "wolftax", &missing).unwrap_err();
        assert!(matches!(err, OfferError::MissingRequiredPlaceholder { ref name } if name == "klient"));
        assert_eq!(err.kind(), ErrorKind::Validation);

        let unknown = OfferRequest::new(OutputFormat::StructuredDocument)
            .with_placeholder("klient", "ACME")
            .with_product("7.docx");
        assert!(matches!(
            prepare(&lib, "wolftax", &unknown).unwrap_err(),
            OfferError::UnknownProduct { .. }
        ));
        assert!(matches!(
            prepare(&lib, "nope", &unknown).unwrap_err(),
            OfferError::UnknownTemplate { .. }
        ));
    }

    #[test]
    fn assembles_merged_and_substituted_document() {
        let lib = library();
        let request = OfferRequest::new(OutputFormat::StructuredDocument)
            .with_placeholder("klient", "ACME")
            .with_product("1.docx");
        let plan = prepare(&lib, "wolftax", &request).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let artifact = assemble(&plan, &PipelineConfig::default(), dir.path(), "oferta_x").unwrap();

        assert_eq!(artifact.path, dir.path().join("oferta_x.docx"));
        assert_eq!(artifact.replaced, 2);
        assert!(artifact.byte_size > 0);

        let pkg = DocxPackage::open(&artifact.path).unwrap();
        let doc = pkg.read_xml("word/document.xml").unwrap();
        let texts: Vec<_> = all_paragraph_texts(&doc)
            .into_iter()
            .filter(|t| t != "\n")
            .collect();
        assert_eq!(texts, vec!["Oferta dla ACME", "Spis treści", "Produkt ACME"]);
    }
}
