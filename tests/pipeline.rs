//! Integration tests: full requests through `OfferGenerator` against a
//! library on disk, with fake converter and rasteriser.

mod common;

use common::{docx_texts, FakeConverter, Fixture};
use offerdoc::{
    list_offers, ContentLibrary, ErrorKind, OfferError, OfferProgressCallback, OfferRequest,
    OutputFormat, PlaceholderValue, Stage,
};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn wolftax_request(format: OutputFormat) -> OfferRequest {
    OfferRequest::new(format)
        .with_placeholder("klient", "ACME Sp. z o.o.")
        .with_placeholder("temat", "CRM rollout")
        .with_product("P1.docx")
        .with_product("P2.docx")
}

// ── Assembly ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn products_are_injected_after_the_anchor_in_request_order() {
    let fx = Fixture::new();
    let generator = fx.generator(fx.config().build().unwrap(), Arc::new(FakeConverter::default()));

    let artifact = generator
        .generate("wolftax", &wolftax_request(OutputFormat::StructuredDocument))
        .await
        .unwrap();

    let order: Vec<String> = docx_texts(&artifact.primary_path)
        .into_iter()
        .filter(|t| !t.contains(' ') && !t.contains(':'))
        .collect();
    assert_eq!(
        order,
        vec!["Title", "Intro", "TOC", "P1", "P2", "Summary", "Terms", "Back"]
    );
}

#[tokio::test]
async fn temat_is_replaced_in_both_places_and_nothing_else_changes() {
    let fx = Fixture::new();
    let generator = fx.generator(fx.config().build().unwrap(), Arc::new(FakeConverter::default()));

    let artifact = generator
        .generate("wolftax", &wolftax_request(OutputFormat::StructuredDocument))
        .await
        .unwrap();

    let texts = docx_texts(&artifact.primary_path);
    assert!(texts.contains(&"Temat: CRM rollout".to_string()), "{texts:?}");
    assert!(texts.contains(&"CRM rollout – podsumowanie".to_string()), "{texts:?}");
    assert!(texts.contains(&"Oferta dla ACME Sp. z o.o.".to_string()), "{texts:?}");
    // Family default fills the optional placeholder.
    assert!(texts.contains(&"Ważna do 30 dni".to_string()), "{texts:?}");
    assert!(texts.iter().all(|t| !t.contains("{{")), "{texts:?}");
}

#[tokio::test]
async fn anchor_paragraph_family_keeps_unresolved_markers() {
    let fx = Fixture::new();
    let generator = fx.generator(fx.config().build().unwrap(), Arc::new(FakeConverter::default()));
    let request = OfferRequest::new(OutputFormat::StructuredDocument)
        .with_placeholder("klient", "ACME")
        .with_product("P3.docx");

    let artifact = generator.generate("aidrops", &request).await.unwrap();
    assert_eq!(
        docx_texts(&artifact.primary_path),
        vec!["Oferta ACME", "Opis:\t{{opis}}", "P3 dla ACME", "Cena"]
    );
}

// ── Conversion and layout ────────────────────────────────────────────────────

#[tokio::test]
async fn docx_output_layout() {
    let fx = Fixture::new();
    let converter = Arc::new(FakeConverter::default());
    let generator = fx.generator(fx.config().build().unwrap(), converter.clone());

    let artifact = generator
        .generate("wolftax", &wolftax_request(OutputFormat::StructuredDocument))
        .await
        .unwrap();

    let id = &artifact.request_id;
    assert!(id.starts_with("oferta_"));
    assert_eq!(artifact.output_dir, fx.output_root().join(id));
    assert_eq!(artifact.primary_path, artifact.output_dir.join(format!("{id}.docx")));
    assert_eq!(
        artifact.byte_size,
        std::fs::metadata(&artifact.primary_path).unwrap().len()
    );
    assert_eq!(artifact.page_count, None);
    assert!(artifact.page_images.is_empty());
    assert_eq!(converter.calls.load(Ordering::SeqCst), 0);
    assert_eq!(Fixture::entries(&artifact.output_dir), vec![format!("{id}.docx")]);
    assert!(fx.no_leftovers());
}

#[tokio::test]
async fn image_set_of_three_pages_at_100_dpi() {
    let fx = Fixture::new();
    let generator = fx.generator(
        fx.config().dpi(100).build().unwrap(),
        Arc::new(FakeConverter::default()),
    );
    // Oferta head, P1, Oferta tail: two page breaks, three pages.
    let request = OfferRequest::new(OutputFormat::ImageSet)
        .with_placeholder("klient", "ACME")
        .with_product("P1.docx");

    let artifact = generator.generate("aidrops", &request).await.unwrap();

    let jpg = artifact.output_dir.join("jpg");
    assert_eq!(artifact.image_dir.as_deref(), Some(jpg.as_path()));
    assert_eq!(
        Fixture::entries(&jpg),
        vec!["page_1.jpg", "page_2.jpg", "page_3.jpg"]
    );
    assert_eq!(artifact.page_count, Some(3));
    assert_eq!(artifact.primary_path, jpg.join("page_1.jpg"));
    let total: u64 = artifact
        .page_images
        .iter()
        .map(|p| std::fs::metadata(p).unwrap().len())
        .sum();
    assert_eq!(artifact.byte_size, total);
    for (i, page) in artifact.page_images.iter().enumerate() {
        let img = image::open(page).unwrap();
        assert_eq!((img.width(), img.height()), (10, i as u32 + 1));
    }
    assert_eq!(Fixture::entries(&artifact.output_dir), vec!["jpg"]);
    assert!(fx.no_leftovers());
}

#[tokio::test]
async fn pdf_output_with_previews() {
    let fx = Fixture::new();
    let generator = fx.generator(
        fx.config().render_previews(true).build().unwrap(),
        Arc::new(FakeConverter::default()),
    );

    let artifact = generator
        .generate("wolftax", &wolftax_request(OutputFormat::FixedLayout))
        .await
        .unwrap();

    let id = &artifact.request_id;
    assert_eq!(artifact.primary_path, artifact.output_dir.join(format!("{id}.pdf")));
    assert!(std::fs::read(&artifact.primary_path).unwrap().starts_with(b"%PDF"));
    // 8 fragments → 7 page breaks → 8 pages.
    assert_eq!(artifact.page_count, Some(8));
    assert_eq!(
        Fixture::entries(&artifact.output_dir),
        vec![format!("{id}.pdf"), "jpg".to_string()]
    );
    assert!(fx.no_leftovers());
}

#[tokio::test]
async fn png_pages_in_custom_subfolder() {
    let fx = Fixture::new();
    let generator = fx.generator(
        fx.config()
            .image_format(offerdoc::ImageFormat::Png)
            .image_subfolder("strony")
            .build()
            .unwrap(),
        Arc::new(FakeConverter::default()),
    );
    let request = OfferRequest::new(OutputFormat::ImageSet).with_placeholder("klient", "ACME");

    let artifact = generator.generate("aidrops", &request).await.unwrap();
    assert_eq!(
        Fixture::entries(&artifact.output_dir.join("strony")),
        vec!["page_1.png"]
    );
}

// ── Failures and cleanup ─────────────────────────────────────────────────────

#[tokio::test]
async fn unknown_product_fails_validation_before_any_directory_exists() {
    let fx = Fixture::new();
    let converter = Arc::new(FakeConverter::default());
    let generator = fx.generator(fx.config().build().unwrap(), converter.clone());
    let request = wolftax_request(OutputFormat::ImageSet).with_product("P9.docx");

    let err = generator.generate("wolftax", &request).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(err.stage, Stage::Validated);
    assert!(matches!(err.source, OfferError::UnknownProduct { ref id, .. } if id == "P9.docx"));
    assert!(err.to_string().contains(&err.request_id));
    assert!(!fx.output_root().exists());
    assert!(!fx.work_root().exists());
    assert_eq!(converter.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn missing_required_placeholder_is_a_validation_error() {
    let fx = Fixture::new();
    let generator = fx.generator(fx.config().build().unwrap(), Arc::new(FakeConverter::default()));
    let request = OfferRequest::new(OutputFormat::StructuredDocument)
        .with_placeholder("klient", PlaceholderValue::Null);

    let err = generator.generate("wolftax", &request).await.unwrap_err();
    assert!(matches!(err.source, OfferError::MissingRequiredPlaceholder { ref name } if name == "klient"));
    assert!(!fx.output_root().exists());
}

#[tokio::test]
async fn value_holding_a_marker_is_rejected_before_any_directory_exists() {
    let fx = Fixture::new();
    let generator = fx.generator(fx.config().build().unwrap(), Arc::new(FakeConverter::default()));
    let request = wolftax_request(OutputFormat::StructuredDocument).with_placeholder("temat", "see {{klient}}");

    let err = generator.generate("wolftax", &request).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(matches!(err.source, OfferError::InvalidRequest(_)));
    assert!(!fx.output_root().exists());
}

#[tokio::test]
async fn multi_line_values_keep_their_line_breaks() {
    let fx = Fixture::new();
    let generator = fx.generator(fx.config().build().unwrap(), Arc::new(FakeConverter::default()));
    let request = OfferRequest::new(OutputFormat::StructuredDocument)
        .with_placeholder("klient", "ACME")
        .with_placeholder("opis", "Wdrożenie CRM\nSzkolenia");

    let artifact = generator.generate("aidrops", &request).await.unwrap();
    assert!(docx_texts(&artifact.primary_path).contains(&"Opis:\tWdrożenie CRM\nSzkolenia".to_string()));
}

#[tokio::test]
async fn converter_timeout_fails_and_cleans_up() {
    let fx = Fixture::new();
    let converter = Arc::new(FakeConverter::hanging(Duration::from_secs(30)));
    let generator = fx.generator(
        fx.config().converter_timeout_secs(1).build().unwrap(),
        converter.clone(),
    );

    let err = generator
        .generate("wolftax", &wolftax_request(OutputFormat::FixedLayout))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Conversion);
    assert_eq!(err.stage, Stage::Converting);
    assert!(err.source.is_retryable());
    assert!(matches!(err.source, OfferError::ConverterTimeout { secs: 1, .. }));
    assert_eq!(converter.calls.load(Ordering::SeqCst), 1);
    assert!(fx.no_leftovers());
    assert!(list_offers(&fx.output_root()).unwrap().is_empty());
}

#[tokio::test]
async fn dropped_request_leaves_nothing_behind() {
    let fx = Fixture::new();
    let generator = fx.generator(
        fx.config().build().unwrap(),
        Arc::new(FakeConverter::hanging(Duration::from_secs(30))),
    );
    let request = wolftax_request(OutputFormat::ImageSet);

    let aborted = tokio::time::timeout(
        Duration::from_millis(500),
        generator.generate("wolftax", &request),
    )
    .await;

    assert!(aborted.is_err());
    assert!(fx.no_leftovers());
    assert!(list_offers(&fx.output_root()).unwrap().is_empty());
}

// ── Lifecycle ────────────────────────────────────────────────────────────────

#[derive(Default)]
struct StageLog(Mutex<Vec<Stage>>);

impl OfferProgressCallback for StageLog {
    fn on_stage(&self, _request_id: &str, stage: Stage) {
        self.0.lock().unwrap().push(stage);
    }
}

#[tokio::test]
async fn stages_are_reported_in_pipeline_order() {
    let fx = Fixture::new();
    let log = Arc::new(StageLog::default());
    let generator = fx
        .generator(fx.config().build().unwrap(), Arc::new(FakeConverter::default()))
        .with_progress(log.clone());

    generator
        .generate("wolftax", &wolftax_request(OutputFormat::FixedLayout))
        .await
        .unwrap();

    assert_eq!(
        *log.0.lock().unwrap(),
        vec![
            Stage::Validated,
            Stage::Assembling,
            Stage::Assembled,
            Stage::Converting,
            Stage::Converted,
            Stage::Finalized,
        ]
    );
}

#[tokio::test]
async fn concurrent_requests_get_separate_folders() {
    let fx = Fixture::new();
    let generator = fx.generator(fx.config().build().unwrap(), Arc::new(FakeConverter::default()));
    let pdf = wolftax_request(OutputFormat::FixedLayout);
    let jpg = wolftax_request(OutputFormat::ImageSet);

    let (a, b) = tokio::join!(
        generator.generate("wolftax", &pdf),
        generator.generate("wolftax", &jpg)
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_ne!(a.request_id, b.request_id);
    let offers = list_offers(&fx.output_root()).unwrap();
    let mut names: Vec<_> = offers.iter().map(|o| o.name.clone()).collect();
    names.sort();
    let mut expected = vec![a.request_id.clone(), b.request_id.clone()];
    expected.sort();
    assert_eq!(names, expected);
    assert!(fx.no_leftovers());
}

// ── Library ──────────────────────────────────────────────────────────────────

#[test]
fn library_lists_products_and_health() {
    let fx = Fixture::new();
    let library = ContentLibrary::load(&fx.manifest()).unwrap();
    assert_eq!(library.product_ids(), vec!["P1.docx", "P2.docx", "P3.docx"]);

    let health = library.health();
    assert_eq!(health.status, "ok");
    assert_eq!(health.product_count, 3);
    let wolftax = health.families.iter().find(|f| f.name == "wolftax").unwrap();
    assert_eq!(wolftax.anchor, "TOC");
    assert_eq!(wolftax.fragments.len(), 6);
    assert!(wolftax.placeholders.contains(&"temat".to_string()));
}

#[test]
fn bad_anchor_fails_at_load_time() {
    let fx = Fixture::new();
    let manifest = fx.manifest();
    let text = std::fs::read_to_string(&manifest)
        .unwrap()
        .replace(r#""anchor": "TOC""#, r#""anchor": "Spis""#);
    std::fs::write(&manifest, text).unwrap();

    let err = ContentLibrary::load(&manifest).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(matches!(err, OfferError::AnchorNotFound { ref anchor, .. } if anchor == "Spis"));
}
