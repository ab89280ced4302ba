//! Extraction coordinator scenarios.
//!
//! Mock renderer and vision, real `MemoryStore`: every test drives one
//! attempt end to end and asserts on the result and the persisted product.

use pricewatch_common::{NotificationReason, Strategy, TrackedProduct};
use pricewatch_scout::pipeline::reconciler::KeepReason;
use pricewatch_scout::pipeline::vision::PROMPT_VERSION;
use pricewatch_scout::pipeline::{
    AvailabilityDecision, ExtractError, ExtractionCoordinator, ExtractionState,
};
use pricewatch_scout::service::{self, AvailabilityChange};
use pricewatch_scout::store::MemoryStore;
use pricewatch_scout::testing::*;
use pricewatch_scout::traits::ProductStore;

const URL: &str = "https://shop.example/p/bougies-24";

fn harness(renderer: MockRenderer, vision: MockVision, product: &TrackedProduct) -> Harness {
    Harness::new(renderer, vision, MemoryStore::new().with_product(product.clone()))
}

/// Every field an attempt may write, minus `last_error`.
fn durable_state(p: &TrackedProduct) -> TrackedProduct {
    TrackedProduct {
        last_error: None,
        ..p.clone()
    }
}

// ---------------------------------------------------------------------------
// Structured data
// ---------------------------------------------------------------------------

#[tokio::test]
async fn structured_price_is_final_without_vision() {
    let product = checked_product(URL, "Lot de 24 bougies blanches", 21.50, true);
    let h = harness(
        MockRenderer::new().on_page(URL, &jsonld_page("Lot de 24 bougies blanches", "19.99", "InStock")),
        MockVision::seeing(Some(18.00), Some(true)),
        &product,
    );
    let coordinator = ExtractionCoordinator::new(h.deps());

    let result = coordinator.extract(product.id, &settings_with_vision()).await.unwrap();

    assert_eq!(result.price, Some(19.99));
    assert_eq!(result.price_confidence, 1.0);
    assert_eq!(result.strategy, Strategy::Structured);
    assert_eq!(result.in_stock, Some(true));
    assert!(!result.vision_used);
    assert_eq!(h.vision.calls(), 0, "vision must not run when structured data exists");
    assert!(!result.states.contains(&ExtractionState::HeuristicCheck));

    let saved = h.store.snapshot(product.id).unwrap();
    assert_eq!(saved.current_price, Some(19.99));
    assert_eq!(saved.price_confidence, Some(1.0));
    assert_eq!(saved.currency.as_deref(), Some("EUR"));
    assert!(!saved.is_refreshing);
    assert!(saved.last_checked.is_some());
    assert_eq!(saved.last_error, None);
}

#[tokio::test]
async fn structured_price_survives_disagreeing_vision() {
    let product = checked_product(URL, "Lot de 24 bougies blanches", 19.99, true);
    let h = harness(
        MockRenderer::new().on_page(URL, &jsonld_page("Lot de 24 bougies blanches", "19.99", "InStock")),
        MockVision::seeing(Some(24.99), Some(true)),
        &product,
    );
    let mut settings = settings_with_vision();
    settings.vision_corroboration = true;

    let result = ExtractionCoordinator::new(h.deps())
        .extract(product.id, &settings)
        .await
        .unwrap();

    assert_eq!(h.vision.calls(), 1);
    assert_eq!(result.price, Some(19.99));
    assert_eq!(result.price_confidence, 1.0);
    assert_eq!(result.strategy, Strategy::Structured);
    assert!(result.warning.as_deref().unwrap().contains("24.99"));

    let saved = h.store.snapshot(product.id).unwrap();
    assert_eq!(saved.current_price, Some(19.99));
    assert!(saved.last_warning.is_some());
}

// ---------------------------------------------------------------------------
// Heuristic and vision
// ---------------------------------------------------------------------------

const UNIT_PRICE_PAGE: &str = "<p>Promo 0,99 €</p><button>Ajouter au panier</button>";

#[tokio::test]
async fn vision_overrides_low_confidence_heuristic() {
    let product = checked_product(URL, "Yaourts nature x12", 1.30, true);
    let h = harness(
        MockRenderer::new().on_page(URL, &plain_page("Yaourts nature x12", UNIT_PRICE_PAGE)),
        MockVision::seeing(Some(1.27), Some(true)),
        &product,
    );
    let settings = settings_with_vision();

    let result = ExtractionCoordinator::new(h.deps())
        .extract(product.id, &settings)
        .await
        .unwrap();

    assert_eq!(result.price, Some(1.27));
    assert_eq!(result.strategy, Strategy::Vision);
    assert!(result.vision_used);
    assert_eq!(
        result.states,
        vec![
            ExtractionState::Idle,
            ExtractionState::Rendering,
            ExtractionState::StructuredCheck,
            ExtractionState::HeuristicCheck,
            ExtractionState::VisionCheck,
            ExtractionState::Reconciling,
            ExtractionState::Done,
        ]
    );

    let history = h.store.history(product.id).await.unwrap();
    assert_eq!(history.len(), 1);
    let entry = &history[0];
    assert_eq!(entry.price, 1.27);
    assert_eq!(entry.strategy, Strategy::Vision);
    assert_eq!(entry.ai_provider.as_deref(), Some("openai"));
    assert_eq!(
        entry.ai_model.as_deref(),
        settings.vision.as_ref().map(|v| v.model.as_str())
    );
    assert_eq!(entry.prompt_version.as_deref(), Some(PROMPT_VERSION));
}

#[tokio::test]
async fn vision_wins_over_confident_heuristic_when_corroborating() {
    let product = checked_product(URL, "Café moulu 1kg", 12.00, true);
    let h = harness(
        MockRenderer::new().on_page(
            URL,
            &plain_page("Café moulu 1kg", r#"<div class="product-price">12,49 €</div>"#),
        ),
        MockVision::seeing(Some(11.99), None),
        &product,
    );
    let mut settings = settings_with_vision();
    settings.vision_corroboration = true;

    let result = ExtractionCoordinator::new(h.deps())
        .extract(product.id, &settings)
        .await
        .unwrap();

    assert_eq!(h.vision.calls(), 1);
    assert_eq!(result.price, Some(11.99));
    assert_eq!(result.strategy, Strategy::Vision);
}

#[tokio::test]
async fn confident_heuristic_skips_vision() {
    let product = checked_product(URL, "Café moulu 1kg", 12.00, true);
    let h = harness(
        MockRenderer::new().on_page(
            URL,
            &plain_page("Café moulu 1kg", r#"<div class="product-price">12,49 €</div>"#),
        ),
        MockVision::seeing(Some(11.99), None),
        &product,
    );

    let result = ExtractionCoordinator::new(h.deps())
        .extract(product.id, &settings_with_vision())
        .await
        .unwrap();

    assert_eq!(h.vision.calls(), 0);
    assert_eq!(result.price, Some(12.49));
    assert_eq!(result.strategy, Strategy::KeywordRegex);
    assert_eq!(result.price_confidence, 0.6);
}

#[tokio::test]
async fn failed_vision_falls_back_to_heuristic() {
    let product = checked_product(URL, "Yaourts nature x12", 1.00, true);
    let h = harness(
        MockRenderer::new().on_page(URL, &plain_page("Yaourts nature x12", UNIT_PRICE_PAGE)),
        MockVision::failing(VisionFailure::Timeout),
        &product,
    );

    let result = ExtractionCoordinator::new(h.deps())
        .extract(product.id, &settings_with_vision())
        .await
        .unwrap();

    assert_eq!(h.vision.calls(), 1);
    assert!(!result.vision_used);
    assert!(result.states.contains(&ExtractionState::VisionCheck));
    assert_eq!(result.price, Some(0.99));
    assert_eq!(result.strategy, Strategy::NearbyFallback);
    assert_eq!(result.price_confidence, 0.3);

    let history = h.store.history(product.id).await.unwrap();
    assert_eq!(history[0].ai_provider, None);
    assert_eq!(history[0].prompt_version, None);
}

#[tokio::test]
async fn text_context_is_forwarded_to_vision() {
    let product = checked_product(URL, "Yaourts nature x12", 1.30, true);
    let h = harness(
        MockRenderer::new().on_page(URL, &plain_page("Yaourts nature x12", UNIT_PRICE_PAGE)),
        MockVision::seeing(Some(1.27), Some(true)),
        &product,
    );
    let mut settings = settings_with_vision();
    settings.text_context_enabled = true;

    ExtractionCoordinator::new(h.deps())
        .extract(product.id, &settings)
        .await
        .unwrap();

    let contexts = h.vision.contexts();
    assert_eq!(contexts.len(), 1);
    assert!(contexts[0].as_deref().unwrap().contains("Ajouter au panier"));
}

#[tokio::test]
async fn large_move_on_weak_evidence_is_flagged() {
    let product = checked_product(URL, "Café moulu 1kg", 10.00, true);
    let h = harness(
        MockRenderer::new().on_page(
            URL,
            &plain_page("Café moulu 1kg", r#"<div class="price">15,00 €</div>"#),
        ),
        MockVision::seeing(None, None),
        &product,
    );

    let result = ExtractionCoordinator::new(h.deps())
        .extract(product.id, &settings_without_vision())
        .await
        .unwrap();

    assert_eq!(result.price, Some(15.0));
    let warning = result.warning.unwrap();
    assert!(warning.starts_with("Uncertain:"), "{warning}");
    assert_eq!(
        h.store.snapshot(product.id).unwrap().last_warning.as_deref(),
        Some(warning.as_str())
    );
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn render_timeout_keeps_last_known_good_state() {
    let mut product = checked_product(URL, "Lot de 24 bougies blanches", 14.50, true);
    product.last_checked = Some(chrono::Utc::now() - chrono::Duration::hours(2));
    let h = harness(
        MockRenderer::new().on_failure(URL, RenderFailure::Timeout),
        MockVision::seeing(Some(1.0), None),
        &product,
    );

    let err = ExtractionCoordinator::new(h.deps())
        .extract(product.id, &settings_with_vision())
        .await
        .unwrap_err();
    assert!(matches!(err, ExtractError::Render(_)), "{err:?}");

    let saved = h.store.snapshot(product.id).unwrap();
    assert_eq!(saved.current_price, Some(14.50));
    assert!(!saved.is_refreshing);
    assert!(saved.last_error.as_deref().unwrap().contains("Render failed"));
    assert_eq!(durable_state(&saved), durable_state(&product));
    assert_eq!(h.vision.calls(), 0);
    assert_eq!(h.store.history_len(), 0);
}

#[tokio::test]
async fn page_without_any_reading_preserves_state() {
    let mut product = checked_product(URL, "Lot de 24 bougies blanches", 14.50, false);
    product.is_available = false;
    let h = harness(
        MockRenderer::new().on_page(
            URL,
            &plain_page("Lot de 24 bougies blanches", "<p>Découvrez notre sélection.</p>"),
        ),
        MockVision::seeing(None, None),
        &product,
    );

    let err = ExtractionCoordinator::new(h.deps())
        .extract(product.id, &settings_without_vision())
        .await
        .unwrap_err();
    assert!(matches!(err, ExtractError::Extraction));

    let saved = h.store.snapshot(product.id).unwrap();
    assert!(saved.last_error.is_some());
    assert_eq!(durable_state(&saved), durable_state(&product));
}

#[tokio::test]
async fn failed_vision_without_fallback_fails_the_attempt() {
    for failure in [VisionFailure::Unparsable, VisionFailure::Provider] {
        let product = checked_product(URL, "Lot de 24 bougies blanches", 14.50, true);
        let h = harness(
            MockRenderer::new().on_page(
                URL,
                &plain_page("Lot de 24 bougies blanches", "<p>Découvrez notre sélection.</p>"),
            ),
            MockVision::failing(failure),
            &product,
        );

        let err = ExtractionCoordinator::new(h.deps())
            .extract(product.id, &settings_with_vision())
            .await
            .unwrap_err();

        assert!(matches!(err, ExtractError::Extraction), "{err:?}");
        assert_eq!(h.vision.calls(), 1);
        let saved = h.store.snapshot(product.id).unwrap();
        assert!(saved.last_error.is_some());
        assert_eq!(durable_state(&saved), durable_state(&product));
        assert_eq!(h.store.history_len(), 0);
    }
}

#[tokio::test]
async fn navigation_failure_releases_flag() {
    let product = checked_product(URL, "Lot de 24 bougies blanches", 14.50, true);
    let h = harness(
        MockRenderer::new().on_failure(URL, RenderFailure::Navigation),
        MockVision::seeing(None, None),
        &product,
    );
    let coordinator = ExtractionCoordinator::new(h.deps());

    assert!(coordinator.extract(product.id, &settings_without_vision()).await.is_err());
    // Flag released, so a second attempt is not rejected as busy.
    let second = coordinator.extract(product.id, &settings_without_vision()).await;
    assert!(matches!(second, Err(ExtractError::Render(_))));
    assert_eq!(h.renderer.calls(), 2);
}

// ---------------------------------------------------------------------------
// Mutual exclusion
// ---------------------------------------------------------------------------

#[tokio::test]
async fn busy_product_is_rejected_untouched() {
    let mut product = checked_product(URL, "Lot de 24 bougies blanches", 14.50, true);
    product.is_refreshing = true;
    let h = harness(
        MockRenderer::new().on_page(URL, &jsonld_page("Lot de 24 bougies blanches", "9.99", "InStock")),
        MockVision::seeing(None, None),
        &product,
    );

    let err = ExtractionCoordinator::new(h.deps())
        .extract(product.id, &settings_without_vision())
        .await
        .unwrap_err();

    assert!(matches!(err, ExtractError::AlreadyRefreshing(id) if id == product.id));
    assert_eq!(h.store.snapshot(product.id).unwrap(), product);
    assert_eq!(h.renderer.calls(), 0);
}

#[tokio::test]
async fn unknown_product_is_not_found() {
    let h = Harness::new(MockRenderer::new(), MockVision::seeing(None, None), MemoryStore::new());
    let id = uuid::Uuid::new_v4();

    let err = ExtractionCoordinator::new(h.deps())
        .extract(id, &settings_without_vision())
        .await
        .unwrap_err();
    assert!(matches!(err, ExtractError::NotFound(_)));
}

// ---------------------------------------------------------------------------
// Availability
// ---------------------------------------------------------------------------

#[tokio::test]
async fn price_read_marks_available_again() {
    let mut product = checked_product(URL, "Lot de 24 bougies blanches", 14.50, false);
    product.is_available = false;
    let h = harness(
        MockRenderer::new().on_page(URL, &jsonld_page("Lot de 24 bougies blanches", "14.50", "InStock")),
        MockVision::seeing(None, None),
        &product,
    );

    let result = ExtractionCoordinator::new(h.deps())
        .extract(product.id, &settings_without_vision())
        .await
        .unwrap();

    assert_eq!(result.availability, AvailabilityDecision::MarkAvailable);
    assert!(h.store.snapshot(product.id).unwrap().is_available);
}

#[tokio::test]
async fn same_title_without_price_keeps_availability() {
    for was_available in [true, false] {
        let mut product = checked_product(URL, "Lot de 24 bougies blanches", 14.50, true);
        product.is_available = was_available;
        let h = harness(
            MockRenderer::new().on_page(
                URL,
                &plain_page("Lot de 24 bougies blanches", "<p>Rupture de stock</p>"),
            ),
            MockVision::seeing(None, None),
            &product,
        );

        let result = ExtractionCoordinator::new(h.deps())
            .extract(product.id, &settings_without_vision())
            .await
            .unwrap();

        assert!(matches!(
            result.availability,
            AvailabilityDecision::Unchanged(KeepReason::SameProduct { .. })
        ));
        let saved = h.store.snapshot(product.id).unwrap();
        assert_eq!(saved.is_available, was_available);
        assert_eq!(saved.current_price, Some(14.50));
        assert_eq!(saved.in_stock, Some(false));
        assert_eq!(h.store.history_len(), 0);
    }
}

#[tokio::test]
async fn different_title_without_price_marks_unavailable() {
    let product = checked_product(URL, "Lot de 24 bougies blanches", 14.50, true);
    let h = harness(
        MockRenderer::new().on_page(
            URL,
            &plain_page("Nouvelle collection printemps", "<p>Article indisponible</p>"),
        ),
        MockVision::seeing(None, None),
        &product,
    );

    let result = ExtractionCoordinator::new(h.deps())
        .extract(product.id, &settings_without_vision())
        .await
        .unwrap();

    assert!(matches!(
        result.availability,
        AvailabilityDecision::MarkUnavailable { .. }
    ));
    assert!(!h.store.snapshot(product.id).unwrap().is_available);
}

#[tokio::test]
async fn bot_challenge_title_is_ignored() {
    let product = checked_product(URL, "Lot de 24 bougies blanches", 14.50, true);
    let h = harness(
        MockRenderer::new().on_page(
            URL,
            &plain_page("Amazon.fr - Toutes nos excuses", "<p>Produit indisponible</p>"),
        ),
        MockVision::seeing(None, None),
        &product,
    );

    let result = ExtractionCoordinator::new(h.deps())
        .extract(product.id, &settings_without_vision())
        .await
        .unwrap();

    assert_eq!(
        result.availability,
        AvailabilityDecision::Unchanged(KeepReason::PlaceholderTitle)
    );
    let saved = h.store.snapshot(product.id).unwrap();
    assert!(saved.is_available);
    assert_eq!(saved.reference_title.as_deref(), Some("Lot de 24 bougies blanches"));
}

#[tokio::test]
async fn placeholder_title_never_becomes_reference() {
    let product = checked_product(URL, "Lot de 24 bougies blanches", 14.50, true);
    let h = harness(
        MockRenderer::new().on_page(URL, &jsonld_page("Just a moment...", "13.90", "InStock")),
        MockVision::seeing(None, None),
        &product,
    );

    ExtractionCoordinator::new(h.deps())
        .extract(product.id, &settings_without_vision())
        .await
        .unwrap();

    let saved = h.store.snapshot(product.id).unwrap();
    assert_eq!(saved.current_price, Some(13.90));
    assert_eq!(saved.reference_title.as_deref(), Some("Lot de 24 bougies blanches"));
}

#[tokio::test]
async fn manual_override_during_attempt_is_applied_last() {
    let product = checked_product(URL, "Lot de 24 bougies blanches", 14.50, true);
    let h = harness(
        MockRenderer::new().on_page(URL, &jsonld_page("Lot de 24 bougies blanches", "14.50", "InStock")),
        MockVision::seeing(None, None),
        &product,
    );
    let coordinator = ExtractionCoordinator::new(h.deps());

    let claimed = coordinator.claim(product.id).await.unwrap();
    let change = service::set_availability(h.store.as_ref(), product.id, false)
        .await
        .unwrap();
    assert_eq!(change, AvailabilityChange::Deferred);

    let result = coordinator
        .run_claimed(claimed, &settings_without_vision())
        .await
        .unwrap();
    assert_eq!(result.availability, AvailabilityDecision::MarkAvailable);

    let saved = h.store.snapshot(product.id).unwrap();
    assert!(!saved.is_available, "manual value must win over the attempt");
    assert_eq!(saved.availability_override, None);
    assert!(!saved.is_refreshing);
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

#[tokio::test]
async fn target_price_reached_notifies_once() {
    let mut product = checked_product(URL, "Lot de 24 bougies blanches", 20.00, true);
    product.target_price = Some(15.00);
    let h = harness(
        MockRenderer::new().on_page(URL, &jsonld_page("Lot de 24 bougies blanches", "14.99", "InStock")),
        MockVision::seeing(None, None),
        &product,
    );
    let coordinator = ExtractionCoordinator::new(h.deps());

    coordinator.extract(product.id, &settings_without_vision()).await.unwrap();
    let events = h.notifier.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].reason, NotificationReason::TargetReached { target: 15.00 });
    assert_eq!(events[0].old_price, Some(20.00));
    assert_eq!(events[0].new_price, Some(14.99));

    // Still under target on the next read: no repeat.
    coordinator.extract(product.id, &settings_without_vision()).await.unwrap();
    assert_eq!(h.notifier.events().len(), 1);
}

#[tokio::test]
async fn price_drop_and_restock_notify() {
    let product = checked_product(URL, "Lot de 24 bougies blanches", 20.00, false);
    let h = harness(
        MockRenderer::new().on_page(URL, &jsonld_page("Lot de 24 bougies blanches", "18.00", "InStock")),
        MockVision::seeing(None, None),
        &product,
    );

    let result = ExtractionCoordinator::new(h.deps())
        .extract(product.id, &settings_without_vision())
        .await
        .unwrap();

    let reasons: Vec<_> = result.notifications.iter().map(|e| e.reason.clone()).collect();
    assert_eq!(
        reasons,
        vec![
            NotificationReason::PriceDrop { percent: 10.0 },
            NotificationReason::BackInStock,
        ]
    );
    assert_eq!(h.notifier.events().len(), 2);
}

#[tokio::test]
async fn small_move_is_silent() {
    let product = checked_product(URL, "Lot de 24 bougies blanches", 20.00, true);
    let h = harness(
        MockRenderer::new().on_page(URL, &jsonld_page("Lot de 24 bougies blanches", "19.50", "InStock")),
        MockVision::seeing(None, None),
        &product,
    );

    let result = ExtractionCoordinator::new(h.deps())
        .extract(product.id, &settings_without_vision())
        .await
        .unwrap();

    assert!(result.notifications.is_empty());
    assert!(h.notifier.events().is_empty());
}

// ---------------------------------------------------------------------------
// Rendering options
// ---------------------------------------------------------------------------

#[tokio::test]
async fn tracking_parameters_are_stripped_before_rendering() {
    let product = product(
        "https://shop.example/p/bougies-24?utm_source=newsletter&color=blanc#avis",
        "Lot de 24 bougies blanches",
    );
    let h = harness(
        MockRenderer::new().on_page(
            "https://shop.example/p/bougies-24?color=blanc",
            &jsonld_page("Lot de 24 bougies blanches", "14.50", "InStock"),
        ),
        MockVision::seeing(None, None),
        &product,
    );
    let mut settings = settings_without_vision();
    settings.smart_scroll_enabled = true;

    let result = ExtractionCoordinator::new(h.deps())
        .extract(product.id, &settings)
        .await
        .unwrap();

    assert_eq!(result.price, Some(14.50));
    let options = h.renderer.last_options().unwrap();
    assert_eq!(options.timeout_ms, settings.scraper_timeout_ms);
    assert!(options.smart_scroll_enabled);
    assert_eq!(
        h.store.snapshot(product.id).unwrap().reference_title.as_deref(),
        Some("Lot de 24 bougies blanches")
    );
}
