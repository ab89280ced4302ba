// Choosing the final candidate once every stage has run.
//
// Structured data is authoritative for price. Otherwise a successful vision
// read wins over any heuristic guess, and a failed vision call falls back to
// the heuristic candidate with its own confidence.

use pricewatch_common::ExtractionSettings;

use super::candidate::Candidate;

/// Two prices closer than this are the same price.
const PRICE_EPSILON: f64 = 0.005;

#[derive(Debug, Clone, PartialEq)]
pub enum VisionStage {
    Skipped,
    Unavailable(String),
    Ran(Candidate),
}

impl VisionStage {
    pub fn ran(&self) -> bool {
        matches!(self, VisionStage::Ran(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Arbitration {
    pub chosen: Option<Candidate>,
    pub warning: Option<String>,
}

/// Whether the vision stage should run for this page.
pub fn needs_vision(
    structured: Option<&Candidate>,
    heuristic: Option<&Candidate>,
    settings: &ExtractionSettings,
) -> bool {
    if settings.vision.is_none() {
        return false;
    }
    if structured.is_some() {
        return settings.vision_corroboration;
    }
    match heuristic {
        Some(c) if c.has_price() && c.price_confidence >= settings.price_confidence_threshold => {
            settings.vision_corroboration
        }
        _ => true,
    }
}

pub fn arbitrate(
    structured: Option<Candidate>,
    heuristic: Option<Candidate>,
    vision: VisionStage,
) -> Arbitration {
    if let Some(mut chosen) = structured {
        let mut warning = None;
        if let VisionStage::Ran(seen) = vision {
            if let (Some(a), Some(b)) = (chosen.price, seen.price) {
                if (a - b).abs() > PRICE_EPSILON {
                    warning = Some(format!(
                        "Vision read {b:.2} but structured data says {a:.2}"
                    ));
                }
            }
            if chosen.in_stock.is_none() && seen.in_stock.is_some() {
                chosen.in_stock = seen.in_stock;
                chosen.stock_confidence = seen.stock_confidence;
            }
        }
        return Arbitration {
            chosen: Some(chosen),
            warning,
        };
    }

    let chosen = match vision {
        VisionStage::Ran(mut seen) => match heuristic {
            Some(guess) if seen.price.is_none() && guess.has_price() => {
                let mut kept = guess;
                if seen.in_stock.is_some() {
                    kept.in_stock = seen.in_stock;
                    kept.stock_confidence = seen.stock_confidence;
                }
                Some(kept)
            }
            Some(guess) => {
                if seen.in_stock.is_none() && guess.in_stock.is_some() {
                    seen.in_stock = guess.in_stock;
                    seen.stock_confidence = guess.stock_confidence;
                }
                Some(seen)
            }
            None => Some(seen),
        },
        VisionStage::Skipped | VisionStage::Unavailable(_) => heuristic,
    };

    Arbitration {
        chosen,
        warning: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pricewatch_common::{Strategy, VisionConfig, VisionProvider};

    fn settings(vision: bool, corroborate: bool) -> ExtractionSettings {
        ExtractionSettings {
            vision: vision.then(|| VisionConfig::new(VisionProvider::Ollama)),
            vision_corroboration: corroborate,
            ..ExtractionSettings::default()
        }
    }

    fn vision(price: Option<f64>, stock: Option<bool>) -> Candidate {
        Candidate {
            price,
            currency: Some("EUR".into()),
            in_stock: stock,
            price_confidence: 0.9,
            stock_confidence: if stock.is_some() { 0.8 } else { 0.0 },
            strategy: Strategy::Vision,
        }
    }

    #[test]
    fn confident_heuristic_skips_vision_unless_corroborating() {
        let h = Candidate::priced(12.0, 0.8, Strategy::Microdata);
        assert!(!needs_vision(None, Some(&h), &settings(true, false)));
        assert!(needs_vision(None, Some(&h), &settings(true, true)));

        let weak = Candidate::priced(12.0, 0.3, Strategy::NearbyFallback);
        assert!(needs_vision(None, Some(&weak), &settings(true, false)));
        assert!(needs_vision(None, None, &settings(true, false)));
        assert!(!needs_vision(None, None, &settings(false, true)));
    }

    #[test]
    fn structured_skips_vision_by_default() {
        let s = Candidate::priced(19.99, 1.0, Strategy::Structured);
        assert!(!needs_vision(Some(&s), None, &settings(true, false)));
        assert!(needs_vision(Some(&s), None, &settings(true, true)));
    }

    #[test]
    fn vision_beats_heuristic_on_conflict() {
        let h = Candidate::priced(0.99, 0.3, Strategy::NearbyFallback);
        let out = arbitrate(None, Some(h), VisionStage::Ran(vision(Some(1.27), None)));
        let c = out.chosen.unwrap();
        assert_eq!(c.price, Some(1.27));
        assert_eq!(c.strategy, Strategy::Vision);
    }

    #[test]
    fn structured_price_kept_and_disagreement_flagged() {
        let s = Candidate::priced(19.99, 1.0, Strategy::Structured);
        let out = arbitrate(Some(s), None, VisionStage::Ran(vision(Some(24.99), Some(true))));
        let c = out.chosen.unwrap();
        assert_eq!(c.price, Some(19.99));
        assert_eq!(c.price_confidence, 1.0);
        assert_eq!(c.in_stock, Some(true));
        assert!(out.warning.unwrap().contains("24.99"));
    }

    #[test]
    fn failed_vision_falls_back_with_confidence() {
        let h = Candidate::priced(4.5, 0.3, Strategy::NearbyFallback);
        let out = arbitrate(None, Some(h.clone()), VisionStage::Unavailable("timeout".into()));
        assert_eq!(out.chosen, Some(h));
    }

    #[test]
    fn priceless_vision_keeps_heuristic_price() {
        let h = Candidate::priced(4.5, 0.3, Strategy::KeywordRegex);
        let out = arbitrate(None, Some(h), VisionStage::Ran(vision(None, Some(false))));
        let c = out.chosen.unwrap();
        assert_eq!(c.price, Some(4.5));
        assert_eq!(c.strategy, Strategy::KeywordRegex);
        assert_eq!(c.in_stock, Some(false));
    }
}
