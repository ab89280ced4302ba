use pricewatch_common::Strategy;

/// One strategy's proposed price and stock reading, not yet accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub in_stock: Option<bool>,
    pub price_confidence: f64,
    pub stock_confidence: f64,
    pub strategy: Strategy,
}

impl Candidate {
    pub fn priced(price: f64, confidence: f64, strategy: Strategy) -> Self {
        Self {
            price: Some(price),
            currency: Some("EUR".to_string()),
            in_stock: None,
            price_confidence: confidence.clamp(0.0, 1.0),
            stock_confidence: 0.0,
            strategy,
        }
    }

    /// Candidate that only knows about stock.
    pub fn stock_only(in_stock: bool, confidence: f64, strategy: Strategy) -> Self {
        Self {
            price: None,
            currency: None,
            in_stock: Some(in_stock),
            price_confidence: 0.0,
            stock_confidence: confidence.clamp(0.0, 1.0),
            strategy,
        }
    }

    pub fn with_stock(mut self, in_stock: Option<bool>, confidence: f64) -> Self {
        self.in_stock = in_stock;
        self.stock_confidence = if in_stock.is_some() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }

    pub fn has_price(&self) -> bool {
        self.price.is_some()
    }
}

/// Everything a strategy may look at for one rendered page.
#[derive(Debug, Clone, Copy)]
pub struct PageContext<'a> {
    pub html: &'a str,
    pub domain: &'a str,
    /// Fixed price selector configured on the product.
    pub selector: Option<&'a str>,
}
