pub mod json_file;
pub mod memory;

pub use json_file::JsonFileStore;
pub use memory::MemoryStore;

use pricewatch_common::TrackedProduct;

use crate::traits::RefreshClaim;

/// Claim decision shared by every store: flip the flag if it is clear.
fn claim(product: Option<&mut TrackedProduct>) -> RefreshClaim {
    match product {
        None => RefreshClaim::NotFound,
        Some(p) if p.is_refreshing => RefreshClaim::AlreadyRefreshing,
        Some(p) => {
            p.is_refreshing = true;
            RefreshClaim::Claimed(p.clone())
        }
    }
}

/// Clear every in-flight flag, returning how many were set.
fn clear_flags<'a>(products: impl Iterator<Item = &'a mut TrackedProduct>) -> usize {
    products
        .filter(|p| p.is_refreshing)
        .map(|p| p.is_refreshing = false)
        .count()
}
