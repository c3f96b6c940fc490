use std::panic::{self, AssertUnwindSafe};
use tokio::task::JoinSet;
use tracing::warn;

use crate::normalizer::{NormalizeError, NormalizedReceipt, ReceiptNormalizer};

/// One receipt of an invoice's receipt set.
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub data: Vec<u8>,
    pub content_type: String,
    pub name: String,
}

impl BatchItem {
    pub fn new(data: Vec<u8>, content_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self { data, content_type: content_type.into(), name: name.into() }
    }
}

/// One entry of a flattened batch result.
#[derive(Debug)]
pub enum BatchOutcome {
    Normalized(NormalizedReceipt),
    /// Stands at the position of the input item that failed.
    Failed { index: usize, name: String, error: NormalizeError },
}

impl BatchOutcome {
    pub fn receipt(&self) -> Option<&NormalizedReceipt> {
        match self {
            BatchOutcome::Normalized(receipt) => Some(receipt),
            BatchOutcome::Failed { .. } => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, BatchOutcome::Failed { .. })
    }
}

type ItemResult = Result<Vec<NormalizedReceipt>, NormalizeError>;

impl ReceiptNormalizer {
    /// Normalize every item concurrently on the blocking pool.
    ///
    /// Each item's outcome is captured independently and the results are
    /// flattened in input order. Dropping the returned future aborts work
    /// that has not started yet.
    pub async fn normalize_batch(&self, items: Vec<BatchItem>) -> Vec<BatchOutcome> {
        let names: Vec<String> = items.iter().map(|item| item.name.clone()).collect();
        let mut slots: Vec<Option<ItemResult>> = (0..items.len()).map(|_| None).collect();

        let mut tasks = JoinSet::new();
        for (index, item) in items.into_iter().enumerate() {
            let normalizer = self.clone();
            tasks.spawn_blocking(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    normalizer.normalize_to_data_urls(&item.data, &item.content_type, &item.name)
                }))
                .unwrap_or_else(|_| {
                    Err(NormalizeError::Interrupted {
                        name: item.name.clone(),
                        reason: "normalizer panicked".to_string(),
                    })
                });
                (index, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => warn!(error = %e, "receipt normalization task was cancelled"),
            }
        }

        let mut outcomes = Vec::with_capacity(slots.len());
        for (index, (slot, name)) in slots.into_iter().zip(names).enumerate() {
            let result = slot.unwrap_or_else(|| {
                Err(NormalizeError::Interrupted {
                    name: name.clone(),
                    reason: "task did not complete".to_string(),
                })
            });
            match result {
                Ok(receipts) => outcomes.extend(receipts.into_iter().map(BatchOutcome::Normalized)),
                Err(error) => {
                    warn!(index, receipt = %name, error = %error, "receipt could not be normalized");
                    outcomes.push(BatchOutcome::Failed { index, name, error });
                }
            }
        }
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::NullRasterizer;
    use ledgerdocs_core::NormalizerConfig;
    use std::sync::Arc;

    fn normalizer() -> ReceiptNormalizer {
        ReceiptNormalizer::with_rasterizer(NormalizerConfig::default(), Arc::new(NullRasterizer))
    }

    #[tokio::test]
    async fn empty_batch_is_empty() {
        assert!(normalizer().normalize_batch(vec![]).await.is_empty());
    }

    #[tokio::test]
    async fn failures_stay_in_position() {
        let items = vec![
            BatchItem::new(b"first".to_vec(), "text/plain", "a.txt"),
            BatchItem::new(b"garbage".to_vec(), "image/jpeg", "b.jpg"),
            BatchItem::new(b"%PDF".to_vec(), "application/pdf", "c.pdf"),
        ];
        let outcomes = normalizer().normalize_batch(items).await;
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].receipt().unwrap().original_name, "a.txt");
        match &outcomes[1] {
            BatchOutcome::Failed { index, name, error } => {
                assert_eq!(*index, 1);
                assert_eq!(name, "b.jpg");
                assert!(matches!(error, NormalizeError::Decode { .. }));
            }
            other => panic!("expected failure marker, got {other:?}"),
        }
        assert_eq!(outcomes[2].receipt().unwrap().original_name, "c.pdf");
    }
}
