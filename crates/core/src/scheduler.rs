//! Vocabulary Scheduler
//!
//! Picks the words a lesson teaches (the unit's own list) and the words it
//! reviews (samples from earlier units at graduated look-back intervals).
//! No per-word history is kept: spacing comes from the fixed offsets alone.

use crate::{
    curriculum::{CurriculumStore, UnitDefinition, VocabularyItem},
    language::Language,
};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, sync::Arc};
use tracing::{debug, warn};

/// How many units back each review slice is drawn from.
pub const LOOKBACK_OFFSETS: [u32; 4] = [1, 2, 5, 10];
/// Upper bound on review words per lesson.
pub const REVIEW_CAP: usize = 8;
/// Offsets beyond this contribute half as many words.
const OLDER_OFFSET_THRESHOLD: u32 = 5;

/// A review word together with the unit it was drawn from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewWord {
    pub item: VocabularyItem,
    pub from_unit: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduledVocabulary {
    pub new: Vec<VocabularyItem>,
    pub review: Vec<ReviewWord>,
}

impl ScheduledVocabulary {
    /// Units that contributed at least one review word, in draw order.
    pub fn reviewed_units(&self) -> Vec<u32> {
        let mut units = Vec::new();
        for word in &self.review {
            if !units.contains(&word.from_unit) {
                units.push(word.from_unit);
            }
        }
        units
    }
}

pub struct VocabularyScheduler {
    curriculum: Arc<dyn CurriculumStore>,
}

impl VocabularyScheduler {
    pub fn new(curriculum: Arc<dyn CurriculumStore>) -> Self {
        Self { curriculum }
    }

    /// Schedules vocabulary for a unit, loading it from the curriculum.
    ///
    /// A unit with no curriculum data yields no new words; review sampling
    /// still runs.
    pub async fn schedule(
        &self,
        language: Language,
        level: u32,
        unit: u32,
    ) -> Result<ScheduledVocabulary> {
        let new = self
            .curriculum
            .unit(language, level, unit)
            .await?
            .map(|u| u.vocabulary)
            .unwrap_or_default();
        let review = self.review_words(language, level, unit, &new).await;
        Ok(ScheduledVocabulary { new, review })
    }

    /// Schedules vocabulary for an already loaded unit.
    pub async fn schedule_for(&self, unit: &UnitDefinition) -> ScheduledVocabulary {
        let new = unit.vocabulary.clone();
        let review = self
            .review_words(unit.language, unit.level, unit.unit, &new)
            .await;
        ScheduledVocabulary { new, review }
    }

    async fn review_words(
        &self,
        language: Language,
        level: u32,
        unit: u32,
        new: &[VocabularyItem],
    ) -> Vec<ReviewWord> {
        let mut sources: Vec<(u32, UnitDefinition)> = Vec::new();
        for offset in LOOKBACK_OFFSETS {
            let Some(target) = unit.checked_sub(offset).filter(|u| *u >= 1) else {
                continue;
            };
            match self.curriculum.unit(language, level, target).await {
                Ok(Some(def)) if !def.vocabulary.is_empty() => sources.push((offset, def)),
                Ok(_) => debug!(%language, level, unit = target, "No review data, skipping"),
                Err(e) => warn!(%language, level, unit = target, error = ?e, "Review unit unreadable, skipping"),
            }
        }
        if sources.is_empty() {
            return Vec::new();
        }

        let base_share = REVIEW_CAP.div_ceil(sources.len());
        let mut seen: HashSet<String> = new.iter().map(|w| w.target.to_lowercase()).collect();
        let mut review = Vec::new();

        for (offset, def) in sources {
            if review.len() >= REVIEW_CAP {
                break;
            }
            let share = if offset > OLDER_OFFSET_THRESHOLD {
                (base_share / 2).max(1)
            } else {
                base_share
            };
            let take = share.min(REVIEW_CAP - review.len());
            for item in strided_sample(&def.vocabulary, take) {
                if seen.insert(item.target.to_lowercase()) {
                    review.push(ReviewWord {
                        item: item.clone(),
                        from_unit: def.unit,
                    });
                }
            }
        }
        review
    }
}

/// Picks `take` items spread evenly across `words`, not just its head.
fn strided_sample<T>(words: &[T], take: usize) -> impl Iterator<Item = &T> {
    let len = words.len();
    let take = take.min(len);
    (0..take).map(move |k| &words[k * len / take])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curriculum::{MemoryCurriculumStore, fixtures::unit_with_words};

    fn scheduler(units: Vec<UnitDefinition>) -> VocabularyScheduler {
        VocabularyScheduler::new(Arc::new(MemoryCurriculumStore::new(units)))
    }

    #[test]
    fn test_strided_sample_spreads_across_list() {
        let words: Vec<u32> = (0..10).collect();
        let picked: Vec<u32> = strided_sample(&words, 8).copied().collect();
        assert_eq!(picked, vec![0, 1, 2, 3, 5, 6, 7, 8]);

        let picked: Vec<u32> = strided_sample(&words, 2).copied().collect();
        assert_eq!(picked, vec![0, 5]);

        let picked: Vec<u32> = strided_sample(&words[..3], 8).copied().collect();
        assert_eq!(picked, vec![0, 1, 2]);
        assert_eq!(strided_sample::<u32>(&[], 4).count(), 0);
    }

    #[tokio::test]
    async fn test_unit_one_has_no_review() {
        let s = scheduler(vec![unit_with_words(Language::Spanish, 1, 1, "a", 6)]);
        let scheduled = s.schedule(Language::Spanish, 1, 1).await.unwrap();
        assert_eq!(scheduled.new.len(), 6);
        assert!(scheduled.review.is_empty());
    }

    #[tokio::test]
    async fn test_unit_five_reviews_only_unit_four() {
        // Units 3 and 1 have no data; only offset 1 is usable.
        let s = scheduler(vec![
            unit_with_words(Language::Spanish, 1, 5, "new", 15),
            unit_with_words(Language::Spanish, 1, 4, "old", 10),
        ]);
        let scheduled = s.schedule(Language::Spanish, 1, 5).await.unwrap();

        assert_eq!(scheduled.new.len(), 15);
        assert_eq!(scheduled.review.len(), 8);
        assert!(scheduled.review.iter().all(|w| w.from_unit == 4));
        let picked: Vec<&str> = scheduled.review.iter().map(|w| w.item.target.as_str()).collect();
        assert_eq!(picked, vec!["old0", "old1", "old2", "old3", "old5", "old6", "old7", "old8"]);
        assert_eq!(scheduled.reviewed_units(), vec![4]);
    }

    #[tokio::test]
    async fn test_late_unit_review_is_capped_and_weighted() {
        let mut units: Vec<UnitDefinition> = (1..=20)
            .map(|u| unit_with_words(Language::French, 2, u, &format!("u{u}-"), 12))
            .collect();
        units.push(unit_with_words(Language::French, 2, 21, "new", 10));
        let s = scheduler(units);

        let scheduled = s.schedule(Language::French, 2, 21).await.unwrap();
        assert!(!scheduled.review.is_empty());
        assert!(scheduled.review.len() <= REVIEW_CAP);
        assert_eq!(scheduled.reviewed_units(), vec![20, 19, 16, 11]);

        let from = |unit: u32| scheduled.review.iter().filter(|w| w.from_unit == unit).count();
        assert_eq!(from(20), 2);
        assert_eq!(from(19), 2);
        assert_eq!(from(16), 2);
        assert_eq!(from(11), 1);
    }

    #[tokio::test]
    async fn test_review_skips_missing_units_and_duplicates() {
        let mut repeat = unit_with_words(Language::German, 1, 10, "x", 4);
        repeat.vocabulary[0].target = "NEW0".into();
        let s = scheduler(vec![
            unit_with_words(Language::German, 1, 12, "new", 3),
            repeat,
        ]);
        let scheduled = s.schedule(Language::German, 1, 12).await.unwrap();
        // Offset 2 only; "NEW0" collides with a new word case-insensitively.
        assert_eq!(scheduled.review.len(), 3);
        assert!(scheduled.review.iter().all(|w| w.item.target != "NEW0"));
    }

    #[tokio::test]
    async fn test_missing_current_unit_still_schedules_review() {
        let s = scheduler(vec![unit_with_words(Language::Italian, 1, 2, "p", 5)]);
        let scheduled = s.schedule(Language::Italian, 1, 3).await.unwrap();
        assert!(scheduled.new.is_empty());
        assert_eq!(scheduled.review.len(), 5);
    }

    #[tokio::test]
    async fn test_schedule_for_loaded_unit() {
        let current = unit_with_words(Language::Spanish, 1, 2, "c", 4);
        let s = scheduler(vec![unit_with_words(Language::Spanish, 1, 1, "p", 4)]);
        let scheduled = s.schedule_for(&current).await;
        assert_eq!(scheduled.new, current.vocabulary);
        assert_eq!(scheduled.review.len(), 4);
    }
}
