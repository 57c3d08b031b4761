//! Slot priority scoring
//!
//! Pure urgency scoring from geometry and visibility. The score only orders
//! work; no correctness property depends on it.

use adlift_common::config::ScorerConfig;
use adlift_common::{Geometry, Viewport};

/// Priority scorer
///
/// `score` is deterministic for a given geometry/viewport/engagement input.
#[derive(Debug, Clone)]
pub struct PriorityScorer {
    config: ScorerConfig,
}

impl PriorityScorer {
    pub fn new(config: ScorerConfig) -> Self {
        Self { config }
    }

    /// Score a slot's urgency in [1, 100]
    ///
    /// Components:
    /// - viewport overlap fraction, weighted
    /// - above-the-fold flat bonus
    /// - capped area bonus (larger placements first, within reason)
    /// - minor aggregate engagement contribution when available
    pub fn score(
        &self,
        geometry: &Geometry,
        viewport: &Viewport,
        engagement: Option<f64>,
    ) -> u8 {
        let overlap = geometry.viewport_overlap(viewport) * self.config.overlap_weight;

        let fold = if geometry.above_the_fold(viewport) {
            self.config.fold_bonus
        } else {
            0.0
        };

        let viewport_area = viewport.area();
        let area = if viewport_area > 0.0 {
            ((geometry.area() / viewport_area) * self.config.area_bonus_cap)
                .min(self.config.area_bonus_cap)
        } else {
            0.0
        };

        let engagement = engagement
            .map(|e| e.clamp(0.0, 1.0) * self.config.engagement_weight)
            .unwrap_or(0.0);

        (overlap + fold + area + engagement).round().clamp(1.0, 100.0) as u8
    }
}

impl Default for PriorityScorer {
    fn default() -> Self {
        Self::new(ScorerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn viewport() -> Viewport {
        Viewport {
            width: 1000.0,
            height: 800.0,
        }
    }

    fn geom(top: f64, width: f64, height: f64) -> Geometry {
        Geometry {
            left: 0.0,
            top,
            width,
            height,
        }
    }

    #[test]
    fn test_score_is_deterministic() {
        let scorer = PriorityScorer::default();
        let g = geom(100.0, 300.0, 250.0);
        let vp = viewport();
        assert_eq!(scorer.score(&g, &vp, Some(0.4)), scorer.score(&g, &vp, Some(0.4)));
    }

    #[test]
    fn test_score_range() {
        let scorer = PriorityScorer::default();
        let vp = viewport();

        // Fully off-screen, tiny region still scores at least 1
        let hidden = geom(5000.0, 1.0, 1.0);
        assert!(scorer.score(&hidden, &vp, None) >= 1);

        // Full-viewport region with max engagement stays within 100
        let huge = geom(0.0, 1000.0, 800.0);
        assert!(scorer.score(&huge, &vp, Some(1.0)) <= 100);
    }

    #[test]
    fn test_visible_scores_above_hidden() {
        let scorer = PriorityScorer::default();
        let vp = viewport();

        let visible = geom(100.0, 300.0, 250.0);
        let hidden = geom(3000.0, 300.0, 250.0);
        assert!(scorer.score(&visible, &vp, None) > scorer.score(&hidden, &vp, None));
    }

    #[test]
    fn test_fold_bonus_applies() {
        let scorer = PriorityScorer::default();
        let vp = viewport();

        // Both fully below the current viewport; only one within the first fold
        let near_fold = geom(790.0, 0.0, 0.0);
        let deep = geom(2500.0, 0.0, 0.0);
        assert!(scorer.score(&near_fold, &vp, None) > scorer.score(&deep, &vp, None));
    }

    #[test]
    fn test_area_bonus_is_capped() {
        let scorer = PriorityScorer::default();
        let vp = viewport();

        // Ten times the viewport area must not dominate the score
        let oversized = geom(0.0, 10_000.0, 800.0);
        let full = geom(0.0, 1000.0, 800.0);
        let oversized_score = scorer.score(&oversized, &vp, None);
        let full_score = scorer.score(&full, &vp, None);
        // Oversized region is mostly off-screen, so overlap drops while the
        // area bonus stays capped
        assert!(oversized_score <= full_score);
    }
}
