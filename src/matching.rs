// src/matching.rs
//
// Cross-pass defect matcher: reconciles the entry-side and exit-side defect
// lists for one wagon into OLD (persisting), NEW (appeared), and RESOLVED
// (gone) classes. Greedy, single pass, no backtracking; entry detections are
// visited in input order, so earlier entries get first choice of match.

use crate::interfaces::FeatureExtractor;
use crate::types::{BBox, Detection, Frame, MatchingConfig};
use anyhow::Result;
use tracing::debug;

/// Disjoint partition of the two input sets. `old` carries the *exit*
/// detections (the current appearance of each persisting defect).
#[derive(Debug, Default)]
pub struct MatchOutcome {
    pub old: Vec<Detection>,
    pub new: Vec<Detection>,
    pub resolved: Vec<Detection>,
}

pub struct DefectMatcher {
    similarity_threshold: f32,
    max_centroid_distance: f32,
    ignore_labels: Vec<String>,
}

impl DefectMatcher {
    pub fn new(config: &MatchingConfig) -> Self {
        Self {
            similarity_threshold: config.similarity_threshold,
            max_centroid_distance: config.centroid_distance_px,
            ignore_labels: config.ignore_labels.clone(),
        }
    }

    pub fn match_defects(
        &self,
        entry_list: Vec<Detection>,
        exit_list: Vec<Detection>,
        entry_img: &Frame,
        exit_img: &Frame,
        embedder: &mut dyn FeatureExtractor,
    ) -> Result<MatchOutcome> {
        let entry_list = self.strip_ignored(entry_list);
        let exit_list = self.strip_ignored(exit_list);

        let entry_desc: Vec<Vec<f32>> = entry_list
            .iter()
            .map(|d| embedder.embed(entry_img, &d.bbox))
            .collect::<Result<_>>()?;
        let exit_desc: Vec<Vec<f32>> = exit_list
            .iter()
            .map(|d| embedder.embed(exit_img, &d.bbox))
            .collect::<Result<_>>()?;

        let mut outcome = MatchOutcome::default();
        let mut exit_matched = vec![false; exit_list.len()];

        for (e_idx, entry) in entry_list.iter().enumerate() {
            let e_centroid = centroid(&entry.bbox);
            let mut best_sim = -1.0f32;
            let mut best_idx: Option<usize> = None;

            for (x_idx, exit) in exit_list.iter().enumerate() {
                if exit_matched[x_idx] || entry.label != exit.label {
                    continue;
                }
                let sim = cosine_similarity(&entry_desc[e_idx], &exit_desc[x_idx]);
                let dist = euclidean(e_centroid, centroid(&exit.bbox));
                if sim > self.similarity_threshold
                    && dist < self.max_centroid_distance
                    && sim > best_sim
                {
                    best_sim = sim;
                    best_idx = Some(x_idx);
                }
            }

            match best_idx {
                Some(x_idx) => {
                    exit_matched[x_idx] = true;
                    outcome.old.push(exit_list[x_idx].clone());
                }
                None => outcome.resolved.push(entry.clone()),
            }
        }

        for (x_idx, exit) in exit_list.iter().enumerate() {
            if !exit_matched[x_idx] {
                outcome.new.push(exit.clone());
            }
        }

        debug!(
            "Matched defects: {} OLD, {} NEW, {} RESOLVED",
            outcome.old.len(),
            outcome.new.len(),
            outcome.resolved.len()
        );
        Ok(outcome)
    }

    fn strip_ignored(&self, list: Vec<Detection>) -> Vec<Detection> {
        if self.ignore_labels.is_empty() {
            return list;
        }
        list.into_iter()
            .filter(|d| !self.ignore_labels.iter().any(|l| l == &d.label))
            .collect()
    }
}

pub fn centroid(bbox: &BBox) -> (f32, f32) {
    ((bbox[0] + bbox[2]) / 2.0, (bbox[1] + bbox[3]) / 2.0)
}

fn euclidean(a: (f32, f32), b: (f32, f32)) -> f32 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MatchingConfig;
    use std::collections::HashMap;

    /// Embedder returning a canned descriptor per bbox corner, so tests can
    /// control similarity without any model.
    struct StubEmbedder {
        by_corner: HashMap<(i64, i64), Vec<f32>>,
        fallback: Vec<f32>,
    }

    impl StubEmbedder {
        fn uniform() -> Self {
            Self {
                by_corner: HashMap::new(),
                fallback: vec![1.0, 0.0, 0.0],
            }
        }

        fn with(mut self, bbox: BBox, desc: Vec<f32>) -> Self {
            self.by_corner
                .insert((bbox[0] as i64, bbox[1] as i64), desc);
            self
        }
    }

    impl FeatureExtractor for StubEmbedder {
        fn embed(&mut self, _frame: &Frame, bbox: &BBox) -> Result<Vec<f32>> {
            Ok(self
                .by_corner
                .get(&(bbox[0] as i64, bbox[1] as i64))
                .cloned()
                .unwrap_or_else(|| self.fallback.clone()))
        }
    }

    fn det(label: &str, bbox: BBox) -> Detection {
        Detection {
            bbox,
            class_id: 0,
            label: label.to_string(),
            confidence: 0.8,
        }
    }

    fn img() -> Frame {
        Frame {
            data: Vec::new(),
            width: 0,
            height: 0,
            index: 0,
        }
    }

    fn matcher() -> DefectMatcher {
        DefectMatcher::new(&MatchingConfig::default())
    }

    #[test]
    fn test_identical_sets_all_old() {
        let entry = vec![
            det("scratch", [10.0, 10.0, 50.0, 50.0]),
            det("Dent", [100.0, 100.0, 140.0, 140.0]),
        ];
        let exit = entry.clone();

        let mut embedder = StubEmbedder::uniform();
        let out = matcher()
            .match_defects(entry, exit, &img(), &img(), &mut embedder)
            .unwrap();

        assert_eq!(out.old.len(), 2);
        assert!(out.new.is_empty());
        assert!(out.resolved.is_empty());
    }

    #[test]
    fn test_disjoint_labels_split_new_and_resolved() {
        let entry = vec![det("scratch", [10.0, 10.0, 50.0, 50.0])];
        let exit = vec![det("hole", [10.0, 10.0, 50.0, 50.0])];

        let mut embedder = StubEmbedder::uniform();
        let out = matcher()
            .match_defects(entry, exit, &img(), &img(), &mut embedder)
            .unwrap();

        assert!(out.old.is_empty());
        assert_eq!(out.new.len(), 1);
        assert_eq!(out.new[0].label, "hole");
        assert_eq!(out.resolved.len(), 1);
        assert_eq!(out.resolved[0].label, "scratch");
    }

    #[test]
    fn test_nearby_scratch_matches_as_old() {
        let entry = vec![det("scratch", [10.0, 10.0, 50.0, 50.0])];
        let exit = vec![det("scratch", [12.0, 11.0, 52.0, 49.0])];

        let mut embedder = StubEmbedder::uniform();
        let out = matcher()
            .match_defects(entry, exit, &img(), &img(), &mut embedder)
            .unwrap();

        assert_eq!(out.old.len(), 1);
        // OLD carries the exit-side box
        assert_eq!(out.old[0].bbox, [12.0, 11.0, 52.0, 49.0]);
        assert!(out.new.is_empty());
        assert!(out.resolved.is_empty());
    }

    #[test]
    fn test_entry_only_hole_is_resolved() {
        let entry = vec![det("hole", [0.0, 0.0, 10.0, 10.0])];

        let mut embedder = StubEmbedder::uniform();
        let out = matcher()
            .match_defects(entry, Vec::new(), &img(), &img(), &mut embedder)
            .unwrap();

        assert!(out.old.is_empty());
        assert!(out.new.is_empty());
        assert_eq!(out.resolved.len(), 1);
    }

    #[test]
    fn test_distant_same_label_does_not_match() {
        // Same label and appearance, but centroids 100px apart.
        let entry = vec![det("Dent", [0.0, 0.0, 20.0, 20.0])];
        let exit = vec![det("Dent", [100.0, 100.0, 120.0, 120.0])];

        let mut embedder = StubEmbedder::uniform();
        let out = matcher()
            .match_defects(entry, exit, &img(), &img(), &mut embedder)
            .unwrap();

        assert_eq!(out.resolved.len(), 1);
        assert_eq!(out.new.len(), 1);
        assert!(out.old.is_empty());
    }

    #[test]
    fn test_low_similarity_does_not_match() {
        let entry_box = [10.0, 10.0, 50.0, 50.0];
        let exit_box = [12.0, 11.0, 52.0, 49.0];
        let mut embedder = StubEmbedder::uniform()
            .with(entry_box, vec![1.0, 0.0, 0.0])
            .with(exit_box, vec![0.0, 1.0, 0.0]); // orthogonal: sim 0.0

        let out = matcher()
            .match_defects(
                vec![det("scratch", entry_box)],
                vec![det("scratch", exit_box)],
                &img(),
                &img(),
                &mut embedder,
            )
            .unwrap();

        assert!(out.old.is_empty());
        assert_eq!(out.new.len(), 1);
        assert_eq!(out.resolved.len(), 1);
    }

    #[test]
    fn test_no_exit_detection_matched_twice() {
        // Two entry scratches compete for one exit scratch; the earlier
        // entry wins and the later one resolves.
        let entry = vec![
            det("scratch", [10.0, 10.0, 30.0, 30.0]),
            det("scratch", [12.0, 12.0, 32.0, 32.0]),
        ];
        let exit = vec![det("scratch", [11.0, 11.0, 31.0, 31.0])];

        let mut embedder = StubEmbedder::uniform();
        let out = matcher()
            .match_defects(entry, exit, &img(), &img(), &mut embedder)
            .unwrap();

        assert_eq!(out.old.len(), 1);
        assert_eq!(out.resolved.len(), 1);
        assert_eq!(out.resolved[0].bbox, [12.0, 12.0, 32.0, 32.0]);
        assert!(out.new.is_empty());
    }

    #[test]
    fn test_best_similarity_wins_among_eligible() {
        let entry_box = [10.0, 10.0, 30.0, 30.0];
        let close_box = [11.0, 11.0, 31.0, 31.0];
        let closer_box = [10.0, 12.0, 30.0, 32.0];

        let mut embedder = StubEmbedder::uniform()
            .with(entry_box, vec![1.0, 0.0, 0.0])
            .with(close_box, vec![0.8, 0.6, 0.0]) // sim 0.8
            .with(closer_box, vec![0.95, 0.312, 0.0]); // sim 0.95

        let out = matcher()
            .match_defects(
                vec![det("scratch", entry_box)],
                vec![det("scratch", close_box), det("scratch", closer_box)],
                &img(),
                &img(),
                &mut embedder,
            )
            .unwrap();

        assert_eq!(out.old.len(), 1);
        assert_eq!(out.old[0].bbox, closer_box);
        assert_eq!(out.new.len(), 1);
        assert_eq!(out.new[0].bbox, close_box);
    }

    #[test]
    fn test_ignored_labels_removed_from_both_sides() {
        let entry = vec![
            det("wire", [10.0, 10.0, 50.0, 50.0]),
            det("scratch", [60.0, 60.0, 80.0, 80.0]),
        ];
        let exit = vec![det("gunny_bag", [10.0, 10.0, 50.0, 50.0])];

        let mut embedder = StubEmbedder::uniform();
        let out = matcher()
            .match_defects(entry, exit, &img(), &img(), &mut embedder)
            .unwrap();

        // Only the scratch survives the pre-filter
        assert!(out.old.is_empty());
        assert!(out.new.is_empty());
        assert_eq!(out.resolved.len(), 1);
        assert_eq!(out.resolved[0].label, "scratch");
    }

    #[test]
    fn test_partition_is_exhaustive() {
        let entry = vec![
            det("scratch", [10.0, 10.0, 30.0, 30.0]),
            det("hole", [200.0, 200.0, 220.0, 220.0]),
        ];
        let exit = vec![
            det("scratch", [11.0, 11.0, 31.0, 31.0]),
            det("Dent", [300.0, 300.0, 320.0, 320.0]),
        ];

        let mut embedder = StubEmbedder::uniform();
        let out = matcher()
            .match_defects(entry.clone(), exit.clone(), &img(), &img(), &mut embedder)
            .unwrap();

        // Every exit item in OLD or NEW, every entry item in OLD or RESOLVED
        assert_eq!(out.old.len() + out.new.len(), exit.len());
        assert_eq!(out.old.len() + out.resolved.len(), entry.len());
    }

    #[test]
    fn test_cosine_similarity_bounds() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[0.0, 1.0])).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }
}
