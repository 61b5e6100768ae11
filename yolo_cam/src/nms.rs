//! Non-maximum suppression of overlapping candidates.
//!
use common::detection::{Candidate, CenterBox};
use itertools::Itertools;

use crate::config::DetectorConfig;

/// Run greedy non-maximum suppression over parallel slices of boxes and scores.
///
/// Candidates with a score not above `score_threshold` are discarded first. The rest is visited in
/// order of sinking score (equal scores keep their input order). A candidate is selected unless
/// its IoU with an already selected box exceeds `iou_threshold`. Selection stops after
/// `max_output_size` boxes.
///
/// Returns indices into `boxes`/`scores` in order of selection. If the slices differ in length,
/// the surplus of the longer one is ignored.
pub fn non_max_suppression(
    boxes: &[CenterBox],
    scores: &[f32],
    max_output_size: usize,
    iou_threshold: f32,
    score_threshold: f32,
) -> Vec<usize> {
    let mut order: Vec<usize> = scores
        .iter()
        .take(boxes.len())
        .enumerate()
        .filter(|(_, &score)| score > score_threshold)
        .map(|(index, _)| index)
        .collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut selected: Vec<usize> = Vec::with_capacity(max_output_size.min(order.len()));
    'candidates: for index in order {
        if selected.len() >= max_output_size {
            break;
        }

        // Check for overlap with any of the selected boxes
        for &kept in selected.iter() {
            if boxes[index].iou(&boxes[kept]) > iou_threshold {
                continue 'candidates;
            }
        }

        selected.push(index);
    }

    selected
}

/// Like [`non_max_suppression`], but boxes only suppress boxes of their own class.
///
/// The per-class selections are merged by sinking score and cut to `max_output_size`.
pub fn class_aware_nms(
    boxes: &[CenterBox],
    scores: &[f32],
    class_ids: &[usize],
    max_output_size: usize,
    iou_threshold: f32,
    score_threshold: f32,
) -> Vec<usize> {
    let len = boxes.len().min(scores.len()).min(class_ids.len());
    let by_class = (0..len).into_group_map_by(|&index| class_ids[index]);

    let mut selected: Vec<usize> = by_class
        .into_values()
        .flat_map(|indices| {
            let class_boxes: Vec<CenterBox> = indices.iter().map(|&i| boxes[i]).collect();
            let class_scores: Vec<f32> = indices.iter().map(|&i| scores[i]).collect();
            non_max_suppression(
                &class_boxes,
                &class_scores,
                max_output_size,
                iou_threshold,
                score_threshold,
            )
            .into_iter()
            .map(move |local| indices[local])
        })
        .collect();

    selected.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));
    selected.truncate(max_output_size);

    selected
}

/// Keep the candidates surviving suppression with the thresholds of `config`.
pub fn suppress(candidates: Vec<Candidate>, config: &DetectorConfig) -> Vec<Candidate> {
    if candidates.is_empty() {
        return candidates;
    }

    let boxes: Vec<CenterBox> = candidates.iter().map(|c| c.bbox).collect();
    let scores: Vec<f32> = candidates.iter().map(|c| c.score).collect();

    let keep = if config.class_aware {
        let class_ids: Vec<usize> = candidates.iter().map(|c| c.class_id).collect();
        class_aware_nms(
            &boxes,
            &scores,
            &class_ids,
            config.max_detections,
            config.iou_threshold,
            config.score_threshold,
        )
    } else {
        non_max_suppression(
            &boxes,
            &scores,
            config.max_detections,
            config.iou_threshold,
            config.score_threshold,
        )
    };

    let mut candidates: Vec<Option<Candidate>> = candidates.into_iter().map(Some).collect();
    keep.into_iter()
        .filter_map(|index| candidates[index].take())
        .collect()
}
