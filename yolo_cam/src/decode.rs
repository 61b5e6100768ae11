//! Decoding of raw model output rows into candidates.
//!
//! Every row of the model output is laid out as
//! `[cx, cy, w, h, objectness, class_0_score, ..., class_n_score]`
//! with the box given in pixels of the model input.
use std::borrow::Cow;

use anyhow::{bail, Result};
use common::{
    detection::{Candidate, CenterBox},
    labels::LabelTable,
};
use ndarray::ArrayView2;

/// Columns before the first class score.
pub const BOX_ATTRIBUTES: usize = 5;

/// Index and value of the largest element. Ties resolve to the lowest index, NaN never wins.
pub fn argmax(values: &[f32]) -> Option<(usize, f32)> {
    values
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best, (index, value)| match best {
            Some((_, best_value)) if !(value > best_value) => best,
            _ if value.is_nan() => best,
            _ => Some((index, value)),
        })
}

/// Turn model output rows into candidates with an objectness of at least `confidence_threshold`.
///
/// An empty output decodes into an empty list. Rows too short to carry a single class score are
/// rejected.
pub fn decode_rows(
    rows: ArrayView2<f32>,
    labels: &LabelTable,
    confidence_threshold: f32,
) -> Result<Vec<Candidate>> {
    if rows.nrows() == 0 {
        return Ok(Vec::new());
    }
    if rows.ncols() <= BOX_ATTRIBUTES {
        bail!(
            "detection rows need more than {BOX_ATTRIBUTES} columns, got {}",
            rows.ncols()
        );
    }

    let mut candidates = Vec::new();
    for row in rows.outer_iter() {
        // Rows are contiguous for standard-layout outputs only
        let row = match row.as_slice() {
            Some(values) => Cow::Borrowed(values),
            None => Cow::Owned(row.to_vec()),
        };

        let objectness = row[4];
        if !(objectness >= confidence_threshold) {
            continue;
        }

        let Some((class_id, score)) = argmax(&row[BOX_ATTRIBUTES..]) else {
            continue;
        };

        candidates.push(Candidate {
            bbox: CenterBox::new(row[0], row[1], row[2], row[3]),
            class_id,
            label: labels.name(class_id).to_owned(),
            score: score.clamp(0.0, 1.0),
            objectness,
        });
    }

    log::trace!(
        "Decoded {} candidates from {} rows",
        candidates.len(),
        rows.nrows()
    );

    Ok(candidates)
}
