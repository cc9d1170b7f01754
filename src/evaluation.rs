//! Full-ranking evaluation over held-out splits.
//!
//! The driver iterates over all users of an evaluation dataset, scores every
//! item with a frozen model, masks out interactions observed in earlier
//! splits, and applies a caller-supplied metric to the masked scores. The
//! metric itself is a pure function over dense rows; ranking metrics such as
//! NDCG or recall plug in without the driver knowing their definition.
use rayon::prelude::*;

use ndarray::Array1;

use dataset::{EvalDataset, UserIterable};
use {ItemId, PredictionError, ScoringModel};

/// Evaluate `model` on every user of `data`, averaging `metric` over users.
///
/// For each user with at least one ground-truth interaction, all items are
/// scored in one batch, the scores of excluded items are overwritten with
/// `f32::MIN` so they rank last, and `metric` is applied to the masked score
/// row and the dense ground-truth row. Users without ground-truth
/// interactions are skipped. Users are processed in parallel; the dataset is
/// only read, so no synchronisation is needed.
pub fn evaluate<M, F>(model: &M, data: &EvalDataset, metric: F) -> Result<f32, PredictionError>
where
    M: ScoringModel + Sync,
    F: Fn(&Array1<f32>, &Array1<f32>) -> f32 + Sync,
{
    let item_idxs: Vec<ItemId> = (0..data.num_items()).collect();

    let per_user: Result<Vec<Option<f32>>, PredictionError> = (0..data.len())
        .into_par_iter()
        .map(|user_idx| {
            let (user_idx, ground_truth, exclusion) = data.get(user_idx);

            if ground_truth.iter().all(|&label| label == 0.0) {
                return Ok(None);
            }

            let scores = model.score(user_idx, &item_idxs)?;
            let mut scores = Array1::from_vec(scores);

            for (score, &masked) in izip!(scores.iter_mut(), exclusion.iter()) {
                if masked {
                    *score = ::std::f32::MIN;
                }
            }

            Ok(Some(metric(&scores, &ground_truth)))
        })
        .collect();

    let values: Vec<f32> = per_user?.into_iter().filter_map(|value| value).collect();

    Ok(values.iter().sum::<f32>() / values.len() as f32)
}
