//! # recfair
//!
//! `recfair` prepares and serves sparse user–item interaction data for training
//! and evaluating collaborative-filtering recommenders, and computes the
//! fairness-aware grouping and weighting artifacts (per-group upsampling
//! weights, delta-set assignments, per-user gradient scaling) used to mitigate
//! disparate treatment across user subgroups.
//!
//! A dataset lives in a directory of delimited tables: `user_idxs.csv` and
//! `item_idxs.csv` define the dense user and item index spaces (the user table
//! may carry `<attr>_group_idx` columns with group memberships), and
//! `listening_history_{train,val,test}.csv` hold the interaction pairs of each
//! split. Training interactions are kept in two synchronized sparse layouts: a
//! positional layout for point-wise iteration over positive examples, and a
//! compressed row layout for fast per-user slicing and sampling. Evaluation
//! datasets serve dense per-user rows together with the exclusion mask of
//! interactions already seen in earlier splits.
//!
//! ## Example
//!
//! ```no_run
//! extern crate rand;
//! extern crate recfair;
//!
//! use recfair::dataset::{EvalDataset, Split, TrainDataset};
//! use recfair::fairness::{self, DatasetKind};
//!
//! # fn main() {
//! let train = TrainDataset::from_path("data/ml1m").unwrap();
//! let val = EvalDataset::from_path("data/ml1m", Split::Val).unwrap();
//!
//! // Fixed-size positive batches for one user.
//! let mut rng = rand::thread_rng();
//! let positives = train.sample_positives(0, 10, &mut rng);
//! println!("Sampled positives: {:?}", positives);
//!
//! // Class-balancing weights over the gender groups.
//! let groups = train.group_mapping("gender").unwrap();
//! let weights =
//!     fairness::upsampling_weights(train.compressed(), groups, DatasetKind::Ml1m, "gender");
//! println!("Weights: {}, val users: {}", weights, val.num_users());
//! # }
//! ```
#[macro_use]
extern crate failure;

#[macro_use]
extern crate itertools;

#[macro_use]
extern crate log;

#[macro_use]
extern crate serde_derive;

extern crate csv;
extern crate ndarray;
extern crate rand;
extern crate rayon;
extern crate serde;

pub mod data;
pub mod dataset;
pub mod evaluation;
pub mod fairness;

/// Alias for user indices.
pub type UserId = usize;
/// Alias for item indices.
pub type ItemId = usize;
/// Alias for group indices.
pub type GroupId = usize;

/// Errors for contract violations caught eagerly at construction time.
#[derive(Debug, Fail)]
pub enum InvalidArgument {
    /// The split name does not denote any of the three splits.
    #[fail(display = "<{}> is not a valid value for split set", _0)]
    InvalidSplit(String),
    /// The split cannot be served by an evaluation dataset.
    #[fail(display = "<{}> cannot be evaluated; use the val or test split", _0)]
    InvalidEvalSplit(String),
    /// The delta scope name is unknown.
    #[fail(display = "<{}> is not a valid delta scope", _0)]
    UnknownDeltaScope(String),
    /// Per-group delta sets were requested without naming the group attribute.
    #[fail(display = "a group attribute is required for per-group delta sets")]
    MissingGroupAttribute,
    /// The named group attribute does not exist in the user table.
    #[fail(display = "group attribute <{}> not found in the dataset", _0)]
    UnknownGroupAttribute(String),
    /// The gradient scaling policy name is unknown.
    #[fail(display = "<{}> is not a valid gradient scaling policy", _0)]
    UnknownScalingPolicy(String),
    /// The dataset name is unknown.
    #[fail(display = "<{}> is not a supported dataset", _0)]
    UnknownDataset(String),
}

/// Prediction error types.
#[derive(Debug, Fail)]
pub enum PredictionError {
    /// Failed prediction due to numerical issues.
    #[fail(display = "Invalid prediction value: non-finite or not a number.")]
    InvalidPredictionValue,
}

/// Trait describing frozen recommender models that can score candidate items
/// for a user.
///
/// Implementations are expected to be inference-only: `recfair` never mutates
/// or trains the model, it only queries scores during full-ranking evaluation.
pub trait ScoringModel {
    /// Score `item_idxs` for the given user. Higher scores mean the model
    /// considers the item a better recommendation.
    fn score(&self, user_idx: UserId, item_idxs: &[ItemId]) -> Result<Vec<f32>, PredictionError>;
}
