//! Fairness-aware grouping and weighting artifacts.
//!
//! Three kinds of artifact are derived from the training interactions:
//!
//! - per-group upsampling weights, used to rebalance a classification loss
//!   across user groups of a sensitive attribute;
//! - delta-set assignments, partitioning users into the buckets that share
//!   one fairness-correction parameter vector;
//! - per-user gradient scaling factors, normalising update magnitudes across
//!   users with very different activity levels.
//!
//! All artifacts are computed once per configuration and never mutated.
use std::str::FromStr;

use failure;
use ndarray::Array1;

use data::CompressedInteractions;
use dataset::{GroupMapping, TrainDataset};
use InvalidArgument;

/// Datasets with dataset-specific fairness handling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DatasetKind {
    /// The LFM-2b demographic-bias subset.
    Lfm2bDemoBias,
    /// Movielens-1M.
    Ml1m,
}

impl FromStr for DatasetKind {
    type Err = InvalidArgument;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "lfm2bdemobias" => Ok(DatasetKind::Lfm2bDemoBias),
            "ml1m" => Ok(DatasetKind::Ml1m),
            _ => Err(InvalidArgument::UnknownDataset(value.to_owned())),
        }
    }
}

/// Compute per-group upsampling weights for a class-balancing loss.
///
/// The interaction mass of a group is the number of distinct training
/// interactions of all its users. Each group is weighted by
/// `max(mass) / mass[group]`, so the heaviest group gets weight one and
/// lighter groups are upsampled proportionally. Groups with no interactions
/// get weight zero rather than an infinite ratio.
///
/// The last age group of the LFM-2b demographic-bias dataset collects
/// outlier users; its weight is forced to zero.
pub fn upsampling_weights(
    interactions: &CompressedInteractions,
    groups: &GroupMapping,
    dataset: DatasetKind,
    attribute: &str,
) -> Array1<f32> {
    let mut mass = vec![0.0_f32; groups.num_groups()];

    for user in interactions.iter_users() {
        mass[groups.group(user.user_idx)] += user.len() as f32;
    }

    let max_mass = mass.iter().cloned().fold(0.0_f32, f32::max);

    let mut weights = Array1::from_vec(
        mass.into_iter()
            .map(|group_mass| {
                if group_mass > 0.0 {
                    max_mass / group_mass
                } else {
                    0.0
                }
            })
            .collect(),
    );

    if dataset == DatasetKind::Lfm2bDemoBias && attribute == "age" && weights.len() > 0 {
        let last = weights.len() - 1;
        weights[last] = 0.0;
    }

    info!("Upsampling weights for <{}>: {}", attribute, weights);

    weights
}

/// How users are partitioned into delta sets, the buckets that share one
/// fairness-correction parameter vector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeltaScope {
    /// A single set shared by every user.
    All,
    /// One set per group of a chosen attribute.
    Groups,
    /// One singleton set per user.
    Users,
}

impl FromStr for DeltaScope {
    type Err = InvalidArgument;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "all" => Ok(DeltaScope::All),
            "groups" => Ok(DeltaScope::Groups),
            "users" => Ok(DeltaScope::Users),
            _ => Err(InvalidArgument::UnknownDeltaScope(value.to_owned())),
        }
    }
}

/// A partition of the user index space into delta sets.
#[derive(Clone, Debug)]
pub struct DeltaSets {
    num_sets: usize,
    user_to_set: Vec<usize>,
}

impl DeltaSets {
    /// Number of delta sets.
    pub fn num_sets(&self) -> usize {
        self.num_sets
    }

    /// The delta set of a single user.
    ///
    /// # Panics
    /// Panics if `user_idx` is outside the user index space.
    pub fn set(&self, user_idx: usize) -> usize {
        self.user_to_set[user_idx]
    }

    /// The full per-user assignment vector, indexed by user.
    pub fn assignments(&self) -> &[usize] {
        &self.user_to_set
    }
}

/// Assign every user to a delta set according to `scope`.
///
/// The `groups` scope requires the name of a group attribute present in the
/// dataset; the other scopes ignore `attribute`.
pub fn delta_set_assignment(
    scope: DeltaScope,
    train: &TrainDataset,
    attribute: Option<&str>,
) -> Result<DeltaSets, failure::Error> {
    match scope {
        DeltaScope::All => {
            info!("Using a single delta set for all users");

            Ok(DeltaSets {
                num_sets: 1,
                user_to_set: vec![0; train.num_users()],
            })
        }
        DeltaScope::Groups => {
            let attribute = attribute.ok_or(InvalidArgument::MissingGroupAttribute)?;
            let mapping = train
                .group_mapping(attribute)
                .ok_or_else(|| InvalidArgument::UnknownGroupAttribute(attribute.to_owned()))?;

            info!("Using a delta set for each <{}> group ({})", attribute, mapping.num_groups());

            Ok(DeltaSets {
                num_sets: mapping.num_groups(),
                user_to_set: mapping.assignments().to_owned(),
            })
        }
        DeltaScope::Users => {
            info!("Using a delta set for each user ({})", train.num_users());

            Ok(DeltaSets {
                num_sets: train.num_users(),
                user_to_set: (0..train.num_users()).collect(),
            })
        }
    }
}

/// How per-user gradient scaling factors are normalised.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScalingPolicy {
    /// No scaling; every user gets factor one.
    None,
    /// Scale by `mean(counts) / counts[user]`: users above average activity
    /// are damped, users below average are amplified.
    Mean,
    /// Scale by `max(counts) / counts[user]`: the most active user gets one,
    /// everyone else at least one.
    Max,
    /// Scale by `min(counts) / counts[user]`: the least active user gets one,
    /// everyone else at most one.
    Min,
}

impl FromStr for ScalingPolicy {
    type Err = InvalidArgument;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "none" => Ok(ScalingPolicy::None),
            "mean" => Ok(ScalingPolicy::Mean),
            "max" => Ok(ScalingPolicy::Max),
            "min" => Ok(ScalingPolicy::Min),
            _ => Err(InvalidArgument::UnknownScalingPolicy(value.to_owned())),
        }
    }
}

/// Compute the per-user gradient scaling vector under `policy`.
///
/// Interaction counts are the row sums of the compressed training layout.
/// The mean, max and min statistics are taken over users with at least one
/// interaction; users without any get factor zero instead of a division by
/// zero.
pub fn user_gradient_scaling(
    interactions: &CompressedInteractions,
    policy: ScalingPolicy,
) -> Array1<f32> {
    let counts: Vec<f32> = interactions
        .user_counts()
        .into_iter()
        .map(|count| count as f32)
        .collect();

    if policy == ScalingPolicy::None {
        return Array1::ones(counts.len());
    }

    let active: Vec<f32> = counts.iter().cloned().filter(|&count| count > 0.0).collect();

    if active.is_empty() {
        return Array1::zeros(counts.len());
    }

    let statistic = match policy {
        ScalingPolicy::Mean => active.iter().sum::<f32>() / active.len() as f32,
        ScalingPolicy::Max => active.iter().cloned().fold(::std::f32::MIN, f32::max),
        ScalingPolicy::Min => active.iter().cloned().fold(::std::f32::MAX, f32::min),
        ScalingPolicy::None => unreachable!(),
    };

    Array1::from_vec(
        counts
            .into_iter()
            .map(|count| if count > 0.0 { statistic / count } else { 0.0 })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use data::{Interaction, Interactions};
    use dataset::fixtures;

    fn three_user_interactions() -> CompressedInteractions {
        let mut interactions = Interactions::new(3, 4);

        interactions.push(Interaction::new(0, 0));
        interactions.push(Interaction::new(0, 1));
        interactions.push(Interaction::new(1, 2));
        interactions.push(Interaction::new(2, 3));

        interactions.to_compressed()
    }

    #[test]
    fn heaviest_group_gets_weight_one() {
        let compressed = three_user_interactions();
        let groups = GroupMapping::new(2, vec![0, 0, 1]);

        let weights = upsampling_weights(&compressed, &groups, DatasetKind::Ml1m, "gender");

        assert_eq!(weights.len(), 2);
        assert_eq!(weights[0], 1.0);
        assert_eq!(weights[1], 3.0);
    }

    #[test]
    fn zero_mass_groups_get_weight_zero() {
        let compressed = three_user_interactions();
        let groups = GroupMapping::new(3, vec![0, 0, 1]);

        let weights = upsampling_weights(&compressed, &groups, DatasetKind::Ml1m, "gender");

        assert_eq!(weights[2], 0.0);
    }

    #[test]
    fn the_age_outlier_group_is_ignored_for_demographic_bias_data() {
        let compressed = three_user_interactions();
        let groups = GroupMapping::new(2, vec![0, 0, 1]);

        let weights =
            upsampling_weights(&compressed, &groups, DatasetKind::Lfm2bDemoBias, "age");

        assert_eq!(weights[0], 1.0);
        assert_eq!(weights[1], 0.0);

        // Other attributes of the same dataset keep their computed ratio.
        let weights =
            upsampling_weights(&compressed, &groups, DatasetKind::Lfm2bDemoBias, "gender");
        assert_eq!(weights[1], 3.0);
    }

    #[test]
    fn delta_scope_all_maps_every_user_to_one_set() {
        let dir = fixtures::two_user_scenario("delta-all");
        let train = TrainDataset::from_path(&dir).unwrap();

        let deltas = delta_set_assignment(DeltaScope::All, &train, None).unwrap();

        assert_eq!(deltas.num_sets(), 1);
        assert_eq!(deltas.assignments(), &[0, 0]);
    }

    #[test]
    fn delta_scope_groups_reuses_the_attribute_mapping() {
        let dir = fixtures::two_user_scenario("delta-groups");
        let train = TrainDataset::from_path(&dir).unwrap();

        let deltas =
            delta_set_assignment(DeltaScope::Groups, &train, Some("gender")).unwrap();

        assert_eq!(deltas.num_sets(), 2);
        assert_eq!(
            deltas.assignments(),
            train.group_mapping("gender").unwrap().assignments()
        );
    }

    #[test]
    fn delta_scope_users_assigns_singleton_sets() {
        let dir = fixtures::two_user_scenario("delta-users");
        let train = TrainDataset::from_path(&dir).unwrap();

        let deltas = delta_set_assignment(DeltaScope::Users, &train, None).unwrap();

        assert_eq!(deltas.num_sets(), train.num_users());
        assert_eq!(deltas.assignments(), &[0, 1]);
        assert_eq!(deltas.set(1), 1);
    }

    #[test]
    fn delta_scope_groups_requires_a_known_attribute() {
        let dir = fixtures::two_user_scenario("delta-errors");
        let train = TrainDataset::from_path(&dir).unwrap();

        assert!(delta_set_assignment(DeltaScope::Groups, &train, None).is_err());
        assert!(delta_set_assignment(DeltaScope::Groups, &train, Some("country")).is_err());
    }

    #[test]
    fn gradient_scaling_policies() {
        let mut interactions = Interactions::new(2, 4);
        interactions.push(Interaction::new(0, 0));
        interactions.push(Interaction::new(0, 1));
        interactions.push(Interaction::new(1, 2));
        let compressed = interactions.to_compressed();

        let ones = user_gradient_scaling(&compressed, ScalingPolicy::None);
        assert_eq!(ones.to_vec(), vec![1.0, 1.0]);

        let max = user_gradient_scaling(&compressed, ScalingPolicy::Max);
        assert_eq!(max.to_vec(), vec![1.0, 2.0]);
        assert!(max.iter().all(|&scale| scale >= 1.0));

        let min = user_gradient_scaling(&compressed, ScalingPolicy::Min);
        assert_eq!(min.to_vec(), vec![0.5, 1.0]);
        assert!(min.iter().all(|&scale| scale <= 1.0));

        let mean = user_gradient_scaling(&compressed, ScalingPolicy::Mean);
        assert_eq!(mean.to_vec(), vec![0.75, 1.5]);
    }

    #[test]
    fn users_without_interactions_get_scale_zero() {
        let mut interactions = Interactions::new(3, 4);
        interactions.push(Interaction::new(0, 0));
        interactions.push(Interaction::new(0, 1));
        interactions.push(Interaction::new(1, 2));
        let compressed = interactions.to_compressed();

        let max = user_gradient_scaling(&compressed, ScalingPolicy::Max);
        assert_eq!(max.to_vec(), vec![1.0, 2.0, 0.0]);

        // The min statistic ignores inactive users instead of degenerating
        // to an all-zero vector.
        let min = user_gradient_scaling(&compressed, ScalingPolicy::Min);
        assert_eq!(min.to_vec(), vec![0.5, 1.0, 0.0]);
    }

    #[test]
    fn policy_and_dataset_names_parse() {
        assert_eq!("none".parse::<ScalingPolicy>().unwrap(), ScalingPolicy::None);
        assert_eq!("mean".parse::<ScalingPolicy>().unwrap(), ScalingPolicy::Mean);
        assert!("median".parse::<ScalingPolicy>().is_err());

        assert_eq!("all".parse::<DeltaScope>().unwrap(), DeltaScope::All);
        assert_eq!("groups".parse::<DeltaScope>().unwrap(), DeltaScope::Groups);
        assert_eq!("users".parse::<DeltaScope>().unwrap(), DeltaScope::Users);
        assert!("per-item".parse::<DeltaScope>().is_err());

        assert_eq!(
            "lfm2bdemobias".parse::<DatasetKind>().unwrap(),
            DatasetKind::Lfm2bDemoBias
        );
        assert_eq!("ml1m".parse::<DatasetKind>().unwrap(), DatasetKind::Ml1m);
        assert!("netflix".parse::<DatasetKind>().is_err());
    }
}
