//! Loading and serving of on-disk interaction datasets.
//!
//! A dataset is a directory of delimited tables:
//!
//! - `user_idxs.csv`: at least the column `user_idx`, the row index of the
//!   user in the interaction matrix. Zero or more `<attr>_group_idx` columns
//!   assign each user to a group of the attribute `<attr>`.
//! - `item_idxs.csv`: at least the column `item_idx`, the column index of the
//!   item in the interaction matrix.
//! - `listening_history_{train,val,test}.csv`: at least the columns
//!   `user_idx` and `item_idx`, one interaction per row. Additional columns
//!   are permitted and ignored.
//!
//! [`TrainDataset`](struct.TrainDataset.html) serves the training split
//! through both sparse layouts and draws fixed-size positive samples per
//! user; [`EvalDataset`](struct.EvalDataset.html) serves the validation or
//! test split as dense per-user rows together with the exclusion mask of
//! interactions observed in earlier splits.
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use csv;
use failure;
use ndarray::Array1;
use rand::distributions::{Distribution, Uniform};
use rand::seq::sample_slice;
use rand::Rng;

use data::{CompressedInteractions, Interaction, Interactions, PositionalInteractions};
use {GroupId, InvalidArgument, ItemId, UserId};

static USER_TABLE: &str = "user_idxs.csv";
static ITEM_TABLE: &str = "item_idxs.csv";
static GROUP_COLUMN_SUFFIX: &str = "_group_idx";

/// Default number of positive examples drawn per user.
pub const DEFAULT_N_POS: usize = 10;

/// Dataset loading error types.
#[derive(Debug, Fail)]
pub enum ConfigError {
    /// A required column is absent from a table.
    #[fail(display = "missing required column '{}' in {}", column, table)]
    MissingColumn {
        /// Name of the missing column.
        column: String,
        /// Table the column is missing from.
        table: String,
    },
    /// A cell could not be parsed as an index.
    #[fail(display = "malformed value '{}' in column '{}' of {}", value, column, table)]
    MalformedValue {
        /// The offending cell content.
        value: String,
        /// Column of the offending cell.
        column: String,
        /// Table of the offending cell.
        table: String,
    },
    /// A user index in the user table falls outside the dense index space.
    #[fail(display = "user index {} is out of range for {} users", user_idx, num_users)]
    UserIndexOutOfRange {
        /// The offending user index.
        user_idx: usize,
        /// Size of the user index space.
        num_users: usize,
    },
    /// An interaction references a user or item outside the index spaces.
    #[fail(
        display = "interaction ({}, {}) is out of range for shape ({}, {})",
        user_idx, item_idx, num_users, num_items
    )]
    InteractionOutOfRange {
        /// User index of the offending interaction.
        user_idx: usize,
        /// Item index of the offending interaction.
        item_idx: usize,
        /// Size of the user index space.
        num_users: usize,
        /// Size of the item index space.
        num_items: usize,
    },
}

/// The split a table of interactions belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Split {
    /// The training split.
    Train,
    /// The validation split.
    Val,
    /// The test split.
    Test,
}

impl Split {
    /// The split name as it appears in file names.
    pub fn name(&self) -> &'static str {
        match *self {
            Split::Train => "train",
            Split::Val => "val",
            Split::Test => "test",
        }
    }

    fn history_file(&self) -> String {
        format!("listening_history_{}.csv", self.name())
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Split {
    type Err = InvalidArgument;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "train" => Ok(Split::Train),
            "val" => Ok(Split::Val),
            "test" => Ok(Split::Test),
            _ => Err(InvalidArgument::InvalidSplit(value.to_owned())),
        }
    }
}

/// Assignment of every user to one group of a named attribute.
#[derive(Clone, Debug)]
pub struct GroupMapping {
    num_groups: usize,
    assignments: Vec<GroupId>,
}

impl GroupMapping {
    /// Create a mapping from a per-user assignment vector and the group
    /// cardinality.
    pub fn new(num_groups: usize, assignments: Vec<GroupId>) -> Self {
        GroupMapping {
            num_groups,
            assignments,
        }
    }

    /// Number of groups of this attribute.
    pub fn num_groups(&self) -> usize {
        self.num_groups
    }

    /// The group of a single user.
    ///
    /// # Panics
    /// Panics if `user_idx` is outside the user index space.
    pub fn group(&self, user_idx: UserId) -> GroupId {
        self.assignments[user_idx]
    }

    /// The full per-user assignment vector, indexed by user.
    pub fn assignments(&self) -> &[GroupId] {
        &self.assignments
    }
}

/// Index spaces and group metadata shared by the training and evaluation
/// datasets.
///
/// This is the non-iterable load result: it knows the shape of the
/// interaction matrix and how users are grouped, and can (re-)read the raw
/// interaction list of any split, but it does not serve examples itself.
pub struct DatasetCore {
    data_path: PathBuf,
    split: Split,
    num_users: usize,
    num_items: usize,
    group_mappings: HashMap<String, GroupMapping>,
}

impl DatasetCore {
    /// Load the user and item index tables from `data_path`.
    ///
    /// Group mappings are built only when the user table carries more than
    /// one `<attr>_group_idx` column; otherwise the mapping table stays
    /// empty.
    pub fn load<P: AsRef<Path>>(data_path: P, split: Split) -> Result<Self, failure::Error> {
        let data_path = data_path.as_ref().to_path_buf();

        let (num_users, group_mappings) = read_user_table(&data_path.join(USER_TABLE))?;
        let num_items = read_item_table(&data_path.join(ITEM_TABLE))?;

        info!(
            "Loaded index tables from {:?}: {} users, {} items, {} group attributes",
            data_path,
            num_users,
            num_items,
            group_mappings.len()
        );

        Ok(DatasetCore {
            data_path,
            split,
            num_users,
            num_items,
            group_mappings,
        })
    }

    /// Read the raw interaction pairs of `split`. Idempotent: the table is
    /// re-read from disk on every call, so callers decide what to retain.
    pub fn load_interactions(&self, split: Split) -> Result<Interactions, failure::Error> {
        let path = self.data_path.join(split.history_file());
        let mut reader = csv::Reader::from_path(&path)?;

        let mut interactions = Interactions::new(self.num_users, self.num_items);

        for record in reader.deserialize() {
            let interaction: Interaction = record?;

            if interaction.user_idx() >= self.num_users || interaction.item_idx() >= self.num_items
            {
                return Err(ConfigError::InteractionOutOfRange {
                    user_idx: interaction.user_idx(),
                    item_idx: interaction.item_idx(),
                    num_users: self.num_users,
                    num_items: self.num_items,
                }.into());
            }

            interactions.push(interaction);
        }

        debug!("Loaded {} interactions for the {} split", interactions.len(), split);

        Ok(interactions)
    }

    /// The dataset directory.
    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    /// The split this dataset serves.
    pub fn split(&self) -> Split {
        self.split
    }

    /// Number of users in the index space.
    pub fn num_users(&self) -> usize {
        self.num_users
    }

    /// Number of items in the index space.
    pub fn num_items(&self) -> usize {
        self.num_items
    }

    /// All group mappings, keyed by attribute name.
    pub fn group_mappings(&self) -> &HashMap<String, GroupMapping> {
        &self.group_mappings
    }

    /// The group mapping of a single attribute, if present.
    pub fn group_mapping(&self, attribute: &str) -> Option<&GroupMapping> {
        self.group_mappings.get(attribute)
    }
}

fn table_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

fn parse_index(
    row: &csv::StringRecord,
    column_idx: usize,
    column: &str,
    table: &str,
) -> Result<usize, failure::Error> {
    let value = row.get(column_idx).unwrap_or("");

    value.parse::<usize>().map_err(|_| {
        ConfigError::MalformedValue {
            value: value.to_owned(),
            column: column.to_owned(),
            table: table.to_owned(),
        }.into()
    })
}

fn read_user_table(
    path: &Path,
) -> Result<(usize, HashMap<String, GroupMapping>), failure::Error> {
    let table = table_name(path);

    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();

    let user_idx_column = headers.iter().position(|column| column == "user_idx").ok_or_else(|| {
        ConfigError::MissingColumn {
            column: "user_idx".to_owned(),
            table: table.clone(),
        }
    })?;

    let group_columns: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter(|&(_, column)| column.ends_with(GROUP_COLUMN_SUFFIX))
        .map(|(idx, column)| (idx, column.trim_end_matches(GROUP_COLUMN_SUFFIX).to_owned()))
        .collect();

    let rows: Vec<csv::StringRecord> = reader.records().collect::<Result<_, _>>()?;
    let num_users = rows.len();

    let mut group_mappings = HashMap::new();

    // A single qualifying column does not constitute grouping metadata.
    if group_columns.len() > 1 {
        let mut assignment_vecs = vec![vec![0; num_users]; group_columns.len()];
        let mut distinct_sets: Vec<HashSet<GroupId>> = vec![HashSet::new(); group_columns.len()];

        for row in &rows {
            let user_idx = parse_index(row, user_idx_column, "user_idx", &table)?;

            if user_idx >= num_users {
                return Err(ConfigError::UserIndexOutOfRange { user_idx, num_users }.into());
            }

            for (slot, &(column_idx, ref attribute)) in group_columns.iter().enumerate() {
                let column = format!("{}{}", attribute, GROUP_COLUMN_SUFFIX);
                let group_idx = parse_index(row, column_idx, &column, &table)?;

                assignment_vecs[slot][user_idx] = group_idx;
                distinct_sets[slot].insert(group_idx);
            }
        }

        for ((_, attribute), assignments, distinct) in
            izip!(group_columns, assignment_vecs, distinct_sets)
        {
            group_mappings.insert(attribute, GroupMapping::new(distinct.len(), assignments));
        }
    }

    Ok((num_users, group_mappings))
}

fn read_item_table(path: &Path) -> Result<usize, failure::Error> {
    let table = table_name(path);

    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();

    if !headers.iter().any(|column| column == "item_idx") {
        return Err(ConfigError::MissingColumn {
            column: "item_idx".to_owned(),
            table,
        }.into());
    }

    let mut num_items = 0;
    for record in reader.records() {
        record?;
        num_items += 1;
    }

    Ok(num_items)
}

/// Point-wise iteration over individual positive examples.
pub trait InteractionIterable {
    /// Number of positive examples.
    fn len(&self) -> usize;
    /// The example at `position` as a `(user_idx, item_idx, label)` triple.
    fn get(&self, position: usize) -> (UserId, ItemId, f32);
}

/// Per-user iteration producing dense rows for full-ranking evaluation.
pub trait UserIterable {
    /// Number of users served.
    fn len(&self) -> usize;
    /// The dense `(user_idx, ground_truth_row, exclusion_row)` triple of one
    /// user.
    fn get(&self, user_idx: UserId) -> (UserId, Array1<f32>, Array1<bool>);
}

/// The training split in both sparse layouts, plus the item popularity
/// distribution.
///
/// The positional layout drives point-wise iteration over positive examples;
/// the compressed row layout backs per-user history lookups and positive
/// sampling. Both are built once and never mutated, so the dataset can be
/// read from multiple worker threads without locking.
pub struct TrainDataset {
    core: DatasetCore,
    raw: Option<Interactions>,
    positional: PositionalInteractions,
    compressed: CompressedInteractions,
    popularity: Array1<f32>,
}

impl TrainDataset {
    /// Build the training dataset from a dataset directory, releasing the
    /// raw interaction table once the sparse layouts are built.
    pub fn from_path<P: AsRef<Path>>(data_path: P) -> Result<Self, failure::Error> {
        Self::build(data_path, false)
    }

    /// Build the training dataset, retaining the raw interaction table. The
    /// raw table is only needed by callers that want to re-inspect the rows
    /// as loaded; it can be released later with `release_raw`.
    pub fn from_path_keeping_raw<P: AsRef<Path>>(data_path: P) -> Result<Self, failure::Error> {
        Self::build(data_path, true)
    }

    fn build<P: AsRef<Path>>(data_path: P, keep_raw: bool) -> Result<Self, failure::Error> {
        let core = DatasetCore::load(data_path, Split::Train)?;
        let raw = core.load_interactions(Split::Train)?;

        let positional = raw.to_positional();
        let compressed = positional.to_compressed();
        let popularity = item_popularity(&compressed);

        info!(
            "Built train dataset: {} users, {} items, {} interactions ({} distinct)",
            core.num_users(),
            core.num_items(),
            positional.len(),
            compressed.nnz()
        );

        Ok(TrainDataset {
            core,
            raw: if keep_raw { Some(raw) } else { None },
            positional,
            compressed,
            popularity,
        })
    }

    /// The history of a user: the distinct items the user interacted with,
    /// sorted ascending. Empty for users without training interactions.
    pub fn user_history(&self, user_idx: UserId) -> &[ItemId] {
        self.compressed
            .get_user(user_idx)
            .map(|user| user.item_idxs)
            .unwrap_or(&[])
    }

    /// Draw `n_pos` positive item indices for a user, uniformly from the
    /// user's history: without replacement when the history holds at least
    /// `n_pos` items, with replacement otherwise. The fixed output size makes
    /// batches stackable regardless of user activity.
    ///
    /// # Panics
    /// Panics if the user has no training interactions.
    pub fn sample_positives<R: Rng>(
        &self,
        user_idx: UserId,
        n_pos: usize,
        rng: &mut R,
    ) -> Vec<ItemId> {
        let history = self.user_history(user_idx);

        if history.len() < n_pos {
            let positions = Uniform::new(0, history.len());
            (0..n_pos).map(|_| history[positions.sample(rng)]).collect()
        } else {
            sample_slice(rng, history, n_pos)
        }
    }

    /// The item popularity distribution over the training split: column sums
    /// of the compressed layout, normalised to sum to one. Items absent from
    /// training have probability zero.
    pub fn popularity(&self) -> &Array1<f32> {
        &self.popularity
    }

    /// The positional layout of the training interactions.
    pub fn positional(&self) -> &PositionalInteractions {
        &self.positional
    }

    /// The compressed row layout of the training interactions.
    pub fn compressed(&self) -> &CompressedInteractions {
        &self.compressed
    }

    /// The retained raw interaction table, if any.
    pub fn raw(&self) -> Option<&Interactions> {
        self.raw.as_ref()
    }

    /// Release the retained raw interaction table, returning it to the
    /// caller. Subsequent calls return `None`.
    pub fn release_raw(&mut self) -> Option<Interactions> {
        self.raw.take()
    }

    /// The shared load result.
    pub fn core(&self) -> &DatasetCore {
        &self.core
    }

    /// Number of users in the index space.
    pub fn num_users(&self) -> usize {
        self.core.num_users()
    }

    /// Number of items in the index space.
    pub fn num_items(&self) -> usize {
        self.core.num_items()
    }

    /// The group mapping of a single attribute, if present.
    pub fn group_mapping(&self, attribute: &str) -> Option<&GroupMapping> {
        self.core.group_mapping(attribute)
    }
}

impl InteractionIterable for TrainDataset {
    /// Number of positive examples: the raw row count, duplicates included.
    fn len(&self) -> usize {
        self.positional.len()
    }

    fn get(&self, position: usize) -> (UserId, ItemId, f32) {
        self.positional.get(position)
    }
}

fn item_popularity(compressed: &CompressedInteractions) -> Array1<f32> {
    let counts = compressed.item_counts();
    let total: f32 = counts.iter().map(|&count| count as f32).sum();

    if total == 0.0 {
        return Array1::zeros(compressed.num_items());
    }

    Array1::from_vec(counts.into_iter().map(|count| count as f32 / total).collect())
}

/// The validation or test split as dense per-user rows, plus the exclusion
/// matrix of interactions observed in earlier splits.
///
/// The exclusion matrix always contains the training incidence; when the
/// dataset serves the test split it additionally contains the validation
/// incidence, so evaluation never ranks an item the model was trained or
/// validated on.
pub struct EvalDataset {
    core: DatasetCore,
    raw: Option<Interactions>,
    incidence: CompressedInteractions,
    excluded: CompressedInteractions,
}

impl EvalDataset {
    /// Build the evaluation dataset for `split`, releasing the raw
    /// interaction table once the sparse structures are built.
    ///
    /// Fails with `InvalidArgument` when `split` is not `Val` or `Test`.
    pub fn from_path<P: AsRef<Path>>(data_path: P, split: Split) -> Result<Self, failure::Error> {
        Self::build(data_path, split, false)
    }

    /// Build the evaluation dataset, retaining the raw interaction table.
    pub fn from_path_keeping_raw<P: AsRef<Path>>(
        data_path: P,
        split: Split,
    ) -> Result<Self, failure::Error> {
        Self::build(data_path, split, true)
    }

    fn build<P: AsRef<Path>>(
        data_path: P,
        split: Split,
        keep_raw: bool,
    ) -> Result<Self, failure::Error> {
        if split == Split::Train {
            return Err(InvalidArgument::InvalidEvalSplit(split.to_string()).into());
        }

        let core = DatasetCore::load(data_path, split)?;
        let raw = core.load_interactions(split)?;
        let incidence = raw.to_compressed();

        let mut excluded_raw = core.load_interactions(Split::Train)?;
        if split == Split::Test {
            let val = core.load_interactions(Split::Val)?;
            excluded_raw.extend_from(&val);
        }
        let excluded = excluded_raw.to_compressed();

        info!(
            "Built {} eval dataset: {} users, {} items, {} interactions, {} excluded",
            split,
            core.num_users(),
            core.num_items(),
            incidence.nnz(),
            excluded.nnz()
        );

        Ok(EvalDataset {
            core,
            raw: if keep_raw { Some(raw) } else { None },
            incidence,
            excluded,
        })
    }

    /// The incidence matrix of the served split.
    pub fn incidence(&self) -> &CompressedInteractions {
        &self.incidence
    }

    /// The exclusion matrix: interactions to mask out of ranking evaluation
    /// because they were observed in an earlier split.
    pub fn excluded(&self) -> &CompressedInteractions {
        &self.excluded
    }

    /// The retained raw interaction table, if any.
    pub fn raw(&self) -> Option<&Interactions> {
        self.raw.as_ref()
    }

    /// Release the retained raw interaction table, returning it to the
    /// caller. Subsequent calls return `None`.
    pub fn release_raw(&mut self) -> Option<Interactions> {
        self.raw.take()
    }

    /// The shared load result.
    pub fn core(&self) -> &DatasetCore {
        &self.core
    }

    /// Number of users in the index space.
    pub fn num_users(&self) -> usize {
        self.core.num_users()
    }

    /// Number of items in the index space.
    pub fn num_items(&self) -> usize {
        self.core.num_items()
    }
}

impl UserIterable for EvalDataset {
    /// Evaluation iterates over users, not interactions.
    fn len(&self) -> usize {
        self.core.num_users()
    }

    /// Materialise the ground-truth and exclusion rows of one user to dense
    /// form. Full-ranking evaluation scores every item per user, so dense
    /// rows save repeated sparse lookups downstream.
    fn get(&self, user_idx: UserId) -> (UserId, Array1<f32>, Array1<bool>) {
        let mut ground_truth = Array1::zeros(self.core.num_items());
        if let Some(user) = self.incidence.get_user(user_idx) {
            for &item_idx in user.item_idxs {
                ground_truth[item_idx] = 1.0;
            }
        }

        let mut exclusion = Array1::from_elem(self.core.num_items(), false);
        if let Some(user) = self.excluded.get_user(user_idx) {
            for &item_idx in user.item_idxs {
                exclusion[item_idx] = true;
            }
        }

        (user_idx, ground_truth, exclusion)
    }
}
