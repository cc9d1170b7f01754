//! Sparse representations of user–item interaction data.
//!
//! The same logical data is kept in two layouts with different access
//! patterns: [`PositionalInteractions`](struct.PositionalInteractions.html)
//! enumerates every retained raw interaction row under a dense position index
//! (duplicate pairs preserved), while
//! [`CompressedInteractions`](struct.CompressedInteractions.html) supports
//! fast retrieval of the distinct item set of a single user (duplicate pairs
//! coalesced). Both are built from the same raw
//! [`Interactions`](struct.Interactions.html) list and are immutable once
//! built, so they can be read concurrently without locking.
use rand::Rng;

use super::{ItemId, UserId};

/// A single user–item interaction record.
///
/// Deserialized by header name, so interaction tables may carry additional
/// columns; they are ignored.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Interaction {
    user_idx: UserId,
    item_idx: ItemId,
}

impl Interaction {
    pub fn new(user_idx: UserId, item_idx: ItemId) -> Self {
        Interaction { user_idx, item_idx }
    }

    pub fn user_idx(&self) -> UserId {
        self.user_idx
    }

    pub fn item_idx(&self) -> ItemId {
        self.item_idx
    }
}

/// The raw interaction list of a single split, together with the shape of the
/// full index space.
///
/// The shape is supplied by the index tables rather than inferred from the
/// data: a split need not touch every user or item.
pub struct Interactions {
    num_users: usize,
    num_items: usize,
    interactions: Vec<Interaction>,
}

impl Interactions {
    /// Create an empty interaction list over `num_users` x `num_items`.
    pub fn new(num_users: usize, num_items: usize) -> Self {
        Interactions {
            num_users,
            num_items,
            interactions: Vec::new(),
        }
    }

    /// Append a single interaction.
    pub fn push(&mut self, interaction: Interaction) {
        self.interactions.push(interaction);
    }

    /// Append all interactions from `other`, keeping duplicates.
    pub fn extend_from(&mut self, other: &Interactions) {
        self.interactions.extend_from_slice(other.data());
    }

    /// The underlying interaction records.
    pub fn data(&self) -> &[Interaction] {
        &self.interactions
    }

    /// Number of raw interaction rows, duplicates included.
    pub fn len(&self) -> usize {
        self.interactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interactions.is_empty()
    }

    /// Shuffle the raw rows in place. Iteration order over the positional
    /// layout is the responsibility of the caller; shuffling here gives a
    /// randomised epoch order.
    pub fn shuffle<R: Rng>(&mut self, rng: &mut R) {
        rng.shuffle(&mut self.interactions);
    }

    /// Build the positional layout.
    pub fn to_positional(&self) -> PositionalInteractions {
        PositionalInteractions::from(self)
    }

    /// Build the compressed row layout.
    pub fn to_compressed(&self) -> CompressedInteractions {
        CompressedInteractions::from(self)
    }

    pub fn num_users(&self) -> usize {
        self.num_users
    }

    pub fn num_items(&self) -> usize {
        self.num_items
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.num_users, self.num_items)
    }
}

impl From<Vec<Interaction>> for Interactions {
    /// Build an interaction list from raw records, inferring the index space
    /// from the largest indices present.
    fn from(data: Vec<Interaction>) -> Interactions {
        let num_users = data.iter().map(|x| x.user_idx()).max().map(|x| x + 1).unwrap_or(0);
        let num_items = data.iter().map(|x| x.item_idx()).max().map(|x| x + 1).unwrap_or(0);

        Interactions {
            num_users,
            num_items,
            interactions: data,
        }
    }
}

/// Interactions in positional (coordinate) layout.
///
/// Stores one entry per retained raw interaction row in parallel index
/// arrays. Literal duplicate rows in the source each contribute an entry, so
/// `len()` equals the raw row count. The entry at a position carries a fixed
/// positive label of `1.0`.
#[derive(Debug)]
pub struct PositionalInteractions {
    num_users: usize,
    num_items: usize,
    user_idxs: Vec<UserId>,
    item_idxs: Vec<ItemId>,
}

impl PositionalInteractions {
    /// Number of positional entries: the number of retained raw rows,
    /// duplicates included.
    pub fn len(&self) -> usize {
        self.user_idxs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.user_idxs.is_empty()
    }

    /// Return the positive example at `position` as a
    /// `(user_idx, item_idx, label)` triple. The label is always `1.0`.
    ///
    /// # Panics
    /// Panics if `position >= len()`.
    pub fn get(&self, position: usize) -> (UserId, ItemId, f32) {
        (self.user_idxs[position], self.item_idxs[position], 1.0)
    }

    /// Convert to the compressed row layout. Duplicate coordinates coalesce
    /// into a single entry.
    pub fn to_compressed(&self) -> CompressedInteractions {
        CompressedInteractions::from_pairs(
            self.num_users,
            self.num_items,
            self.user_idxs.iter().cloned().zip(self.item_idxs.iter().cloned()),
        )
    }

    /// Iterate over the entries in contiguous minibatches. A trailing
    /// partial minibatch is not emitted.
    pub fn iter_minibatch(&self, minibatch_size: usize) -> PositionalMinibatchIterator {
        PositionalMinibatchIterator {
            interactions: self,
            idx: 0,
            stop_idx: self.len(),
            minibatch_size,
        }
    }

    /// Split the minibatch iterator into `num_partitions` contiguous ranges,
    /// one per worker. Workers only read, so no synchronisation is needed.
    pub fn iter_minibatch_partitioned(
        &self,
        minibatch_size: usize,
        num_partitions: usize,
    ) -> Vec<PositionalMinibatchIterator> {
        let iterator = self.iter_minibatch(minibatch_size);
        let chunk_size = self.len() / num_partitions;

        (0..num_partitions)
            .map(|x| iterator.slice(x * chunk_size, (x + 1) * chunk_size))
            .collect()
    }

    pub fn num_users(&self) -> usize {
        self.num_users
    }

    pub fn num_items(&self) -> usize {
        self.num_items
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.num_users, self.num_items)
    }
}

impl<'a> From<&'a Interactions> for PositionalInteractions {
    fn from(interactions: &'a Interactions) -> Self {
        let user_idxs = interactions.data().iter().map(|x| x.user_idx()).collect();
        let item_idxs = interactions.data().iter().map(|x| x.item_idx()).collect();

        PositionalInteractions {
            num_users: interactions.num_users,
            num_items: interactions.num_items,
            user_idxs,
            item_idxs,
        }
    }
}

/// A contiguous minibatch of positional entries.
#[derive(Debug)]
pub struct PositionalMinibatch<'a> {
    /// User indices of the entries in this minibatch.
    pub user_idxs: &'a [UserId],
    /// Item indices of the entries in this minibatch.
    pub item_idxs: &'a [ItemId],
}

impl<'a> PositionalMinibatch<'a> {
    pub fn len(&self) -> usize {
        self.user_idxs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.user_idxs.is_empty()
    }
}

/// Iterator over contiguous minibatches of positional entries.
#[derive(Clone, Debug)]
pub struct PositionalMinibatchIterator<'a> {
    interactions: &'a PositionalInteractions,
    idx: usize,
    stop_idx: usize,
    minibatch_size: usize,
}

impl<'a> PositionalMinibatchIterator<'a> {
    fn slice(&self, start: usize, stop: usize) -> PositionalMinibatchIterator<'a> {
        PositionalMinibatchIterator {
            interactions: self.interactions,
            idx: start,
            stop_idx: stop,
            minibatch_size: self.minibatch_size,
        }
    }
}

impl<'a> Iterator for PositionalMinibatchIterator<'a> {
    type Item = PositionalMinibatch<'a>;
    fn next(&mut self) -> Option<Self::Item> {
        let value = if self.idx + self.minibatch_size > self.stop_idx {
            None
        } else {
            let start = self.idx;
            let stop = self.idx + self.minibatch_size;

            Some(PositionalMinibatch {
                user_idxs: &self.interactions.user_idxs[start..stop],
                item_idxs: &self.interactions.item_idxs[start..stop],
            })
        };

        self.idx += self.minibatch_size;

        value
    }
}

/// Interactions in compressed row layout.
///
/// Stores, for every user, the sorted set of distinct items the user
/// interacted with. Retrieving a user's item set is O(items-of-user); literal
/// duplicate rows coalesce during construction, so `nnz()` never exceeds the
/// positional length of the same data.
#[derive(Debug)]
pub struct CompressedInteractions {
    num_users: usize,
    num_items: usize,
    user_pointers: Vec<usize>,
    item_idxs: Vec<ItemId>,
}

impl<'a> From<&'a Interactions> for CompressedInteractions {
    fn from(interactions: &'a Interactions) -> CompressedInteractions {
        CompressedInteractions::from_pairs(
            interactions.num_users,
            interactions.num_items,
            interactions.data().iter().map(|x| (x.user_idx(), x.item_idx())),
        )
    }
}

impl CompressedInteractions {
    fn from_pairs<I>(num_users: usize, num_items: usize, pairs: I) -> Self
    where
        I: Iterator<Item = (UserId, ItemId)>,
    {
        let mut data: Vec<(UserId, ItemId)> = pairs.collect();

        data.sort_unstable();
        data.dedup();

        let mut user_pointers = vec![0; num_users + 1];
        let mut item_idxs = Vec::with_capacity(data.len());

        for &(user_idx, item_idx) in &data {
            item_idxs.push(item_idx);
            user_pointers[user_idx + 1] += 1;
        }

        for idx in 1..user_pointers.len() {
            user_pointers[idx] += user_pointers[idx - 1];
        }

        CompressedInteractions {
            num_users,
            num_items,
            user_pointers,
            item_idxs,
        }
    }

    /// Number of distinct (user, item) pairs.
    pub fn nnz(&self) -> usize {
        self.item_idxs.len()
    }

    /// Iterate over all users, including those without interactions.
    pub fn iter_users(&self) -> CompressedInteractionsUserIterator {
        CompressedInteractionsUserIterator {
            interactions: self,
            idx: 0,
        }
    }

    /// Get the row of a single user, or `None` if the index is out of range.
    pub fn get_user(&self, user_idx: UserId) -> Option<CompressedInteractionsUser> {
        if user_idx >= self.num_users {
            return None;
        }

        let start = self.user_pointers[user_idx];
        let stop = self.user_pointers[user_idx + 1];

        Some(CompressedInteractionsUser {
            user_idx,
            item_idxs: &self.item_idxs[start..stop],
        })
    }

    /// Whether the pair (user_idx, item_idx) is present.
    pub fn contains(&self, user_idx: UserId, item_idx: ItemId) -> bool {
        self.get_user(user_idx)
            .map(|user| user.item_idxs.binary_search(&item_idx).is_ok())
            .unwrap_or(false)
    }

    /// Per-user interaction counts (row sums).
    pub fn user_counts(&self) -> Vec<usize> {
        self.user_pointers
            .windows(2)
            .map(|window| window[1] - window[0])
            .collect()
    }

    /// Per-item interaction counts (column sums).
    pub fn item_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.num_items];

        for &item_idx in &self.item_idxs {
            counts[item_idx] += 1;
        }

        counts
    }

    pub fn num_users(&self) -> usize {
        self.num_users
    }

    pub fn num_items(&self) -> usize {
        self.num_items
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.num_users, self.num_items)
    }
}

/// The distinct item set of a single user.
#[derive(Debug)]
pub struct CompressedInteractionsUser<'a> {
    /// The user index of this row.
    pub user_idx: UserId,
    /// The user's distinct item indices, sorted ascending.
    pub item_idxs: &'a [ItemId],
}

impl<'a> CompressedInteractionsUser<'a> {
    /// Number of distinct items of this user.
    pub fn len(&self) -> usize {
        self.item_idxs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.item_idxs.is_empty()
    }
}

/// Iterator over the rows of a compressed interaction matrix.
pub struct CompressedInteractionsUserIterator<'a> {
    interactions: &'a CompressedInteractions,
    idx: usize,
}

impl<'a> Iterator for CompressedInteractionsUserIterator<'a> {
    type Item = CompressedInteractionsUser<'a>;
    fn next(&mut self) -> Option<Self::Item> {
        let value = if self.idx >= self.interactions.num_users {
            None
        } else {
            let start = self.interactions.user_pointers[self.idx];
            let stop = self.interactions.user_pointers[self.idx + 1];

            Some(CompressedInteractionsUser {
                user_idx: self.idx,
                item_idxs: &self.interactions.item_idxs[start..stop],
            })
        };

        self.idx += 1;

        value
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, XorShiftRng};

    use super::*;

    fn sample_interactions() -> Interactions {
        let mut interactions = Interactions::new(3, 4);

        interactions.push(Interaction::new(0, 0));
        interactions.push(Interaction::new(0, 1));
        interactions.push(Interaction::new(0, 1));
        interactions.push(Interaction::new(2, 3));

        interactions
    }

    #[test]
    fn positional_preserves_duplicates() {
        let interactions = sample_interactions();
        let positional = interactions.to_positional();

        assert_eq!(positional.len(), 4);
        assert_eq!(positional.get(0), (0, 0, 1.0));
        assert_eq!(positional.get(1), (0, 1, 1.0));
        assert_eq!(positional.get(2), (0, 1, 1.0));
        assert_eq!(positional.get(3), (2, 3, 1.0));
    }

    #[test]
    fn compressed_coalesces_duplicates() {
        let interactions = sample_interactions();
        let positional = interactions.to_positional();
        let compressed = positional.to_compressed();

        assert_eq!(compressed.nnz(), 3);
        assert!(compressed.nnz() <= positional.len());

        assert_eq!(compressed.get_user(0).unwrap().item_idxs, &[0, 1]);
        assert!(compressed.get_user(1).unwrap().is_empty());
        assert_eq!(compressed.get_user(2).unwrap().item_idxs, &[3]);
        assert!(compressed.get_user(3).is_none());
    }

    #[test]
    fn compressed_from_raw_matches_layout_conversion() {
        let interactions = sample_interactions();

        let direct = interactions.to_compressed();
        let converted = interactions.to_positional().to_compressed();

        assert_eq!(direct.nnz(), converted.nnz());
        for (left, right) in direct.iter_users().zip(converted.iter_users()) {
            assert_eq!(left.item_idxs, right.item_idxs);
        }
    }

    #[test]
    fn membership_and_counts() {
        let compressed = sample_interactions().to_compressed();

        assert!(compressed.contains(0, 1));
        assert!(!compressed.contains(0, 3));
        assert!(!compressed.contains(17, 0));

        assert_eq!(compressed.user_counts(), vec![2, 0, 1]);
        assert_eq!(compressed.item_counts(), vec![1, 1, 0, 1]);
    }

    #[test]
    fn minibatch_iteration_covers_all_entries() {
        let mut interactions = Interactions::new(5, 5);
        for idx in 0..12 {
            interactions.push(Interaction::new(idx % 5, (idx * 3) % 5));
        }

        let positional = interactions.to_positional();

        let total: usize = positional.iter_minibatch(2).map(|batch| batch.len()).sum();
        assert_eq!(total, 12);

        let partitions = positional.iter_minibatch_partitioned(2, 2);
        assert_eq!(partitions.len(), 2);
        let partitioned_total: usize = partitions
            .into_iter()
            .flat_map(|partition| partition.map(|batch| batch.len()).collect::<Vec<_>>())
            .sum();
        assert_eq!(partitioned_total, 12);
    }

    #[test]
    fn shuffle_preserves_the_multiset_of_pairs() {
        let mut interactions = sample_interactions();
        let mut rng = XorShiftRng::from_seed([7; 16]);

        let mut before: Vec<(UserId, ItemId)> = interactions
            .data()
            .iter()
            .map(|x| (x.user_idx(), x.item_idx()))
            .collect();

        interactions.shuffle(&mut rng);

        let mut after: Vec<(UserId, ItemId)> = interactions
            .data()
            .iter()
            .map(|x| (x.user_idx(), x.item_idx()))
            .collect();

        before.sort_unstable();
        after.sort_unstable();
        assert_eq!(before, after);
    }

    #[test]
    fn shape_inference_from_raw_records() {
        let interactions =
            Interactions::from(vec![Interaction::new(1, 7), Interaction::new(4, 2)]);

        assert_eq!(interactions.shape(), (5, 8));
    }
}
