//! Keyed-list reconciliation.
//!
//! [`reconcile`] turns an old key sequence into a new one with the fewest
//! moves: retained keys whose old positions form a longest increasing
//! subsequence stay where they are, every other retained key moves, and
//! keys present on one side only are inserted or deleted. The new sequence
//! is walked from the end, so the successor every operation is placed
//! before is already in its final position.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use trellis_foundation::Result;

/// Receives the operations that turn one keyed sequence into another.
pub trait ListDelegate<K, T> {
    /// Inserts a new key before `before`, or at the end.
    ///
    /// # Errors
    /// Returns an error if the insertion fails.
    fn insert(&mut self, key: &K, item: &T, before: Option<&K>) -> Result<()>;

    /// Keeps a key that is already in place.
    ///
    /// # Errors
    /// Returns an error if the retained item fails to update.
    fn retain(&mut self, key: &K, item: &T) -> Result<()>;

    /// Moves an existing key before `before`, or to the end.
    ///
    /// # Errors
    /// Returns an error if the move fails.
    fn move_item(&mut self, key: &K, item: &T, before: Option<&K>) -> Result<()>;

    /// Removes a key that is absent from the new sequence.
    ///
    /// # Errors
    /// Returns an error if teardown fails.
    fn delete(&mut self, key: &K) -> Result<()>;
}

/// One reconciliation step, as returned by [`diff`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Patch<K> {
    /// Insert `key` before `before`, or at the end.
    Insert {
        /// The new key.
        key: K,
        /// Its new successor.
        before: Option<K>,
    },
    /// `key` stays in place.
    Retain {
        /// The retained key.
        key: K,
    },
    /// Move `key` before `before`, or to the end.
    Move {
        /// The moved key.
        key: K,
        /// Its new successor.
        before: Option<K>,
    },
    /// Remove `key`.
    Delete {
        /// The removed key.
        key: K,
    },
}

/// Drives `delegate` through the operations that turn `old` into `new`.
///
/// Deletions come first. The remaining operations are emitted from the last
/// new key to the first. Keys must be unique within each sequence.
///
/// # Errors
/// Returns the first error raised by the delegate.
pub fn reconcile<K, T, D>(old: &[K], new: &[(K, T)], delegate: &mut D) -> Result<()>
where
    K: Eq + Hash,
    D: ListDelegate<K, T> + ?Sized,
{
    let new_keys: HashSet<&K> = new.iter().map(|(key, _)| key).collect();
    let old_positions: HashMap<&K, usize> =
        old.iter().enumerate().map(|(index, key)| (key, index)).collect();

    for key in old.iter().filter(|key| !new_keys.contains(key)) {
        delegate.delete(key)?;
    }

    let retained: Vec<(usize, usize)> = new
        .iter()
        .enumerate()
        .filter_map(|(index, (key, _))| old_positions.get(key).map(|&old| (index, old)))
        .collect();
    let stable: HashSet<usize> = longest_increasing(&retained)
        .into_iter()
        .map(|position| retained[position].0)
        .collect();

    for (index, (key, item)) in new.iter().enumerate().rev() {
        let before = new.get(index + 1).map(|(key, _)| key);
        if !old_positions.contains_key(key) {
            delegate.insert(key, item, before)?;
        } else if stable.contains(&index) {
            delegate.retain(key, item)?;
        } else {
            delegate.move_item(key, item, before)?;
        }
    }
    Ok(())
}

/// Returns the operations [`reconcile`] would emit for two key sequences.
#[must_use]
pub fn diff<K>(old: &[K], new: &[K]) -> Vec<Patch<K>>
where
    K: Clone + Eq + Hash,
{
    let mut recorder = Recorder(Vec::new());
    let new: Vec<(K, ())> = new.iter().map(|key| (key.clone(), ())).collect();
    // The recorder never fails.
    let _ = reconcile(old, &new, &mut recorder);
    recorder.0
}

struct Recorder<K>(Vec<Patch<K>>);

impl<K: Clone> ListDelegate<K, ()> for Recorder<K> {
    fn insert(&mut self, key: &K, (): &(), before: Option<&K>) -> Result<()> {
        self.0.push(Patch::Insert {
            key: key.clone(),
            before: before.cloned(),
        });
        Ok(())
    }

    fn retain(&mut self, key: &K, (): &()) -> Result<()> {
        self.0.push(Patch::Retain { key: key.clone() });
        Ok(())
    }

    fn move_item(&mut self, key: &K, (): &(), before: Option<&K>) -> Result<()> {
        self.0.push(Patch::Move {
            key: key.clone(),
            before: before.cloned(),
        });
        Ok(())
    }

    fn delete(&mut self, key: &K) -> Result<()> {
        self.0.push(Patch::Delete { key: key.clone() });
        Ok(())
    }
}

/// Positions in `pairs` whose second components form a longest strictly
/// increasing subsequence.
fn longest_increasing(pairs: &[(usize, usize)]) -> Vec<usize> {
    // tails[k] is the position ending the best run of length k + 1.
    let mut tails: Vec<usize> = Vec::new();
    let mut previous: Vec<Option<usize>> = vec![None; pairs.len()];
    for (position, &(_, value)) in pairs.iter().enumerate() {
        let length = tails.partition_point(|&tail| pairs[tail].1 < value);
        if length > 0 {
            previous[position] = Some(tails[length - 1]);
        }
        if length == tails.len() {
            tails.push(position);
        } else {
            tails[length] = position;
        }
    }
    let mut run = Vec::with_capacity(tails.len());
    let mut cursor = tails.last().copied();
    while let Some(position) = cursor {
        run.push(position);
        cursor = previous[position];
    }
    run.reverse();
    run
}

/// Applies patches to a plain key vector.
#[cfg(test)]
pub(crate) fn apply<K: Clone + PartialEq>(old: &[K], patches: &[Patch<K>]) -> Vec<K> {
    let mut keys = old.to_vec();
    let place = |keys: &mut Vec<K>, key: &K, before: &Option<K>| {
        let index = before
            .as_ref()
            .and_then(|b| keys.iter().position(|k| k == b))
            .unwrap_or(keys.len());
        keys.insert(index, key.clone());
    };
    for patch in patches {
        match patch {
            Patch::Insert { key, before } => place(&mut keys, key, before),
            Patch::Move { key, before } => {
                keys.retain(|k| k != key);
                place(&mut keys, key, before);
            }
            Patch::Delete { key } => keys.retain(|k| k != key),
            Patch::Retain { .. } => {}
        }
    }
    keys
}
