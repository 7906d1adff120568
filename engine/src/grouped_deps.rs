// Copyright 2018 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use fnv::FnvHashSet as HashSet;

use crate::key::Key;

///
/// An ordered sequence of dependency groups, where a group is the (unordered) set of keys a
/// Function requested together in one `get_group` call. Group order is significant: it encodes
/// the order in which the Function made its requests, and during dirty-checking groups are
/// re-verified in that same order (`group[0]` first), stopping at the first group containing a
/// changed dependency.
///
/// Order *within* a group carries no meaning, but is preserved for iteration/debugging
/// convenience.
///
#[derive(Clone, Debug, Default)]
pub struct GroupedDependencies {
    groups: Vec<Vec<Key>>,
    members: HashSet<Key>,
}

impl GroupedDependencies {
    pub fn new() -> GroupedDependencies {
        GroupedDependencies::default()
    }

    /// Appends a single key as its own new group.
    pub fn push_single(&mut self, key: Key) {
        self.push_group(std::iter::once(key));
    }

    /// Appends a new group containing every key in `keys`, in the order given.
    pub fn push_group(&mut self, keys: impl IntoIterator<Item = Key>) {
        let mut group = Vec::new();
        for key in keys {
            debug_assert!(
                !self.members.contains(&key),
                "Key {key} requested in more than one group of the same node."
            );
            self.members.insert(key.clone());
            group.push(key);
        }
        if !group.is_empty() {
            self.groups.push(group);
        }
    }

    /// Removes every key in `to_remove` from every group, dropping groups that become empty.
    pub fn remove(&mut self, to_remove: &HashSet<Key>) {
        self.groups.retain_mut(|group| {
            group.retain(|key| !to_remove.contains(key));
            !group.is_empty()
        });
        self.members.retain(|key| !to_remove.contains(key));
    }

    pub fn groups(&self) -> &[Vec<Key>] {
        &self.groups
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.members.contains(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Key> {
        self.groups.iter().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::GroupedDependencies;
    use crate::key::Key;

    fn key(n: u32) -> Key {
        Key::new("test", n)
    }

    #[test]
    fn preserves_group_order() {
        let mut deps = GroupedDependencies::new();
        deps.push_group(vec![key(1), key(2)]);
        deps.push_single(key(3));
        assert_eq!(deps.groups().len(), 2);
        assert_eq!(deps.groups()[0].len(), 2);
        assert_eq!(deps.groups()[1], vec![key(3)]);
        assert_eq!(deps.len(), 3);
    }

    #[test]
    #[should_panic]
    fn duplicate_across_groups_is_rejected() {
        let mut deps = GroupedDependencies::new();
        deps.push_single(key(1));
        deps.push_single(key(1));
    }

    #[test]
    fn remove_drops_empty_groups() {
        let mut deps = GroupedDependencies::new();
        deps.push_group(vec![key(1), key(2)]);
        deps.push_single(key(3));
        let mut to_remove = fnv::FnvHashSet::default();
        to_remove.insert(key(3));
        deps.remove(&to_remove);
        assert_eq!(deps.groups().len(), 1);
        assert_eq!(deps.len(), 2);
    }
}
