//! Generational arena used to store DAG nodes without reified ownership
//! cycles: nodes refer to each other by [`Entry`] handle rather than by
//! owned reference, so the arena (and not the nodes) is the single owner.

/// A handle into an [`EntryList`]. Carries a generation counter so a stale
/// handle into a slot that has since been reused is detectable rather than
/// silently aliasing unrelated data.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct Entry {
    id: usize,
    gen: usize,
}

impl Entry {
    pub(crate) fn new(id: usize, gen: usize) -> Self {
        Self { id, gen }
    }
}

/// Entry-based list using generation markers to identify used slots
/// efficiently, without shifting elements on removal.
#[derive(Debug, Clone)]
pub struct EntryList<T> {
    items: Vec<(usize, Option<T>)>,
    free_entries: Vec<Entry>,
}

impl<T> Default for EntryList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EntryList<T> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            free_entries: Vec::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            free_entries: Vec::new(),
        }
    }

    /// How many slots currently hold a live value.
    pub fn active_slots(&self) -> usize {
        self.items.len() - self.free_entries.len()
    }

    pub fn get(&self, entry: &Entry) -> Option<&T> {
        match self.items.get(entry.id) {
            Some((gen, value)) if *gen == entry.gen => value.as_ref(),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, entry: &Entry) -> Option<&mut T> {
        match self.items.get_mut(entry.id) {
            Some((gen, value)) if *gen == entry.gen => value.as_mut(),
            _ => None,
        }
    }

    pub fn has(&self, entry: &Entry) -> bool {
        self.get(entry).is_some()
    }

    /// Removes and returns the value pointed to by `entry`, invalidating the
    /// handle (the generation is not bumped here: the slot is simply marked
    /// free and will get a bumped generation the next time it is reused by
    /// [`EntryList::insert`]).
    pub fn take(&mut self, entry: &Entry) -> Option<T> {
        if let Some((gen, value)) = self.items.get_mut(entry.id) {
            if *gen == entry.gen {
                if let Some(taken) = value.take() {
                    self.free_entries.push(*entry);
                    return Some(taken);
                }
            }
        }
        None
    }

    /// Inserts a new value, returning the handle that now owns it.
    pub fn insert(&mut self, item: T) -> Entry {
        let entry = match self.free_entries.pop() {
            Some(mut reused) => {
                reused.gen += 1;
                reused
            }
            None => Entry::new(self.items.len(), 0),
        };

        if self.items.len() == entry.id {
            self.items.push((entry.gen, Some(item)));
        } else {
            self.items[entry.id] = (entry.gen, Some(item));
        }

        entry
    }
}
