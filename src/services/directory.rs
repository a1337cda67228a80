//! Subject directory, replaced wholesale by the HR system push

use crate::domain::types::{Subject, SubjectId};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;

pub struct SubjectDirectory {
    subjects: RwLock<FxHashMap<SubjectId, Arc<Subject>>>,
}

impl SubjectDirectory {
    pub fn new(subjects: Vec<Subject>) -> Self {
        let directory = Self { subjects: RwLock::new(FxHashMap::default()) };
        directory.replace_all(subjects);
        directory
    }

    pub fn get(&self, id: &SubjectId) -> Option<Arc<Subject>> {
        self.subjects.read().get(id).cloned()
    }

    pub fn contains(&self, id: &SubjectId) -> bool {
        self.subjects.read().contains_key(id)
    }

    /// Swap in a new roster. Later duplicates of an id win. Returns the new size.
    pub fn replace_all(&self, subjects: Vec<Subject>) -> usize {
        let map: FxHashMap<_, _> =
            subjects.into_iter().map(|s| (s.id.clone(), Arc::new(s))).collect();
        let len = map.len();
        *self.subjects.write() = map;
        len
    }

    /// All subjects ordered by id
    pub fn list(&self) -> Vec<Arc<Subject>> {
        let mut subjects: Vec<_> = self.subjects.read().values().cloned().collect();
        subjects.sort_by(|a, b| a.id.cmp(&b.id));
        subjects
    }

    pub fn len(&self) -> usize {
        self.subjects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
