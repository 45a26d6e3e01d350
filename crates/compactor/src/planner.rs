//! Batch planning: grouping source files into logical transcode units.
//!
//! Capture tools split long recordings into numbered fragments (`...-0000.avi`,
//! `...-0001.avi`, ...). In masked mode the fragments of one recording are recovered from the
//! file names alone and concatenated in index order.

use crate::discovery::SourceFile;
use crate::pattern::apply_mask;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Canonical identifier of a batch.
///
/// In simple mode this is the source path; in masked mode it is the source path with the
/// fragment index positions of the file name replaced by `#`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BatchKey(String);

impl BatchKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File stem of the key (last path component without extension).
    pub fn stem(&self) -> String {
        Path::new(&self.0)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

impl fmt::Display for BatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One logical transcode unit: one or more source files in concatenation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub key: BatchKey,
    /// Never empty; sorted ascending by file name.
    pub files: Vec<SourceFile>,
}

impl Batch {
    /// Batch of a single file, keyed by its own path.
    pub fn single(file: SourceFile) -> Self {
        Self {
            key: BatchKey::new(file.path.to_string_lossy()),
            files: vec![file],
        }
    }

    pub fn is_fragmented(&self) -> bool {
        self.files.len() > 1
    }

    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size_bytes).sum()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.files.iter().map(|f| f.path.clone()).collect()
    }
}

/// Grouping mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanMode {
    /// One batch per file
    Simple,
    /// Group fragments sharing a masked name; `#` marks the index positions
    Masked(String),
}

/// Ordered mapping from batch key to batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchPlan {
    batches: BTreeMap<BatchKey, Batch>,
}

impl BatchPlan {
    /// Number of batches.
    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Number of source files over all batches.
    pub fn file_count(&self) -> usize {
        self.batches.values().map(|b| b.files.len()).sum()
    }

    pub fn get(&self, key: &BatchKey) -> Option<&Batch> {
        self.batches.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Batch> {
        self.batches.values()
    }

    pub fn into_batches(self) -> Vec<Batch> {
        self.batches.into_values().collect()
    }
}

/// Derive the masked batch key of `file`.
pub fn masked_key(mask: &str, file: &SourceFile) -> BatchKey {
    let masked_name = apply_mask(mask, &file.file_name());
    let key = match file.path.parent() {
        Some(parent) => parent.join(masked_name),
        None => PathBuf::from(masked_name),
    };
    BatchKey::new(key.to_string_lossy())
}

/// Group `files` into batches.
pub fn plan(files: Vec<SourceFile>, mode: &PlanMode) -> BatchPlan {
    let mut batches: BTreeMap<BatchKey, Batch> = BTreeMap::new();

    match mode {
        PlanMode::Simple => {
            for file in files {
                let batch = Batch::single(file);
                batches.insert(batch.key.clone(), batch);
            }
        }
        PlanMode::Masked(mask) => {
            for file in files {
                let key = masked_key(mask, &file);
                batches
                    .entry(key.clone())
                    .or_insert_with(|| Batch {
                        key,
                        files: Vec::new(),
                    })
                    .files
                    .push(file);
            }
            // Zero-padded indices make name order equal fragment order
            for batch in batches.values_mut() {
                batch.files.sort_by_key(|f| f.file_name());
            }
        }
    }

    let plan = BatchPlan { batches };
    log::info!(
        "Found {} matching files in {} batches.",
        plan.file_count(),
        plan.len()
    );
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn source(path: &str) -> SourceFile {
        SourceFile {
            path: PathBuf::from(path),
            size_bytes: 100,
        }
    }

    #[test]
    fn test_simple_mode_one_batch_per_file() {
        let files = vec![source("/media/a.avi"), source("/media/b.avi")];
        let plan = plan(files, &PlanMode::Simple);

        assert_eq!(plan.len(), 2);
        assert_eq!(plan.file_count(), 2);
        let batch = plan.get(&BatchKey::new("/media/a.avi")).unwrap();
        assert_eq!(batch.files, vec![source("/media/a.avi")]);
        assert!(!batch.is_fragmented());
    }

    #[test]
    fn test_masked_mode_groups_fragments_by_recording() {
        // Deliberately out of order to check fragment sorting
        let files = vec![
            source("/media/rec_2024-01-01_part0002.avi"),
            source("/media/rec_2024-01-02_part0001.avi"),
            source("/media/rec_2024-01-01_part0001.avi"),
        ];
        let mask = "rec_??????????_part####.avi".to_string();
        let plan = plan(files, &PlanMode::Masked(mask));

        assert_eq!(plan.len(), 2);

        let first = plan
            .get(&BatchKey::new("/media/rec_2024-01-01_part####.avi"))
            .unwrap();
        let names: Vec<String> = first.files.iter().map(|f| f.file_name()).collect();
        assert_eq!(
            names,
            vec!["rec_2024-01-01_part0001.avi", "rec_2024-01-01_part0002.avi"]
        );
        assert!(first.is_fragmented());
        assert_eq!(first.total_bytes(), 200);

        let second = plan
            .get(&BatchKey::new("/media/rec_2024-01-02_part####.avi"))
            .unwrap();
        assert_eq!(second.files, vec![source("/media/rec_2024-01-02_part0001.avi")]);
    }

    #[test]
    fn test_batch_key_stem() {
        let key = BatchKey::new("/media/fc2_save_2024-01-01-120000-####.avi");
        assert_eq!(key.stem(), "fc2_save_2024-01-01-120000-####");
    }

    fn file_set_strategy() -> impl Strategy<Value = Vec<SourceFile>> {
        proptest::collection::btree_set(("[a-c]{2}", 0u32..20), 1..40).prop_map(|set| {
            set.into_iter()
                .map(|(rec, idx)| source(&format!("/media/{}-{:04}.avi", rec, idx)))
                .collect()
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        // Planning neither drops nor duplicates a file, in either mode
        #[test]
        fn prop_plan_conserves_files(files in file_set_strategy(), masked in proptest::bool::ANY) {
            let mode = if masked {
                PlanMode::Masked("??-####.avi".to_string())
            } else {
                PlanMode::Simple
            };

            let plan = plan(files.clone(), &mode);

            let mut planned: Vec<SourceFile> =
                plan.iter().flat_map(|b| b.files.iter().cloned()).collect();
            planned.sort();
            let mut expected = files;
            expected.sort();
            prop_assert_eq!(planned, expected);
            prop_assert!(plan.iter().all(|b| !b.files.is_empty()));
        }

        // Fragment names inside every batch are strictly increasing and share the key
        #[test]
        fn prop_masked_batches_are_ordered(files in file_set_strategy()) {
            let mask = "??-####.avi";
            let plan = plan(files, &PlanMode::Masked(mask.to_string()));

            for batch in plan.iter() {
                let names: Vec<String> = batch.files.iter().map(|f| f.file_name()).collect();
                prop_assert!(names.windows(2).all(|w| w[0] < w[1]));
                for file in &batch.files {
                    prop_assert_eq!(&masked_key(mask, file), &batch.key);
                }
            }
        }
    }
}
