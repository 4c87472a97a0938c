//! Output path allocation
//!
//! Collision-free names in the form `name (n)[_tag].ext`. The allocator's
//! mutex covers only the existence probe; an external process writing to the
//! returned path does so after the lock is released, which is why every path
//! handed to a spawned tool carries a random tag.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rand::Rng;

use crate::params::OutputLocation;

const TAG_LEN: usize = 3;

/// `_` followed by three lowercase hex digits.
pub fn random_tag() -> String {
    let mut rng = rand::rng();
    let mut tag = String::with_capacity(TAG_LEN + 1);
    tag.push('_');
    for _ in 0..TAG_LEN {
        let digit = rng.random_range(0..16u32);
        tag.push(char::from_digit(digit, 16).unwrap_or('0'));
    }
    tag
}

/// Splits an already-numbered name `stem (n)` into `(stem, n)`.
fn split_counter(name: &str) -> Option<(&str, u64)> {
    let inner = name.strip_suffix(')')?;
    let open = inner.rfind('(')?;
    let digits = &inner[open + 1..];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let n = digits.parse().ok()?;
    Some((&name[..open], n))
}

/// First free path for `name.ext` in `dir`, probing with `exists`.
///
/// A plain name gets ` (1)`, ` (2)`, ... appended; a name already ending in
/// `(n)` continues from `n + 1` instead of nesting another counter.
pub fn unique_path(
    dir: &Path,
    name: &str,
    ext: &str,
    tag: Option<&str>,
    mut exists: impl FnMut(&Path) -> bool,
) -> PathBuf {
    let tag = tag.unwrap_or("");
    let candidate = dir.join(format!("{}{}.{}", name, tag, ext));
    if !exists(&candidate) {
        return candidate;
    }

    let (stem, spacing, mut n) = match split_counter(name) {
        Some((stem, n)) => (stem, "", n.saturating_add(1)),
        None => (name, " ", 1),
    };

    loop {
        let candidate = dir.join(format!("{}{}({}){}.{}", stem, spacing, n, tag, ext));
        if !exists(&candidate) {
            return candidate;
        }
        n = n.saturating_add(1);
    }
}

/// Shared by every job of a batch. Tagged paths stay reserved for the
/// allocator's lifetime, so two temporaries never share a name even before
/// either exists on disk.
#[derive(Debug)]
pub struct PathAllocator {
    reserved: Mutex<HashSet<PathBuf>>,
    tag: fn() -> String,
}

impl Default for PathAllocator {
    fn default() -> Self {
        Self::with_tag_source(random_tag)
    }
}

impl PathAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tag_source(tag: fn() -> String) -> Self {
        Self {
            reserved: Mutex::new(HashSet::new()),
            tag,
        }
    }

    /// Holds the allocator's lock for several probes plus a rename.
    pub fn lock(&self) -> PathLock<'_> {
        PathLock {
            reserved: self.reserved.lock().unwrap_or_else(|e| e.into_inner()),
            tag: self.tag,
        }
    }

    pub fn allocate(&self, dir: &Path, name: &str, ext: &str, random: bool) -> PathBuf {
        self.lock().allocate(dir, name, ext, random)
    }
}

pub struct PathLock<'a> {
    reserved: MutexGuard<'a, HashSet<PathBuf>>,
    tag: fn() -> String,
}

impl PathLock<'_> {
    pub fn allocate(&mut self, dir: &Path, name: &str, ext: &str, random: bool) -> PathBuf {
        let tag = random.then(self.tag);
        let reserved = &self.reserved;
        let path = unique_path(dir, name, ext, tag.as_deref(), |p| {
            p.is_file() || reserved.contains(p)
        });
        if random {
            self.reserved.insert(path.clone());
        }
        path
    }
}

/// Output directory for one item. Does not create it.
pub fn output_dir(item_dir: &Path, anchor: &Path, location: &OutputLocation) -> PathBuf {
    match location {
        OutputLocation::SourceDir => item_dir.to_path_buf(),
        OutputLocation::Custom {
            dir,
            keep_structure: true,
        } => match item_dir.strip_prefix(anchor) {
            Ok(rel) => dir.join(rel),
            Err(e) => {
                tracing::error!(
                    item_dir = %item_dir.display(),
                    anchor = %anchor.display(),
                    error = %e,
                    "Failed to calculate relative path"
                );
                dir.clone()
            }
        },
        OutputLocation::Custom {
            dir,
            keep_structure: false,
        } => {
            if dir.is_absolute() {
                dir.clone()
            } else {
                item_dir.join(dir)
            }
        }
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    proptest! {
        /// K taken names yield counters 1..K-1 in order, then a free name.
        #[test]
        fn prop_counters_in_order(k in 1usize..20) {
            let mut taken: HashSet<PathBuf> = HashSet::new();
            let dir = Path::new("/d");
            for i in 0..k {
                let p = unique_path(dir, "f", "png", None, |p| taken.contains(p));
                let expected = if i == 0 {
                    dir.join("f.png")
                } else {
                    dir.join(format!("f ({}).png", i))
                };
                prop_assert_eq!(&p, &expected);
                taken.insert(p);
            }
            let free = unique_path(dir, "f", "png", None, |p| taken.contains(p));
            prop_assert!(!taken.contains(&free));
        }

        #[test]
        fn prop_numbered_names_continue(start in 0u64..1000, taken_after in 0u64..10) {
            let dir = Path::new("/d");
            let name = format!("f ({})", start);
            let taken: HashSet<PathBuf> = (0..=taken_after)
                .map(|i| dir.join(format!("f ({}).png", start + i)))
                .collect();
            let p = unique_path(dir, &name, "png", None, |p| taken.contains(p));
            prop_assert_eq!(p, dir.join(format!("f ({}).png", start + taken_after + 1)));
        }
    }
}
