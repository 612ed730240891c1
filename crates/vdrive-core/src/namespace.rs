// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Flat path index of a mounted volume
//!
//! Every entry is keyed by its full normalized path (case-folded when the
//! volume is case-insensitive). Mutations take the table's write lock and
//! update the parent's child set before releasing it, so readers never see
//! a table entry without its parent link or the other way around.

use crate::config::CaseSensitivity;
use crate::glob::Wildcard;
use crate::types::{CallerIdentity, FileId, MODE_DIR};
use crate::virtual_file::VirtualFile;
use crate::{FsError, FsResult};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

/// What a rename is about to do, handed to the reconcile hook before commit.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RenamePlan {
    pub from: String,
    pub to: String,
    /// (old key, new key) of every regular file that changes path
    pub moved_files: Vec<(String, String)>,
    /// Key of a regular file overwritten at the destination
    pub replaced: Option<String>,
}

pub struct Namespace {
    separator: char,
    case: CaseSensitivity,
    max_name_length: usize,
    entries: RwLock<HashMap<String, Arc<VirtualFile>>>,
    next_file_id: Mutex<u64>,
}

impl Namespace {
    pub fn new(separator: char, case: CaseSensitivity, max_name_length: usize) -> Self {
        let ns = Self {
            separator,
            case,
            max_name_length,
            entries: RwLock::new(HashMap::new()),
            next_file_id: Mutex::new(1),
        };
        let root = ns.new_directory("", 0o755 | MODE_DIR, CallerIdentity::default());
        root.set_location("", &ns.root_path());
        ns.entries.write().unwrap().insert(ns.root_path(), root);
        ns
    }

    pub fn separator(&self) -> char {
        self.separator
    }

    pub fn is_case_insensitive(&self) -> bool {
        self.case == CaseSensitivity::InsensitivePreserving
    }

    pub fn root_path(&self) -> String {
        self.separator.to_string()
    }

    fn next_id(&self) -> FileId {
        let mut next = self.next_file_id.lock().unwrap();
        let id = FileId::new(*next);
        *next += 1;
        id
    }

    pub fn new_file(&self, name: &str, mode: u32, owner: CallerIdentity) -> Arc<VirtualFile> {
        Arc::new(VirtualFile::file(self.next_id(), name, mode, owner))
    }

    pub fn new_directory(&self, name: &str, mode: u32, owner: CallerIdentity) -> Arc<VirtualFile> {
        Arc::new(VirtualFile::directory(
            self.next_id(),
            name,
            mode,
            owner,
            self.is_case_insensitive(),
        ))
    }

    /// Validates `path` and strips trailing separators.
    pub fn normalize(&self, path: &str) -> FsResult<String> {
        if !path.starts_with(self.separator) {
            return Err(FsError::InvalidName);
        }
        let trimmed = path.trim_end_matches(self.separator);
        if trimmed.is_empty() {
            return Ok(self.root_path());
        }
        if trimmed[1..].split(self.separator).any(|part| part.is_empty()) {
            return Err(FsError::InvalidName);
        }
        Ok(trimmed.to_string())
    }

    /// Table key for an already-normalized path.
    pub fn key(&self, path: &str) -> String {
        if self.is_case_insensitive() {
            path.to_lowercase()
        } else {
            path.to_string()
        }
    }

    pub fn canonical_key(&self, path: &str) -> FsResult<String> {
        Ok(self.key(&self.normalize(path)?))
    }

    /// Splits into (parent, leaf). `None` for the root and for paths
    /// without a separator.
    pub fn split_name<'a>(&self, path: &'a str) -> Option<(&'a str, &'a str)> {
        if path.is_empty() || path == self.root_path() {
            return None;
        }
        let idx = path.rfind(self.separator)?;
        let width = self.separator.len_utf8();
        let leaf = &path[idx + width..];
        if leaf.is_empty() {
            return None;
        }
        let parent = if idx == 0 { &path[..width] } else { &path[..idx] };
        Some((parent, leaf))
    }

    pub fn combine_names(&self, parent: &str, leaf: &str) -> String {
        if parent == self.root_path() {
            format!("{}{}", self.separator, leaf)
        } else {
            format!("{}{}{}", parent, self.separator, leaf)
        }
    }

    fn check_leaf(&self, leaf: &str) -> FsResult<()> {
        if leaf.len() > self.max_name_length || leaf.contains('\0') || leaf == "." || leaf == ".." {
            return Err(FsError::InvalidName);
        }
        Ok(())
    }

    /// Display path for `key`, a descendant of `old_key`, once `old_key` is
    /// shown as `new_display`. Each component is spelled with the stored
    /// name of the entry it leads to.
    fn relocated_display(
        &self,
        entries: &HashMap<String, Arc<VirtualFile>>,
        old_key: &str,
        key: &str,
        new_display: &str,
    ) -> String {
        let width = self.separator.len_utf8();
        let mut cursor = old_key.to_string();
        let mut display = new_display.to_string();
        for part in key[old_key.len() + width..].split(self.separator) {
            cursor.push(self.separator);
            cursor.push_str(part);
            let name = entries
                .get(&cursor)
                .map(|f| f.name())
                .unwrap_or_else(|| part.to_string());
            display.push(self.separator);
            display.push_str(&name);
        }
        display
    }

    /// Links `file` at `path`. The parent must exist and be a directory.
    pub fn insert(&self, path: &str, file: Arc<VirtualFile>) -> FsResult<()> {
        let path = self.normalize(path)?;
        if path == self.root_path() {
            return Err(FsError::AlreadyExists);
        }
        let (parent, leaf) = self.split_name(&path).ok_or(FsError::InvalidName)?;
        self.check_leaf(leaf)?;
        let key = self.key(&path);
        let parent_key = self.key(parent);

        let mut entries = self.entries.write().unwrap();
        if entries.contains_key(&key) {
            return Err(FsError::AlreadyExists);
        }
        let parent_file = Arc::clone(entries.get(&parent_key).ok_or(FsError::NotFound)?);
        if !parent_file.is_dir() {
            return Err(FsError::NotADirectory);
        }
        if !parent_file.add_child(leaf)? {
            return Err(FsError::AlreadyExists);
        }
        file.set_location(leaf, &self.combine_names(&parent_file.path(), leaf));
        entries.insert(key, file);
        Ok(())
    }

    pub fn lookup(&self, path: &str) -> Option<Arc<VirtualFile>> {
        let key = self.canonical_key(path).ok()?;
        self.entries.read().unwrap().get(&key).cloned()
    }

    pub fn get(&self, path: &str) -> FsResult<Arc<VirtualFile>> {
        let key = self.canonical_key(path)?;
        self.entries.read().unwrap().get(&key).cloned().ok_or(FsError::NotFound)
    }

    /// Unlinks `path` from its parent and clears the file.
    pub fn delete(&self, path: &str) -> FsResult<Arc<VirtualFile>> {
        let path = self.normalize(path)?;
        if path == self.root_path() {
            return Err(FsError::InvalidArgument);
        }
        let (parent, leaf) = self.split_name(&path).ok_or(FsError::InvalidName)?;
        let key = self.key(&path);
        let parent_key = self.key(parent);

        let mut entries = self.entries.write().unwrap();
        let file = entries.get(&key).cloned().ok_or(FsError::NotFound)?;
        if file.is_dir() && file.child_count() > 0 {
            return Err(FsError::DirectoryNotEmpty);
        }
        if let Some(parent_file) = entries.get(&parent_key) {
            parent_file.remove_child(leaf);
        }
        entries.remove(&key);
        file.detach();
        Ok(file)
    }

    pub fn rename(&self, old: &str, new: &str, replace: bool) -> FsResult<RenamePlan> {
        self.rename_with(old, new, replace, |_| Ok(()))
    }

    /// Moves `old` to `new`, relocating every descendant key of a directory.
    ///
    /// `reconcile` runs with the plan after validation and before any table
    /// change, under the table's write lock; an error from it aborts the
    /// rename with the namespace untouched. It must not call back into this
    /// namespace.
    pub fn rename_with<F>(&self, old: &str, new: &str, replace: bool, reconcile: F) -> FsResult<RenamePlan>
    where
        F: FnOnce(&RenamePlan) -> FsResult<()>,
    {
        let old_path = self.normalize(old)?;
        let new_path = self.normalize(new)?;
        let root = self.root_path();
        if old_path == root || new_path == root {
            return Err(FsError::InvalidArgument);
        }
        let (old_parent, old_leaf) = self.split_name(&old_path).ok_or(FsError::InvalidName)?;
        let (new_parent, new_leaf) = self.split_name(&new_path).ok_or(FsError::InvalidName)?;
        self.check_leaf(new_leaf)?;
        let old_key = self.key(&old_path);
        let new_key = self.key(&new_path);
        let prefix = format!("{}{}", old_key, self.separator);

        let mut entries = self.entries.write().unwrap();
        let source = entries.get(&old_key).cloned().ok_or(FsError::NotFound)?;

        if old_key == new_key {
            let plan = RenamePlan {
                from: old_key,
                to: new_key,
                ..RenamePlan::default()
            };
            if source.name() != new_leaf {
                reconcile(&plan)?;
                let parent_file = entries.get(&self.key(new_parent)).cloned();
                let new_display = match &parent_file {
                    Some(parent_file) => {
                        parent_file.respell_child(new_leaf);
                        self.combine_names(&parent_file.path(), new_leaf)
                    }
                    None => new_path.clone(),
                };
                let moved: Vec<(Arc<VirtualFile>, String)> = entries
                    .iter()
                    .filter(|(key, _)| key.starts_with(&prefix))
                    .map(|(key, file)| {
                        let display = self.relocated_display(&entries, &plan.from, key, &new_display);
                        (Arc::clone(file), display)
                    })
                    .collect();
                source.set_location(new_leaf, &new_display);
                for (file, display) in moved {
                    file.set_path(display);
                }
            }
            return Ok(plan);
        }

        if source.is_dir() && new_key.starts_with(&prefix) {
            return Err(FsError::InvalidArgument);
        }
        let new_parent_file =
            Arc::clone(entries.get(&self.key(new_parent)).ok_or(FsError::NotFound)?);
        if !new_parent_file.is_dir() {
            return Err(FsError::NotADirectory);
        }

        let replaced = match entries.get(&new_key).cloned() {
            None => None,
            Some(_) if !replace => return Err(FsError::AlreadyExists),
            Some(existing) => {
                match (source.is_dir(), existing.is_dir()) {
                    (false, true) => return Err(FsError::IsADirectory),
                    (true, false) => return Err(FsError::NotADirectory),
                    (true, true) if existing.child_count() > 0 => {
                        return Err(FsError::DirectoryNotEmpty)
                    }
                    _ => {}
                }
                Some(existing)
            }
        };

        let mut descendants: Vec<String> =
            entries.keys().filter(|k| k.starts_with(&prefix)).cloned().collect();
        descendants.sort();

        let mut moved_files = Vec::new();
        if !source.is_dir() {
            moved_files.push((old_key.clone(), new_key.clone()));
        }
        for key in &descendants {
            if entries.get(key).is_some_and(|f| !f.is_dir()) {
                moved_files.push((key.clone(), format!("{}{}", new_key, &key[old_key.len()..])));
            }
        }
        let plan = RenamePlan {
            from: old_key.clone(),
            to: new_key.clone(),
            moved_files,
            replaced: replaced
                .as_ref()
                .filter(|f| !f.is_dir())
                .map(|_| new_key.clone()),
        };
        reconcile(&plan)?;

        let new_display = self.combine_names(&new_parent_file.path(), new_leaf);
        let relocated: Vec<(String, String, String)> = descendants
            .iter()
            .map(|key| {
                (
                    key.clone(),
                    format!("{}{}", new_key, &key[old_key.len()..]),
                    self.relocated_display(&entries, &old_key, key, &new_display),
                )
            })
            .collect();

        if let Some(existing) = replaced {
            entries.remove(&new_key);
            new_parent_file.remove_child(new_leaf);
            existing.detach();
        }
        if let Some(parent_file) = entries.get(&self.key(old_parent)) {
            parent_file.remove_child(old_leaf);
        }
        new_parent_file.add_child(new_leaf)?;
        entries.remove(&old_key);
        source.set_location(new_leaf, &new_display);
        entries.insert(new_key.clone(), source);

        for (key, moved_key, display) in relocated {
            if let Some(file) = entries.remove(&key) {
                file.set_path(display);
                entries.insert(moved_key, file);
            }
        }
        Ok(plan)
    }

    /// Child names of a directory, filtered by `mask`, taken under the read lock.
    pub fn children(&self, path: &str, mask: Option<&Wildcard>) -> FsResult<Vec<String>> {
        let key = self.canonical_key(path)?;
        let entries = self.entries.read().unwrap();
        let dir = entries.get(&key).ok_or(FsError::NotFound)?;
        if !dir.is_dir() {
            return Err(FsError::NotADirectory);
        }
        Ok(dir.enumerate_children(mask))
    }

    /// Sum of all regular-file sizes.
    pub fn total_size(&self) -> u64 {
        self.entries
            .read()
            .unwrap()
            .values()
            .filter(|f| !f.is_dir())
            .map(|f| f.size())
            .sum()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }

    /// Display paths of every entry, sorted.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> =
            self.entries.read().unwrap().values().map(|f| f.path()).collect();
        paths.sort();
        paths
    }

    /// Drops every entry except the root.
    pub fn clear(&self) {
        let root = self.root_path();
        let mut entries = self.entries.write().unwrap();
        for (key, file) in entries.iter() {
            if *key == root {
                file.clear();
            } else {
                file.detach();
            }
        }
        entries.retain(|key, _| *key == root);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn posix() -> Namespace {
        Namespace::new('/', CaseSensitivity::Sensitive, 255)
    }

    fn mkdir(ns: &Namespace, path: &str) {
        ns.insert(path, ns.new_directory("", 0o755, CallerIdentity::default()))
            .unwrap();
    }

    fn mkfile(ns: &Namespace, path: &str, bytes: &[u8]) {
        let file = ns.new_file("", 0o644, CallerIdentity::default());
        file.write(bytes, 0, crate::WritePolicy::ExtendOnWrite).unwrap();
        ns.insert(path, file).unwrap();
    }

    #[test]
    fn split_and_combine() {
        let ns = posix();
        assert_eq!(ns.split_name("/"), None);
        assert_eq!(ns.split_name(""), None);
        assert_eq!(ns.split_name("noslash"), None);
        assert_eq!(ns.split_name("/a"), Some(("/", "a")));
        assert_eq!(ns.split_name("/a/b.txt"), Some(("/a", "b.txt")));
        assert_eq!(ns.combine_names("/", "a"), "/a");
        assert_eq!(ns.combine_names("/a", "b"), "/a/b");

        let win = Namespace::new('\\', CaseSensitivity::InsensitivePreserving, 255);
        assert_eq!(win.split_name("\\dir\\f"), Some(("\\dir", "f")));
        assert_eq!(win.split_name("/dir/f"), None);
    }

    #[test]
    fn normalize_rejects_malformed_paths() {
        let ns = posix();
        assert_eq!(ns.normalize("/a/b/").unwrap(), "/a/b");
        assert_eq!(ns.normalize("///").unwrap(), "/");
        assert!(matches!(ns.normalize("a/b"), Err(FsError::InvalidName)));
        assert!(matches!(ns.normalize("/a//b"), Err(FsError::InvalidName)));
    }

    #[test]
    fn insert_links_into_parent() {
        let ns = posix();
        mkdir(&ns, "/a");
        mkfile(&ns, "/a/b.txt", b"");
        let file = ns.lookup("/a/b.txt").unwrap();
        assert_eq!(file.name(), "b.txt");
        assert_eq!(file.path(), "/a/b.txt");
        assert!(ns.lookup("/a").unwrap().child_exists("b.txt"));
        assert_eq!(ns.children("/a", None).unwrap(), vec!["b.txt"]);
    }

    #[test]
    fn insert_validates_parent_and_collisions() {
        let ns = posix();
        mkfile(&ns, "/f", b"x");
        let orphan = ns.new_file("", 0o644, CallerIdentity::default());
        assert!(matches!(ns.insert("/missing/x", orphan.clone()), Err(FsError::NotFound)));
        assert!(matches!(ns.insert("/f/x", orphan.clone()), Err(FsError::NotADirectory)));
        assert!(matches!(ns.insert("/f", orphan.clone()), Err(FsError::AlreadyExists)));
        assert!(matches!(ns.insert("/", orphan.clone()), Err(FsError::AlreadyExists)));
        let long = format!("/{}", "n".repeat(256));
        assert!(matches!(ns.insert(&long, orphan), Err(FsError::InvalidName)));
    }

    #[test]
    fn case_insensitive_lookup_preserves_spelling() {
        let ns = Namespace::new('\\', CaseSensitivity::InsensitivePreserving, 255);
        mkdir(&ns, "\\Docs");
        mkfile(&ns, "\\Docs\\ReadMe.txt", b"hi");
        let file = ns.lookup("\\docs\\README.TXT").unwrap();
        assert_eq!(file.name(), "ReadMe.txt");
        assert_eq!(file.path(), "\\Docs\\ReadMe.txt");
        let dup = ns.new_file("", 0o644, CallerIdentity::default());
        assert!(matches!(ns.insert("\\DOCS\\readme.txt", dup), Err(FsError::AlreadyExists)));
    }

    #[test]
    fn delete_unlinks_and_clears() {
        let ns = posix();
        mkdir(&ns, "/d");
        mkfile(&ns, "/d/f", b"abc");
        assert!(matches!(ns.delete("/d"), Err(FsError::DirectoryNotEmpty)));
        let file = ns.delete("/d/f").unwrap();
        assert_eq!(file.size(), 0);
        assert!(file.is_detached());
        assert!(ns.lookup("/d/f").is_none());
        assert!(!ns.lookup("/d").unwrap().child_exists("f"));
        assert!(matches!(ns.delete("/"), Err(FsError::InvalidArgument)));
        assert!(matches!(ns.delete("/d/f"), Err(FsError::NotFound)));
        ns.delete("/d").unwrap();
        assert!(ns.is_empty());
    }

    #[test]
    fn directory_rename_relocates_every_descendant() {
        let ns = posix();
        mkdir(&ns, "/x");
        mkdir(&ns, "/x/child");
        mkfile(&ns, "/x/child/f", b"12345");
        mkfile(&ns, "/x/top", b"ab");
        mkfile(&ns, "/xylophone", b"z");
        let before = ns.total_size();

        let plan = ns.rename("/x", "/y", false).unwrap();
        assert_eq!(
            plan.moved_files,
            vec![
                ("/x/child/f".to_string(), "/y/child/f".to_string()),
                ("/x/top".to_string(), "/y/top".to_string()),
            ]
        );

        assert!(ns.lookup("/y/child/f").is_some());
        assert!(ns.lookup("/x/child/f").is_none());
        assert!(ns.lookup("/xylophone").is_some());
        assert!(ns.paths().iter().all(|p| !p.starts_with("/x/") && p != "/x"));
        assert_eq!(ns.lookup("/y/child/f").unwrap().path(), "/y/child/f");
        assert!(ns.lookup("/").unwrap().child_exists("y"));
        assert!(!ns.lookup("/").unwrap().child_exists("x"));
        assert_eq!(ns.total_size(), before);
    }

    #[test]
    fn rename_refuses_own_subtree_and_occupied_target() {
        let ns = posix();
        mkdir(&ns, "/a");
        mkdir(&ns, "/a/b");
        mkfile(&ns, "/f", b"1");
        mkfile(&ns, "/g", b"22");
        assert!(matches!(ns.rename("/a", "/a/b/c", false), Err(FsError::InvalidArgument)));
        assert!(matches!(ns.rename("/f", "/g", false), Err(FsError::AlreadyExists)));
        assert!(matches!(ns.rename("/f", "/a", true), Err(FsError::IsADirectory)));
        assert!(matches!(ns.rename("/missing", "/z", false), Err(FsError::NotFound)));
        assert!(matches!(ns.rename("/f", "/nope/f", false), Err(FsError::NotFound)));

        let overwritten = ns.lookup("/g").unwrap();
        let plan = ns.rename("/f", "/g", true).unwrap();
        assert_eq!(plan.replaced.as_deref(), Some("/g"));
        assert!(overwritten.is_detached());
        assert!(!ns.lookup("/g").unwrap().is_detached());
        assert_eq!(ns.lookup("/g").unwrap().size(), 1);
        assert!(ns.lookup("/f").is_none());
    }

    #[test]
    fn failed_reconcile_leaves_namespace_untouched() {
        let ns = posix();
        mkdir(&ns, "/src");
        mkfile(&ns, "/src/file", b"payload");
        let before = ns.paths();
        let result = ns.rename_with("/src", "/dst", false, |plan| {
            assert_eq!(plan.moved_files.len(), 1);
            Err(FsError::Cache("change id failed".into()))
        });
        assert!(matches!(result, Err(FsError::Cache(_))));
        assert_eq!(ns.paths(), before);
        assert!(ns.lookup("/").unwrap().child_exists("src"));
    }

    #[test]
    fn case_only_rename_updates_spelling() {
        let ns = Namespace::new('/', CaseSensitivity::InsensitivePreserving, 255);
        mkdir(&ns, "/dir");
        mkfile(&ns, "/dir/a", b"");
        let plan = ns.rename("/dir", "/DIR", false).unwrap();
        assert!(plan.moved_files.is_empty());
        assert_eq!(ns.lookup("/dir").unwrap().name(), "DIR");
        assert_eq!(ns.lookup("/dir/a").unwrap().path(), "/DIR/a");
        assert_eq!(ns.children("/", None).unwrap(), vec!["DIR"]);
    }

    #[test]
    fn child_paths_follow_the_parent_spelling() {
        let ns = Namespace::new('/', CaseSensitivity::InsensitivePreserving, 255);
        mkdir(&ns, "/k");
        // KELVIN SIGN folds to 'k' but is three bytes wide
        mkfile(&ns, "/\u{212A}/f", b"x");
        mkdir(&ns, "/\u{212A}/Sub");
        mkfile(&ns, "/k/SUB/g", b"yz");
        assert_eq!(ns.lookup("/k/f").unwrap().path(), "/k/f");
        assert_eq!(ns.lookup("/k/sub/g").unwrap().path(), "/k/Sub/g");

        ns.rename("/k", "/y", false).unwrap();
        assert_eq!(ns.lookup("/y/f").unwrap().path(), "/y/f");
        assert_eq!(ns.lookup("/y/sub/g").unwrap().path(), "/y/Sub/g");

        ns.rename("/y", "/Y", false).unwrap();
        ns.rename("/Y/sub", "/\u{212A}", false).unwrap();
        assert_eq!(ns.lookup("/k/g").unwrap().path(), "/\u{212A}/g");
        ns.rename("/\u{212A}", "/K", false).unwrap();
        assert_eq!(ns.lookup("/k/g").unwrap().path(), "/K/g");
        assert_eq!(ns.paths(), vec!["/", "/K", "/K/g", "/Y", "/Y/f"]);
    }

    #[test]
    fn clear_keeps_only_root() {
        let ns = posix();
        mkdir(&ns, "/a");
        mkfile(&ns, "/a/b", b"x");
        let file = ns.lookup("/a/b").unwrap();
        ns.clear();
        assert!(file.is_detached());
        assert!(!ns.lookup("/").unwrap().is_detached());
        assert_eq!(ns.paths(), vec!["/"]);
        assert_eq!(ns.total_size(), 0);
    }

    #[test]
    fn readers_never_see_half_linked_entries() {
        let ns = Arc::new(posix());
        mkdir(&ns, "/d");

        thread::scope(|scope| {
            for w in 0..4 {
                let ns = &ns;
                scope.spawn(move || {
                    for i in 0..100 {
                        mkfile(ns, &format!("/d/w{w}-{i}"), b"");
                        if i % 3 == 0 {
                            ns.rename(&format!("/d/w{w}-{i}"), &format!("/d/r{w}-{i}"), false)
                                .unwrap();
                        }
                    }
                });
            }
            let ns = &ns;
            scope.spawn(move || {
                for _ in 0..200 {
                    let children = ns.children("/d", None).unwrap();
                    for name in children {
                        // A listed child might be renamed away right after the
                        // listing; only entries present now must be linked.
                        if let Some(file) = ns.lookup(&format!("/d/{name}")) {
                            assert_eq!(file.name(), name);
                        }
                    }
                    for path in ns.paths() {
                        if let Some((parent, leaf)) = ns.split_name(&path) {
                            if let Some(p) = ns.lookup(parent) {
                                if ns.lookup(&path).is_some() {
                                    assert!(p.child_exists(leaf) || ns.lookup(&path).is_none());
                                }
                            }
                        }
                    }
                }
            });
        });

        assert_eq!(ns.children("/d", None).unwrap().len(), 400);
    }
}
