use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt::Write as _;

use modforge_core::{EntryKind, FileEntry};

use super::paths;
use super::tracker::ChangeTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    New,
    Modified,
    Synced,
}

impl FileStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FileStatus::New => "new",
            FileStatus::Modified => "modified",
            FileStatus::Synced => "synced",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeNode {
    Directory {
        path: String,
        expanded: bool,
        children: Vec<TreeNode>,
    },
    File {
        path: String,
        status: FileStatus,
        hash: Option<String>,
        size: Option<u64>,
    },
}

impl TreeNode {
    pub fn path(&self) -> &str {
        match self {
            TreeNode::Directory { path, .. } | TreeNode::File { path, .. } => path,
        }
    }

    pub fn name(&self) -> &str {
        paths::file_name(self.path())
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, TreeNode::Directory { .. })
    }

    pub fn status(&self) -> Option<FileStatus> {
        match self {
            TreeNode::File { status, .. } => Some(*status),
            TreeNode::Directory { .. } => None,
        }
    }

    pub fn children(&self) -> &[TreeNode] {
        match self {
            TreeNode::Directory { children, .. } => children,
            TreeNode::File { .. } => &[],
        }
    }

    fn sort_key(&self) -> (u8, &str) {
        (u8::from(!self.is_directory()), self.path())
    }
}

/// Hierarchy shown to the user; derived on every reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeView {
    pub roots: Vec<TreeNode>,
}

impl TreeView {
    pub fn find(&self, path: &str) -> Option<&TreeNode> {
        let mut level = self.roots.as_slice();
        loop {
            let node = level
                .iter()
                .find(|node| node.path() == path || paths::is_within(path, node.path()))?;
            if node.path() == path {
                return Some(node);
            }
            level = node.children();
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.find(path).is_some()
    }

    pub fn status_of(&self, path: &str) -> Option<FileStatus> {
        self.find(path).and_then(TreeNode::status)
    }

    /// Every file path at or below `path`, in display order.
    pub fn files_under(&self, path: &str) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(node) = self.find(path) {
            collect_files(node, &mut out);
        }
        out
    }

    pub fn file_paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        for node in &self.roots {
            collect_files(node, &mut out);
        }
        out
    }

    /// Indented text rendering, one node per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for node in &self.roots {
            render_node(node, 0, &mut out);
        }
        out
    }
}

fn collect_files(node: &TreeNode, out: &mut Vec<String>) {
    match node {
        TreeNode::File { path, .. } => out.push(path.clone()),
        TreeNode::Directory { children, .. } => {
            for child in children {
                collect_files(child, out);
            }
        }
    }
}

fn render_node(node: &TreeNode, depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    match node {
        TreeNode::Directory { children, .. } => {
            let _ = writeln!(out, "{indent}{}/", node.name());
            for child in children {
                render_node(child, depth + 1, out);
            }
        }
        TreeNode::File { status, .. } => match status {
            FileStatus::Synced => {
                let _ = writeln!(out, "{indent}{}", node.name());
            }
            other => {
                let _ = writeln!(out, "{indent}{} [{}]", node.name(), other.as_str());
            }
        },
    }
}

/// Removes pending deletions the snapshot confirms as gone. This is the only place
/// paths leave the suppression set outside of a full reset.
pub fn confirm_deletions(snapshot: &[FileEntry], tracker: &mut ChangeTracker) -> Vec<String> {
    let remote_paths: HashSet<&str> = snapshot.iter().map(|entry| entry.path.as_str()).collect();
    tracker.confirm_deletions(&remote_paths)
}

struct WorkNode {
    kind: EntryKind,
    status: FileStatus,
    hash: Option<String>,
    size: Option<u64>,
}

/// Merges the remote snapshot with local changes. Pure: equal inputs give equal trees.
pub fn reconcile(
    snapshot: &[FileEntry],
    tracker: &ChangeTracker,
    expanded: &HashSet<String>,
) -> TreeView {
    let mut work: BTreeMap<String, WorkNode> = BTreeMap::new();

    for entry in snapshot {
        if tracker.is_pending_deletion(&entry.path) || tracker.is_created(&entry.path) {
            continue;
        }
        let status = if entry.kind == EntryKind::File && tracker.is_modified(&entry.path) {
            FileStatus::Modified
        } else {
            FileStatus::Synced
        };
        work.insert(
            entry.path.clone(),
            WorkNode {
                kind: entry.kind,
                status,
                hash: Some(entry.hash.clone()),
                size: entry.size,
            },
        );
    }

    for path in tracker.created() {
        work.insert(
            path.to_string(),
            WorkNode {
                kind: EntryKind::File,
                status: FileStatus::New,
                hash: None,
                size: None,
            },
        );
        for ancestor in paths::ancestors(path) {
            work.entry(ancestor.to_string()).or_insert(WorkNode {
                kind: EntryKind::Directory,
                status: FileStatus::New,
                hash: None,
                size: None,
            });
        }
    }

    // Git cannot hold an empty tree, so a directory whose files are all suppressed
    // is already gone as far as the user is concerned.
    let occupied: BTreeSet<&str> = work
        .iter()
        .filter(|(_, node)| node.kind == EntryKind::File)
        .flat_map(|(path, _)| paths::ancestors(path))
        .collect();
    let empty_dirs: Vec<String> = work
        .iter()
        .filter(|(path, node)| node.kind == EntryKind::Directory && !occupied.contains(path.as_str()))
        .map(|(path, _)| path.clone())
        .collect();
    for path in empty_dirs {
        work.remove(&path);
    }

    let mut children_of: HashMap<Option<String>, Vec<String>> = HashMap::new();
    for path in work.keys() {
        let parent = paths::parent_of(path)
            .filter(|parent| {
                work.get(*parent)
                    .is_some_and(|node| node.kind == EntryKind::Directory)
            })
            .map(str::to_string);
        children_of.entry(parent).or_default().push(path.clone());
    }

    let roots = build_level(None, &mut work, &mut children_of, expanded);
    TreeView { roots }
}

fn build_level(
    parent: Option<String>,
    work: &mut BTreeMap<String, WorkNode>,
    children_of: &mut HashMap<Option<String>, Vec<String>>,
    expanded: &HashSet<String>,
) -> Vec<TreeNode> {
    let Some(child_paths) = children_of.remove(&parent) else {
        return Vec::new();
    };
    let mut nodes = Vec::with_capacity(child_paths.len());
    for path in child_paths {
        let Some(node) = work.remove(&path) else {
            continue;
        };
        let built = match node.kind {
            EntryKind::Directory => TreeNode::Directory {
                children: build_level(Some(path.clone()), work, children_of, expanded),
                expanded: expanded.contains(&path),
                path,
            },
            EntryKind::File => TreeNode::File {
                path,
                status: node.status,
                hash: node.hash,
                size: node.size,
            },
        };
        nodes.push(built);
    }
    nodes.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    nodes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> Vec<FileEntry> {
        vec![
            FileEntry::file("README.md", "h-readme"),
            FileEntry::directory("src", "t-src"),
            FileEntry::file("src/Mod.java", "h-mod"),
            FileEntry::file("build.gradle", "h-gradle"),
            FileEntry::directory("src/assets", "t-assets"),
            FileEntry::file("src/assets/icon.png", "h-icon"),
        ]
    }

    fn top_level(view: &TreeView) -> Vec<&str> {
        view.roots.iter().map(TreeNode::path).collect()
    }

    #[test]
    fn directories_sort_before_files() {
        let view = reconcile(&snapshot(), &ChangeTracker::default(), &HashSet::new());

        assert_eq!(top_level(&view), vec!["src", "README.md", "build.gradle"]);
        let src: Vec<&str> = view.find("src").unwrap().children().iter().map(TreeNode::path).collect();
        assert_eq!(src, vec!["src/assets", "src/Mod.java"]);
        assert_eq!(view.status_of("README.md"), Some(FileStatus::Synced));
    }

    #[test]
    fn reconcile_is_idempotent() {
        let mut tracker = ChangeTracker::default();
        tracker.mark_created("a/B.java");
        tracker.mark_modified("README.md");
        tracker.mark_pending_deletion("build.gradle");
        let expanded: HashSet<String> = ["src".to_string()].into_iter().collect();

        let first = reconcile(&snapshot(), &tracker, &expanded);
        let second = reconcile(&snapshot(), &tracker, &expanded);
        assert_eq!(first, second);
    }

    #[test]
    fn created_file_synthesizes_ancestors() {
        let mut tracker = ChangeTracker::default();
        tracker.mark_created("a/b/C.java");

        let view = reconcile(&[], &tracker, &HashSet::new());

        assert!(view.find("a").unwrap().is_directory());
        assert!(view.find("a/b").unwrap().is_directory());
        assert_eq!(view.status_of("a/b/C.java"), Some(FileStatus::New));
    }

    #[test]
    fn pending_deletion_is_suppressed_and_empty_dirs_hidden() {
        let mut tracker = ChangeTracker::default();
        tracker.mark_pending_deletion("src/assets/icon.png");

        let view = reconcile(&snapshot(), &tracker, &HashSet::new());

        assert!(!view.contains("src/assets/icon.png"));
        assert!(!view.contains("src/assets"));
        assert!(view.contains("src/Mod.java"));
    }

    #[test]
    fn created_path_shadows_stale_remote_entry() {
        let mut tracker = ChangeTracker::default();
        tracker.mark_pending_deletion("README.md");
        tracker.mark_created("README.md");

        let view = reconcile(&snapshot(), &tracker, &HashSet::new());

        assert_eq!(view.status_of("README.md"), Some(FileStatus::New));
        assert_eq!(view.file_paths().iter().filter(|p| *p == "README.md").count(), 1);
    }

    #[test]
    fn modified_status_comes_from_tracker() {
        let mut tracker = ChangeTracker::default();
        tracker.mark_modified("src/Mod.java");

        let view = reconcile(&snapshot(), &tracker, &HashSet::new());
        assert_eq!(view.status_of("src/Mod.java"), Some(FileStatus::Modified));
    }

    #[test]
    fn orphaned_entry_is_promoted_to_root() {
        let entries = vec![FileEntry::file("lost/child.txt", "h")];
        let view = reconcile(&entries, &ChangeTracker::default(), &HashSet::new());

        assert_eq!(top_level(&view), vec!["lost/child.txt"]);
    }

    #[test]
    fn expansion_state_is_carried_over() {
        let expanded: HashSet<String> = ["src".to_string()].into_iter().collect();
        let view = reconcile(&snapshot(), &ChangeTracker::default(), &expanded);

        assert!(matches!(
            view.find("src"),
            Some(TreeNode::Directory { expanded: true, .. })
        ));
        assert!(matches!(
            view.find("src/assets"),
            Some(TreeNode::Directory { expanded: false, .. })
        ));
    }

    #[test]
    fn confirm_deletions_uses_snapshot_paths() {
        let mut tracker = ChangeTracker::default();
        tracker.mark_pending_deletion("README.md");
        tracker.mark_pending_deletion("gone.txt");

        let confirmed = confirm_deletions(&snapshot(), &mut tracker);
        assert_eq!(confirmed, vec!["gone.txt"]);
        assert!(tracker.is_pending_deletion("README.md"));
    }

    #[test]
    fn render_marks_unsynced_files() {
        let mut tracker = ChangeTracker::default();
        tracker.mark_created("a/B.java");
        let view = reconcile(&[], &tracker, &HashSet::new());
        assert_eq!(view.render(), "a/\n  B.java [new]\n");
    }
}
