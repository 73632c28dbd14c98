//! Path resolution and recursive walking over an [`Engine`]'s directory
//! graph (`spec.md` §4.6 `DirTree`). Every format-specific engine exposes
//! only parent-to-children edges; path lookup and recursive enumeration are
//! the same regardless of format, so they live here instead of being
//! reimplemented per engine.

use crate::engine::Engine;
use crate::entry::DirEntry;
use crate::error::{Error, Result};

/// One `(entry, resolved DirEntry)` pair, as returned by directory walks.
pub struct Node<R> {
    pub entry: R,
    pub info: DirEntry,
}

/// Resolves a `/`-separated path from `root`, case-insensitively on the
/// component comparison (matching how every supported format folds case
/// for name lookups; `spec.md` §3 "names compare case-insensitively").
pub fn resolve<E: Engine>(engine: &E, root: E::EntryRef, path: &str) -> Result<E::EntryRef> {
    let mut current = root;
    for component in path.split('/').filter(|c| !c.is_empty()) {
        let children = engine.children(current)?;
        let mut found = None;
        for child in children {
            let info = engine.entry(child)?;
            if info.name.eq_ignore_ascii_case(component) {
                found = Some(child);
                break;
            }
        }
        current = found.ok_or(Error::NotFound)?;
    }
    Ok(current)
}

/// Depth-first enumeration of every entry under `root`, `root` itself
/// included as the first element.
pub fn walk<E: Engine>(engine: &E, root: E::EntryRef) -> Result<Vec<Node<E::EntryRef>>> {
    let mut out = Vec::new();
    walk_into(engine, root, &mut out)?;
    Ok(out)
}

fn walk_into<E: Engine>(engine: &E, entry: E::EntryRef, out: &mut Vec<Node<E::EntryRef>>) -> Result<()> {
    let info = engine.entry(entry)?;
    let is_container = matches!(
        info.type_info,
        crate::entry::TypeInfo::VolumeDirectory | crate::entry::TypeInfo::Directory
    );
    out.push(Node { entry, info });
    if is_container {
        for child in engine.children(entry)? {
            walk_into(engine, child, out)?;
        }
    }
    Ok(())
}
