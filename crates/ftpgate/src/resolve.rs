use percent_encoding::percent_decode_str;

use crate::tree::{Directory, NodeRef};

/// Map a raw (still percent-encoded) request path onto a node of `root`.
///
/// One trailing `/` is ignored and the empty path addresses `root` itself. Each segment is
/// matched first against subdirectories, then against files; a segment that does not decode to
/// UTF-8, or any attempt to descend below a file, resolves to nothing.
pub fn resolve<'a>(root: &'a Directory, request_path: &str) -> Option<NodeRef<'a>> {
    let trimmed = request_path.strip_suffix('/').unwrap_or(request_path);
    let mut segments = trimmed.split('/');
    // The leading segment is the empty string before the first `/`.
    segments.next();

    let mut current = NodeRef::Directory(root);
    for raw in segments {
        let NodeRef::Directory(dir) = current else {
            return None;
        };
        let segment = percent_decode_str(raw).decode_utf8().ok()?;
        let wanted = dir.child_path(&segment);

        current = if let Some(sub) = dir.subdirectories.iter().find(|d| d.path == wanted) {
            NodeRef::Directory(sub)
        } else {
            NodeRef::File(dir.files.iter().find(|f| f.path == wanted)?)
        };
    }

    Some(current)
}
