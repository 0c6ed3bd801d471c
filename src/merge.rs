//! Byte-level three-way merge for concurrently edited text files
//!
//! A deterministic line diff between the two sides produces one annotated
//! artifact: lines common to both appear verbatim, lines only in the
//! local copy carry the fullwidth minus marker, lines only in the remote
//! copy the fullwidth plus marker. Both sides then receive the identical
//! artifact, so the next reconciliation plans nothing for the file and
//! the user resolves the annotations at leisure.
//!
//! Non-UTF-8 content on either side is not mergeable; the caller falls
//! back to last-writer-wins toward the newer modification time.

/// Marker prefixed to lines present only in the local copy.
pub const DELETE_MARKER: char = '－';

/// Marker prefixed to lines present only in the remote copy.
pub const INSERT_MARKER: char = '＋';

/// Diff tables above this many cells fall back to whole-file annotation.
const MAX_DIFF_CELLS: usize = 25_000_000;

/// One diff opcode over a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffOp {
    Equal,
    Delete,
    Insert,
}

/// Result of attempting a merge.
#[derive(Debug, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The annotated artifact to write to both sides.
    Merged(Vec<u8>),
    /// At least one side is not valid UTF-8; no line merge is possible.
    Binary,
}

/// Merge two byte strings. Identical inputs merge to themselves.
pub fn merge(local: &[u8], remote: &[u8]) -> MergeOutcome {
    let (Ok(local_text), Ok(remote_text)) =
        (std::str::from_utf8(local), std::str::from_utf8(remote))
    else {
        return MergeOutcome::Binary;
    };

    let local_lines: Vec<&str> = local_text.split('\n').collect();
    let remote_lines: Vec<&str> = remote_text.split('\n').collect();

    let mut merged = String::with_capacity(local.len() + remote.len());
    let mut first = true;
    for (op, line) in diff_lines(&local_lines, &remote_lines) {
        if !first {
            merged.push('\n');
        }
        first = false;
        match op {
            DiffOp::Equal => {}
            DiffOp::Delete => merged.push(DELETE_MARKER),
            DiffOp::Insert => merged.push(INSERT_MARKER),
        }
        merged.push_str(line);
    }
    MergeOutcome::Merged(merged.into_bytes())
}

/// Longest-common-subsequence line diff. Deterministic: on ties the
/// local-side deletion is emitted before the remote-side insertion.
pub fn diff_lines<'a>(a: &[&'a str], b: &[&'a str]) -> Vec<(DiffOp, &'a str)> {
    let n = a.len();
    let m = b.len();
    if n.saturating_mul(m) > MAX_DIFF_CELLS {
        // Degenerate but still convergent: annotate both sides wholesale.
        let mut ops = Vec::with_capacity(n + m);
        ops.extend(a.iter().map(|l| (DiffOp::Delete, *l)));
        ops.extend(b.iter().map(|l| (DiffOp::Insert, *l)));
        return ops;
    }

    // dp[i][j] = LCS length of a[i..] and b[j..]
    let width = m + 1;
    let mut dp = vec![0u32; (n + 1) * width];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            dp[i * width + j] = if a[i] == b[j] {
                dp[(i + 1) * width + j + 1] + 1
            } else {
                dp[(i + 1) * width + j].max(dp[i * width + j + 1])
            };
        }
    }

    let mut ops = Vec::with_capacity(n.max(m));
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if a[i] == b[j] {
            ops.push((DiffOp::Equal, a[i]));
            i += 1;
            j += 1;
        } else if dp[(i + 1) * width + j] >= dp[i * width + j + 1] {
            ops.push((DiffOp::Delete, a[i]));
            i += 1;
        } else {
            ops.push((DiffOp::Insert, b[j]));
            j += 1;
        }
    }
    ops.extend(a[i..].iter().map(|l| (DiffOp::Delete, *l)));
    ops.extend(b[j..].iter().map(|l| (DiffOp::Insert, *l)));
    ops
}

#[cfg(test)]
mod tests {
    use super::*;

    fn merged_text(local: &str, remote: &str) -> String {
        match merge(local.as_bytes(), remote.as_bytes()) {
            MergeOutcome::Merged(bytes) => String::from_utf8(bytes).unwrap(),
            MergeOutcome::Binary => panic!("unexpected binary outcome"),
        }
    }

    #[test]
    fn test_identical_inputs_merge_to_themselves() {
        let text = "alpha\nbeta\ngamma\n";
        assert_eq!(merged_text(text, text), text);
    }

    #[test]
    fn test_divergent_edits_annotated() {
        let local = "shared\nlocal only\ntail";
        let remote = "shared\nremote only\ntail";
        let merged = merged_text(local, remote);
        assert_eq!(merged, "shared\n－local only\n＋remote only\ntail");
    }

    #[test]
    fn test_pure_insertion() {
        let local = "a\nc";
        let remote = "a\nb\nc";
        assert_eq!(merged_text(local, remote), "a\n＋b\nc");
    }

    #[test]
    fn test_pure_deletion() {
        let local = "a\nb\nc";
        let remote = "a\nc";
        assert_eq!(merged_text(local, remote), "a\n－b\nc");
    }

    #[test]
    fn test_merge_is_deterministic() {
        let local = "one\ntwo\nthree";
        let remote = "one\n2\n3";
        assert_eq!(merged_text(local, remote), merged_text(local, remote));
    }

    #[test]
    fn test_merged_artifact_is_stable_under_remerge() {
        // Once both sides carry the artifact, re-merging it with itself
        // must be the identity — this is what makes the next plan empty.
        let merged = merged_text("a\nx", "a\ny");
        assert_eq!(merged_text(&merged, &merged), merged);
    }

    #[test]
    fn test_binary_content_refuses_merge() {
        assert_eq!(merge(&[0xff, 0xfe, 0x00], b"text"), MergeOutcome::Binary);
        assert_eq!(merge(b"text", &[0x80, 0x81]), MergeOutcome::Binary);
    }

    #[test]
    fn test_diff_lines_lcs() {
        let a = vec!["a", "b", "c"];
        let b = vec!["a", "c", "d"];
        let ops = diff_lines(&a, &b);
        assert_eq!(
            ops,
            vec![
                (DiffOp::Equal, "a"),
                (DiffOp::Delete, "b"),
                (DiffOp::Equal, "c"),
                (DiffOp::Insert, "d"),
            ]
        );
    }

    #[test]
    fn test_diff_empty_sides() {
        let empty: Vec<&str> = vec![];
        let some = vec!["x"];
        assert_eq!(diff_lines(&empty, &some), vec![(DiffOp::Insert, "x")]);
        assert_eq!(diff_lines(&some, &empty), vec![(DiffOp::Delete, "x")]);
    }
}
