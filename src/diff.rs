//! Line-level diff computation for text content
//!
//! The diff finds the Longest Common Subsequence (LCS) of the two line lists
//! with a dynamic programming table, after stripping the common prefix and
//! suffix. The result is a [`LineEdit`] script that the diff engine turns
//! into per-line changes and the conflict resolver walks to find the lines
//! each side added.
//!
//! ## Examples
//!
//! ```rust
//! use migratus::diff::{edit_script, LineEdit};
//!
//! let old = ["line1", "line2", "line3"];
//! let new = ["line1", "modified line2", "line3", "line4"];
//!
//! let script = edit_script(&old, &new, false);
//! assert!(script.contains(&LineEdit::Delete { old: 1 }));
//! assert!(script.contains(&LineEdit::Insert { new: 3 }));
//! ```

/// One step of an edit script (0-based line indices)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEdit {
    /// Line present in both
    Keep {
        /// Index in the old lines
        old: usize,
        /// Index in the new lines
        new: usize,
    },
    /// Line only in the old content
    Delete {
        /// Index in the old lines
        old: usize,
    },
    /// Line only in the new content
    Insert {
        /// Index in the new lines
        new: usize,
    },
}

/// Minimal edit script turning `old` into `new`
///
/// Deletions are emitted before insertions between two kept lines.
pub fn edit_script(old: &[&str], new: &[&str], ignore_whitespace: bool) -> Vec<LineEdit> {
    let eq = |a: &str, b: &str| {
        if ignore_whitespace {
            a.trim() == b.trim()
        } else {
            a == b
        }
    };

    let prefix = old
        .iter()
        .zip(new)
        .take_while(|(a, b)| eq(a, b))
        .count();
    let suffix = old[prefix..]
        .iter()
        .rev()
        .zip(new[prefix..].iter().rev())
        .take_while(|(a, b)| eq(a, b))
        .count();

    let old_mid = &old[prefix..old.len() - suffix];
    let new_mid = &new[prefix..new.len() - suffix];

    let mut script: Vec<LineEdit> = (0..prefix)
        .map(|i| LineEdit::Keep { old: i, new: i })
        .collect();

    let mut old_idx = 0;
    let mut new_idx = 0;
    for (o, n) in lcs_pairs(old_mid, new_mid, &eq) {
        script.extend((old_idx..o).map(|i| LineEdit::Delete { old: prefix + i }));
        script.extend((new_idx..n).map(|j| LineEdit::Insert { new: prefix + j }));
        script.push(LineEdit::Keep {
            old: prefix + o,
            new: prefix + n,
        });
        old_idx = o + 1;
        new_idx = n + 1;
    }
    script.extend((old_idx..old_mid.len()).map(|i| LineEdit::Delete { old: prefix + i }));
    script.extend((new_idx..new_mid.len()).map(|j| LineEdit::Insert { new: prefix + j }));

    let old_tail = old.len() - suffix;
    let new_tail = new.len() - suffix;
    script.extend((0..suffix).map(|k| LineEdit::Keep {
        old: old_tail + k,
        new: new_tail + k,
    }));
    script
}

/// Matched index pairs of the longest common subsequence
fn lcs_pairs(old: &[&str], new: &[&str], eq: &dyn Fn(&str, &str) -> bool) -> Vec<(usize, usize)> {
    let m = old.len();
    let n = new.len();
    if m == 0 || n == 0 {
        return Vec::new();
    }

    // dp[i][j] = LCS length of old[i..] and new[j..]
    let mut dp = vec![vec![0u32; n + 1]; m + 1];
    for i in (0..m).rev() {
        for j in (0..n).rev() {
            dp[i][j] = if eq(old[i], new[j]) {
                dp[i + 1][j + 1] + 1
            } else {
                dp[i + 1][j].max(dp[i][j + 1])
            };
        }
    }

    let mut pairs = Vec::with_capacity(dp[0][0] as usize);
    let (mut i, mut j) = (0, 0);
    while i < m && j < n {
        if eq(old[i], new[j]) {
            pairs.push((i, j));
            i += 1;
            j += 1;
        } else if dp[i + 1][j] >= dp[i][j + 1] {
            i += 1;
        } else {
            j += 1;
        }
    }
    pairs
}

/// Check if content appears to be binary
pub fn is_binary_content(content: &[u8]) -> bool {
    // Null byte in the first 8KB
    let check_len = content.len().min(8192);
    content[..check_len].contains(&0)
}
