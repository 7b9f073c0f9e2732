//! Parallel-loop annotation of kernel source.
//!
//! The transform is textual: the earliest `for (` or `for(` anywhere in the
//! source that is not the tail of a longer identifier (`wait_for(x)`) gets
//! [`PARALLEL_PRAGMA`] inserted at the start of its line. Loops in
//! comments or string literals are not told apart, and whether the loop is
//! actually parallelizable is the code generator's business.

use crate::config::PARALLEL_PRAGMA;

/// Result of [`parallelize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parallelized {
    pub source: String,
    /// Zero-based line index of the injected pragma, `None` if no loop was found.
    pub loop_line: Option<usize>,
}

/// Byte offset of the first `for` keyword that opens a loop header.
fn find_loop(code: &str) -> Option<usize> {
    let is_ident = |b: u8| b.is_ascii_alphanumeric() || b == b'_';
    let bytes = code.as_bytes();

    ["for (", "for("]
        .into_iter()
        .filter_map(|needle| {
            code.match_indices(needle).map(|(pos, _)| pos).find(|&pos| pos == 0 || !is_ident(bytes[pos - 1]))
        })
        .min()
}

/// Insert the parallel-for pragma ahead of the first loop in `code`.
pub fn parallelize(code: &str) -> Parallelized {
    let Some(pos) = find_loop(code) else {
        tracing::warn!("no for loop found, kernel will run without a parallel-for annotation");
        return Parallelized { source: code.to_string(), loop_line: None };
    };

    let line_start = code[..pos].rfind('\n').map_or(0, |nl| nl + 1);
    let loop_line = code[..line_start].matches('\n').count();

    let mut source = String::with_capacity(code.len() + PARALLEL_PRAGMA.len() + 1);
    source.push_str(&code[..line_start]);
    source.push_str(PARALLEL_PRAGMA);
    source.push('\n');
    source.push_str(&code[line_start..]);

    tracing::debug!(line = loop_line, "injected parallel-for annotation");
    Parallelized { source, loop_line: Some(loop_line) }
}
