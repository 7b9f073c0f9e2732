//! Best-effort recovery of a kernel's C signature from its source text.
//!
//! Grammar understood: `<return type tokens> <name> ( <param>, <param>, ... )`
//! where each parameter is `<type tokens> <identifier>`. Preprocessor lines
//! are ignored. Nested parentheses in the parameter list, templates and
//! unnamed parameters are not understood; the code generator producing the
//! kernels does not emit them.

use regex::Regex;

use crate::error::{Result, SignatureParseFailureSnafu};

/// Return type and ordered parameter types of a kernel.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KernelSignature {
    pub return_type: String,
    pub param_types: Vec<String>,
}

/// Drop every line whose first non-blank character is `#`.
fn strip_directives(code: &str) -> String {
    code.lines().filter(|line| !line.trim_start().starts_with('#')).fold(String::with_capacity(code.len()), |mut acc, line| {
        acc.push_str(line);
        acc.push('\n');
        acc
    })
}

/// Find the declaration of `name` in `code` and split it into types.
pub fn extract_signature(code: &str, name: &str) -> Result<KernelSignature> {
    let filtered = strip_directives(code);
    // The return type needs at least one word character, so an indented call
    // site such as `  add(x);` is not mistaken for the declaration.
    let pattern = format!(r"([\w\s*]*\w[\w\s*]*)\s+{}\s*\(([^)]*)\)", regex::escape(name));
    let captures = Regex::new(&pattern).ok().and_then(|re| re.captures(&filtered));

    let Some(captures) = captures else {
        tracing::error!(kernel.name = %name, "could not parse kernel signature");
        return SignatureParseFailureSnafu { name }.fail();
    };

    let return_type = captures[1].trim().to_string();
    let param_types = captures[2]
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| match token.rfind(' ') {
            Some(pos) => token[..pos].to_string(),
            None => token.to_string(),
        })
        .collect();

    Ok(KernelSignature { return_type, param_types })
}
