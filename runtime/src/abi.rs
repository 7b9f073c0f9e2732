//! Mapping of C parameter types onto the foreign call ABI.

use crate::config::UnsupportedParamPolicy;
use crate::error::{Error, Result, UnsupportedParameterTypeSnafu};
use crate::signature::KernelSignature;

/// ABI classification of a kernel parameter or return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AbiKind {
    /// No value. Only used as return kind.
    Void,
    Int32,
    Float32,
    Float64,
    Pointer,
}

/// Argument and return layout of a native kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallDescriptor {
    pub arg_kinds: Vec<AbiKind>,
    pub return_kind: AbiKind,
}

impl CallDescriptor {
    pub fn arity(&self) -> usize {
        self.arg_kinds.len()
    }
}

/// Classify one textual parameter type.
pub fn map_type(type_str: &str) -> Result<AbiKind> {
    if type_str.contains('*') {
        return Ok(AbiKind::Pointer);
    }
    match type_str {
        "int" | "int32_t" => Ok(AbiKind::Int32),
        "float" => Ok(AbiKind::Float32),
        "double" => Ok(AbiKind::Float64),
        _ => UnsupportedParameterTypeSnafu { type_string: type_str }.fail(),
    }
}

/// Build the call descriptor of a signature.
///
/// The parsed return type is ignored: kernels report results through their
/// pointer parameters, so the return kind is always [`AbiKind::Void`].
/// Under [`UnsupportedParamPolicy::Drop`] an unmapped parameter is skipped and
/// the descriptor ends up shorter than the native signature.
pub fn describe(signature: &KernelSignature, policy: UnsupportedParamPolicy) -> Result<CallDescriptor> {
    let mut arg_kinds = Vec::with_capacity(signature.param_types.len());
    for param in &signature.param_types {
        match (map_type(param), policy) {
            (Ok(kind), _) => arg_kinds.push(kind),
            (Err(Error::UnsupportedParameterType { type_string }), UnsupportedParamPolicy::Drop) => {
                tracing::warn!(param.type = %type_string, "dropping parameter with unsupported type");
            }
            (Err(err), _) => return Err(err),
        }
    }
    Ok(CallDescriptor { arg_kinds, return_kind: AbiKind::Void })
}
