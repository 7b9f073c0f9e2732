//! Element types of tensors handed to kiln kernels.
//!
//! Kernel metadata records one [`DType`] per argument. The persisted module
//! format stores them DLPack-style as `(code, bits, lanes)` triples, while the
//! JSON sidecar uses the textual names (`"int32"`, `"float32x4"`).

use std::fmt;
use std::str::FromStr;

use snafu::{OptionExt, Snafu};

pub mod ext;


pub use ext::HasDType;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Textual dtype name could not be parsed.
    #[snafu(display("unknown dtype name '{name}'"))]
    UnknownName { name: String },

    /// DLPack triple does not describe a supported element type.
    #[snafu(display("unsupported DLPack dtype: code={code}, bits={bits}, lanes={lanes}"))]
    UnsupportedDl { code: u8, bits: u8, lanes: u16 },
}

/// Scalar element types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(strum::EnumCount, strum::EnumIter, strum::VariantArray)]
pub enum ScalarDType {
    Bool,

    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,

    Float16,
    BFloat16,
    Float32,
    Float64,
}

/// DLPack type codes (`DLDataTypeCode`).
pub mod dl_code {
    pub const INT: u8 = 0;
    pub const UINT: u8 = 1;
    pub const FLOAT: u8 = 2;
    pub const BFLOAT: u8 = 4;
    pub const BOOL: u8 = 6;
}

impl ScalarDType {
    pub const fn bytes(&self) -> usize {
        match self {
            Self::Bool | Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 | Self::Float16 | Self::BFloat16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 => 4,
            Self::Int64 | Self::UInt64 | Self::Float64 => 8,
        }
    }

    pub const fn bits(&self) -> u8 {
        match self {
            Self::Bool => 8,
            _ => (self.bytes() * 8) as u8,
        }
    }

    pub const fn is_signed(&self) -> bool {
        matches!(self, Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64)
    }

    pub const fn is_unsigned(&self) -> bool {
        matches!(self, Self::UInt8 | Self::UInt16 | Self::UInt32 | Self::UInt64)
    }

    pub const fn is_int(&self) -> bool {
        self.is_signed() || self.is_unsigned()
    }

    pub const fn is_float(&self) -> bool {
        matches!(self, Self::Float16 | Self::BFloat16 | Self::Float32 | Self::Float64)
    }

    /// C spelling used by generated kernels.
    pub const fn c_style(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int8 => "int8_t",
            Self::Int16 => "int16_t",
            Self::Int32 => "int32_t",
            Self::Int64 => "int64_t",
            Self::UInt8 => "uint8_t",
            Self::UInt16 => "uint16_t",
            Self::UInt32 => "uint32_t",
            Self::UInt64 => "uint64_t",
            Self::Float16 => "half",
            Self::BFloat16 => "__bf16",
            Self::Float32 => "float",
            Self::Float64 => "double",
        }
    }

    /// Canonical lowercase name (`int32`, `float16`, ...).
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::UInt8 => "uint8",
            Self::UInt16 => "uint16",
            Self::UInt32 => "uint32",
            Self::UInt64 => "uint64",
            Self::Float16 => "float16",
            Self::BFloat16 => "bfloat16",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
        }
    }

    pub const fn dl_code(&self) -> u8 {
        match self {
            Self::Bool => dl_code::BOOL,
            Self::BFloat16 => dl_code::BFLOAT,
            s if s.is_signed() => dl_code::INT,
            s if s.is_unsigned() => dl_code::UINT,
            _ => dl_code::FLOAT,
        }
    }

    pub fn from_dl(code: u8, bits: u8) -> Option<Self> {
        let scalar = match (code, bits) {
            (dl_code::BOOL, 8) => Self::Bool,
            (dl_code::INT, 8) => Self::Int8,
            (dl_code::INT, 16) => Self::Int16,
            (dl_code::INT, 32) => Self::Int32,
            (dl_code::INT, 64) => Self::Int64,
            (dl_code::UINT, 8) => Self::UInt8,
            (dl_code::UINT, 16) => Self::UInt16,
            (dl_code::UINT, 32) => Self::UInt32,
            (dl_code::UINT, 64) => Self::UInt64,
            (dl_code::FLOAT, 16) => Self::Float16,
            (dl_code::FLOAT, 32) => Self::Float32,
            (dl_code::FLOAT, 64) => Self::Float64,
            (dl_code::BFLOAT, 16) => Self::BFloat16,
            _ => return None,
        };
        Some(scalar)
    }
}

/// Element type of a tensor argument: a scalar or a fixed-width vector of scalars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(into = "String", try_from = "String"))]
pub enum DType {
    Scalar(ScalarDType),
    Vector { scalar: ScalarDType, count: u16 },
}

impl From<ScalarDType> for DType {
    fn from(scalar: ScalarDType) -> Self {
        Self::Scalar(scalar)
    }
}

impl DType {
    /// Create a vector type from this dtype. A count of 1 is the scalar itself.
    pub fn vec(self, count: u16) -> Self {
        match self {
            _ if count == 1 => self,
            Self::Scalar(scalar) => Self::Vector { scalar, count },
            Self::Vector { scalar, .. } => Self::Vector { scalar, count },
        }
    }

    pub fn base(&self) -> ScalarDType {
        match self {
            Self::Scalar(s) | Self::Vector { scalar: s, .. } => *s,
        }
    }

    /// Vector lane count (1 for scalars).
    pub fn lanes(&self) -> u16 {
        match self {
            Self::Vector { count, .. } => *count,
            Self::Scalar(_) => 1,
        }
    }

    pub fn bytes(&self) -> usize {
        self.base().bytes() * self.lanes() as usize
    }

    pub fn is_vector(&self) -> bool {
        matches!(self, Self::Vector { .. })
    }

    /// DLPack `(code, bits, lanes)` triple.
    pub fn to_dl(&self) -> (u8, u8, u16) {
        let base = self.base();
        (base.dl_code(), base.bits(), self.lanes())
    }

    pub fn from_dl(code: u8, bits: u8, lanes: u16) -> Result<Self> {
        let scalar = ScalarDType::from_dl(code, bits).filter(|_| lanes > 0).context(UnsupportedDlSnafu { code, bits, lanes })?;
        Ok(Self::Scalar(scalar).vec(lanes))
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(s) => f.write_str(s.name()),
            Self::Vector { scalar, count } => write!(f, "{}x{}", scalar.name(), count),
        }
    }
}

impl FromStr for DType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        use strum::VariantArray;

        let (base, lanes) = match s.split_once('x') {
            Some((base, lanes)) => (base, lanes.parse::<u16>().ok().filter(|&l| l > 0)),
            None => (s, Some(1)),
        };
        let scalar = ScalarDType::VARIANTS.iter().find(|v| v.name() == base);
        match (scalar, lanes) {
            (Some(scalar), Some(lanes)) => Ok(Self::Scalar(*scalar).vec(lanes)),
            _ => UnknownNameSnafu { name: s }.fail(),
        }
    }
}

impl From<DType> for String {
    fn from(dtype: DType) -> Self {
        dtype.to_string()
    }
}

impl TryFrom<String> for DType {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

#[allow(non_upper_case_globals)]
impl DType {
    pub const Bool: Self = Self::Scalar(ScalarDType::Bool);
    pub const Int8: Self = Self::Scalar(ScalarDType::Int8);
    pub const Int16: Self = Self::Scalar(ScalarDType::Int16);
    pub const Int32: Self = Self::Scalar(ScalarDType::Int32);
    pub const Int64: Self = Self::Scalar(ScalarDType::Int64);
    pub const UInt8: Self = Self::Scalar(ScalarDType::UInt8);
    pub const UInt16: Self = Self::Scalar(ScalarDType::UInt16);
    pub const UInt32: Self = Self::Scalar(ScalarDType::UInt32);
    pub const UInt64: Self = Self::Scalar(ScalarDType::UInt64);
    pub const Float16: Self = Self::Scalar(ScalarDType::Float16);
    pub const BFloat16: Self = Self::Scalar(ScalarDType::BFloat16);
    pub const Float32: Self = Self::Scalar(ScalarDType::Float32);
    pub const Float64: Self = Self::Scalar(ScalarDType::Float64);
}
