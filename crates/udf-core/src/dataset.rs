//! Descriptors for the caller-owned array datasets a UDF reads and writes.
//!
//! The engine never allocates or frees dataset buffers. A descriptor borrows
//! the caller's buffer for its lifetime and exposes it to UDF code as a raw
//! pointer together with the metadata strings the templates consume.

use std::ffi::c_void;
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Scalar element kinds supported for dataset buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum ElementType {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
}

impl ElementType {
    /// All supported element types.
    pub const ALL: [ElementType; 10] = [
        Self::Int8,
        Self::Int16,
        Self::Int32,
        Self::Int64,
        Self::UInt8,
        Self::UInt16,
        Self::UInt32,
        Self::UInt64,
        Self::Float32,
        Self::Float64,
    ];

    /// Width of one element in bytes.
    pub fn size(self) -> usize {
        match self {
            Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 => 4,
            Self::Int64 | Self::UInt64 | Self::Float64 => 8,
        }
    }

    /// Type name handed to UDF code (`lib.getType`).
    pub fn type_name(self) -> &'static str {
        match self {
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::UInt8 => "uint8",
            Self::UInt16 => "uint16",
            Self::UInt32 => "uint32",
            Self::UInt64 => "uint64",
            Self::Float32 => "float",
            Self::Float64 => "double",
        }
    }

    /// C pointer declaration used to cast the raw buffer on the UDF side.
    pub fn cast_declaration(self) -> &'static str {
        match self {
            Self::Int8 => "int8_t*",
            Self::Int16 => "int16_t*",
            Self::Int32 => "int32_t*",
            Self::Int64 => "int64_t*",
            Self::UInt8 => "uint8_t*",
            Self::UInt16 => "uint16_t*",
            Self::UInt32 => "uint32_t*",
            Self::UInt64 => "uint64_t*",
            Self::Float32 => "float*",
            Self::Float64 => "double*",
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

impl FromStr for ElementType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase();
        let found = match normalized.as_str() {
            "float32" | "f32" => Some(Self::Float32),
            "float64" | "f64" => Some(Self::Float64),
            "i8" => Some(Self::Int8),
            "i16" => Some(Self::Int16),
            "i32" => Some(Self::Int32),
            "i64" => Some(Self::Int64),
            "u8" => Some(Self::UInt8),
            "u16" => Some(Self::UInt16),
            "u32" => Some(Self::UInt32),
            "u64" => Some(Self::UInt64),
            name => Self::ALL.into_iter().find(|t| t.type_name() == name),
        };
        found.ok_or_else(|| Error::InvalidDataset(format!("unknown element type '{}'", s)))
    }
}

impl TryFrom<String> for ElementType {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

/// Describes one named array backed by a caller-owned buffer.
///
/// Invariants: `dimensions` is non-empty and the buffer spans at least
/// [`storage_size`](Self::storage_size) bytes for the lifetime `'buf`.
#[derive(Debug)]
pub struct DatasetDescriptor<'buf> {
    /// Dataset name, matched exactly by `lib.getData`
    pub name: String,

    /// Element type
    pub element_type: ElementType,

    /// Dimensions, outermost first
    pub dimensions: Vec<u64>,

    data: *mut c_void,
    _buffer: PhantomData<&'buf mut [u8]>,
}

impl<'buf> DatasetDescriptor<'buf> {
    /// Describe a dataset stored in `buffer`.
    ///
    /// # Errors
    /// Returns `InvalidDataset` if `dimensions` is empty or the buffer is
    /// shorter than the storage the dimensions imply.
    pub fn new(
        name: impl Into<String>,
        element_type: ElementType,
        dimensions: Vec<u64>,
        buffer: &'buf mut [u8],
    ) -> Result<Self> {
        let name = name.into();
        let required = Self::checked_storage_size(&name, element_type, &dimensions)?;
        if buffer.len() < required {
            return Err(Error::InvalidDataset(format!(
                "{}: buffer holds {} bytes, {} required",
                name,
                buffer.len(),
                required
            )));
        }

        Ok(Self {
            name,
            element_type,
            dimensions,
            data: buffer.as_mut_ptr().cast(),
            _buffer: PhantomData,
        })
    }

    /// Describe a dataset from a raw pointer owned by a foreign library.
    ///
    /// # Safety
    /// `data` must be valid for reads and writes of
    /// `element_type.size() * product(dimensions)` bytes for `'buf`, and
    /// nothing else may access it while the descriptor is in use.
    pub unsafe fn from_raw(
        name: impl Into<String>,
        element_type: ElementType,
        dimensions: Vec<u64>,
        data: *mut c_void,
    ) -> Result<Self> {
        let name = name.into();
        Self::checked_storage_size(&name, element_type, &dimensions)?;
        if data.is_null() {
            return Err(Error::InvalidDataset(format!("{}: null data pointer", name)));
        }

        Ok(Self {
            name,
            element_type,
            dimensions,
            data,
            _buffer: PhantomData,
        })
    }

    fn checked_storage_size(
        name: &str,
        element_type: ElementType,
        dimensions: &[u64],
    ) -> Result<usize> {
        if dimensions.is_empty() {
            return Err(Error::InvalidDataset(format!("{}: no dimensions", name)));
        }
        dimensions
            .iter()
            .try_fold(element_type.size() as u64, |acc, &d| acc.checked_mul(d))
            .and_then(|bytes| usize::try_from(bytes).ok())
            .ok_or_else(|| Error::InvalidDataset(format!("{}: dimensions overflow", name)))
    }

    /// Number of elements in the grid.
    pub fn grid_size(&self) -> u64 {
        self.dimensions.iter().product()
    }

    /// Size of the backing storage in bytes.
    pub fn storage_size(&self) -> usize {
        self.grid_size() as usize * self.element_type.size()
    }

    /// Dimensions rendered as `"100x50"`.
    pub fn dimensions_string(&self) -> String {
        self.dimensions
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join("x")
    }

    /// Raw pointer to the caller's buffer.
    pub fn data_ptr(&self) -> *mut c_void {
        self.data
    }

    /// View the buffer as bytes.
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: construction guarantees `storage_size` valid bytes for 'buf.
        unsafe { std::slice::from_raw_parts(self.data.cast::<u8>(), self.storage_size()) }
    }

    /// View the buffer as mutable bytes.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above; `&mut self` gives exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.data.cast::<u8>(), self.storage_size()) }
    }

    /// Log a one-line summary of the dataset under the given role.
    pub fn describe(&self, role: &str) {
        tracing::info!(
            "{} dataset: {} ({}, {}, {} bytes)",
            role,
            self.name,
            self.element_type,
            self.dimensions_string(),
            self.storage_size()
        );
    }
}
