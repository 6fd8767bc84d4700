//! Per-call dataset registry for interpreted UDFs.
//!
//! Slot 0 is always the output, followed by the inputs in caller order and
//! an empty sentinel. The interpreter callbacks resolve names against this
//! table; nothing about it is process-global.

use std::ffi::c_void;

use crate::dataset::DatasetDescriptor;

/// Metadata for one dataset slot.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    /// Buffer the UDF reads or writes
    pub data: *mut c_void,

    /// Dataset name
    pub name: String,

    /// Dimensions as `"AxB"`
    pub dims: String,

    /// Element type name (`int32`, `double`, ...)
    pub type_name: String,

    /// Pointer type the UDF casts the buffer to (`int32_t*`, ...)
    pub cast: String,
}

impl RegistryEntry {
    fn describe(descriptor: &DatasetDescriptor<'_>, data: *mut c_void) -> Self {
        Self {
            data,
            name: descriptor.name.clone(),
            dims: descriptor.dimensions_string(),
            type_name: descriptor.element_type.type_name().to_string(),
            cast: descriptor.element_type.cast_declaration().to_string(),
        }
    }

    fn sentinel() -> Self {
        Self {
            data: std::ptr::null_mut(),
            name: String::new(),
            dims: String::new(),
            type_name: String::new(),
            cast: String::new(),
        }
    }

    fn is_sentinel(&self) -> bool {
        self.name.is_empty() && self.data.is_null()
    }
}

/// Ordered dataset table: `[output, input_0, ..., input_n, sentinel]`.
#[derive(Debug)]
pub struct DatasetRegistry {
    entries: Vec<RegistryEntry>,
}

impl DatasetRegistry {
    /// Build the table.
    ///
    /// `output_data` replaces the output descriptor's own buffer (the
    /// bytecode backend points it at shared memory). `output_cast`, when
    /// set, replaces the output's cast declaration.
    pub fn new(
        output: &DatasetDescriptor<'_>,
        output_data: *mut c_void,
        output_cast: Option<&str>,
        inputs: &[DatasetDescriptor<'_>],
    ) -> Self {
        let mut entries = Vec::with_capacity(inputs.len() + 2);

        let mut out = RegistryEntry::describe(output, output_data);
        if let Some(cast) = output_cast {
            out.cast = cast.to_string();
        }
        entries.push(out);

        entries.extend(inputs.iter().map(|input| RegistryEntry::describe(input, input.data_ptr())));
        entries.push(RegistryEntry::sentinel());

        Self { entries }
    }

    /// Slot of the dataset named exactly `name`.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .take_while(|entry| !entry.is_sentinel())
            .position(|entry| entry.name == name)
    }

    /// Entry for `name`, if registered.
    pub fn lookup(&self, name: &str) -> Option<&RegistryEntry> {
        self.index_of(name).map(|index| &self.entries[index])
    }

    /// Number of dataset slots, excluding the sentinel.
    pub fn len(&self) -> usize {
        self.entries.len() - 1
    }

    /// Whether the registry holds no datasets. Never true: slot 0 is the output.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All slots including the trailing sentinel.
    pub fn entries(&self) -> &[RegistryEntry] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::ElementType;

    #[test]
    fn test_slot_order_and_sentinel() {
        let mut out_buf = vec![0u8; 16];
        let mut a_buf = vec![0u8; 8];
        let mut b_buf = vec![0u8; 4];
        let output =
            DatasetDescriptor::new("out", ElementType::Float32, vec![2, 2], &mut out_buf).unwrap();
        let inputs = vec![
            DatasetDescriptor::new("a", ElementType::Float64, vec![1], &mut a_buf).unwrap(),
            DatasetDescriptor::new("b", ElementType::Int32, vec![1], &mut b_buf).unwrap(),
        ];

        let registry = DatasetRegistry::new(&output, output.data_ptr(), None, &inputs);

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.entries().len(), 4);
        assert_eq!(registry.index_of("out"), Some(0));
        assert_eq!(registry.index_of("a"), Some(1));
        assert_eq!(registry.index_of("b"), Some(2));
        assert!(registry.entries()[3].is_sentinel());

        let out = registry.lookup("out").unwrap();
        assert_eq!(out.dims, "2x2");
        assert_eq!(out.type_name, "float");
        assert_eq!(out.cast, "float*");
    }

    #[test]
    fn test_lookup_is_exact() {
        let mut out_buf = vec![0u8; 4];
        let mut in_buf = vec![0u8; 4];
        let output =
            DatasetDescriptor::new("out", ElementType::Int32, vec![1], &mut out_buf).unwrap();
        let inputs =
            vec![DatasetDescriptor::new("temperature", ElementType::Int32, vec![1], &mut in_buf).unwrap()];
        let registry = DatasetRegistry::new(&output, output.data_ptr(), None, &inputs);

        assert_eq!(registry.index_of("temp"), None);
        assert_eq!(registry.index_of("temperature2"), None);
        assert_eq!(registry.index_of(""), None);
    }

    #[test]
    fn test_output_overrides() {
        let mut out_buf = vec![0u8; 4];
        let mut shm = [0u8; 4];
        let output =
            DatasetDescriptor::new("out", ElementType::UInt8, vec![4], &mut out_buf).unwrap();

        let registry =
            DatasetRegistry::new(&output, shm.as_mut_ptr().cast(), Some("char*"), &[]);

        let out = registry.lookup("out").unwrap();
        assert_eq!(out.data, shm.as_mut_ptr().cast());
        assert_eq!(out.cast, "char*");
        assert_eq!(out.type_name, "uint8");
    }
}
