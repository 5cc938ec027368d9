/// One entry in an offload image's host-side variable table: a host address
/// and its byte size.
#[derive(Debug, Clone, Copy)]
pub struct VarEntry {
    pub host_addr: u64,
    pub size: u64,
}

/// The host-side symbol table an offload image registers with the runtime.
///
/// Mirrors the original's 4-pointer vector layout
/// (`[func_begin, func_end, var_begin, var_end]`) but expressed as owned
/// vectors rather than raw pointer ranges, since this crate does not compile
/// device code and therefore never receives the table as a linker-provided
/// array.
#[derive(Debug, Clone, Default)]
pub struct OffloadImageTable {
    /// Host addresses of offloaded functions; each occupies a length-1
    /// synthetic interval once registered.
    pub functions: Vec<u64>,
    pub variables: Vec<VarEntry>,
}

impl OffloadImageTable {
    pub fn num_funcs(&self) -> usize {
        self.functions.len()
    }

    pub fn num_vars(&self) -> usize {
        self.variables.len()
    }

    pub fn num_entries(&self) -> usize {
        self.num_funcs() + self.num_vars()
    }
}
