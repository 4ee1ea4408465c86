use gimli::Register;
use std::path::PathBuf;

/// Architecture register naming, injected by the caller.
/// Maps a DWARF register number to the name understood by the kernel tracer.
pub type RegisterNameFn = fn(Register) -> Option<String>;

/// Default mapping for x86-64, backed by the gimli register tables.
pub fn x86_64_register_name(register: Register) -> Option<String> {
    gimli::X86_64::register_name(register).map(|name| format!("%{name}"))
}

/// Read-only per-call configuration of the resolver.
///
/// An instance is passed to every entry point instead of relying on
/// process-wide state.
#[derive(Clone)]
pub struct ResolverConfig {
    /// Prefix of the source tree on the local machine, used to re-root
    /// source paths recorded in the debug information.
    pub source_prefix: Option<PathBuf>,
    /// Register number to register name mapping.
    pub register_name: RegisterNameFn,
    /// Emission capacity for a single request.
    pub max_probes: usize,
    /// Allow emitting `DW_AT_const_value` variables as immediates.
    pub allow_immediate: bool,
    /// Do not expand inlined instances of a requested function.
    pub no_inlines: bool,
    /// Keep scanning a compilation unit after the first matched function.
    pub force_add: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            source_prefix: None,
            register_name: x86_64_register_name,
            max_probes: Self::DEFAULT_MAX_PROBES,
            allow_immediate: true,
            no_inlines: false,
            force_add: false,
        }
    }
}

impl ResolverConfig {
    pub const DEFAULT_MAX_PROBES: usize = 128;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_default_register_names() {
        assert_eq!(
            x86_64_register_name(gimli::X86_64::RDI),
            Some("%rdi".to_string())
        );
        assert_eq!(
            x86_64_register_name(gimli::X86_64::RBP),
            Some("%rbp".to_string())
        );
        assert_eq!(x86_64_register_name(Register(0xffff)), None);
    }
}
