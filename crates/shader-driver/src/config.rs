//! Driver configuration, read once when the screen is created.

///Disables binding table compaction, every declared surface gets an entry.
pub const DISABLE_COMPACT_BINDING_TABLE_ENV: &str = "INTEL_DISABLE_COMPACT_BINDING_TABLE";
///Comma separated debug flags. Understood are `bt`, `sync` and `no-precompile`.
pub const DEBUG_ENV: &str = "INTEL_DEBUG";
pub const COMPILER_THREADS_ENV: &str = "IRIS_COMPILER_THREADS";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DriverConfig {
    pub disable_compact_binding_table: bool,
    ///Print each binding table after it was set up.
    pub debug_bt: bool,
    ///Block on every scheduled compile.
    pub sync_compile: bool,
    ///Compile a default variant of every shader when it is created.
    pub precompile: bool,
    pub compiler_threads: usize,
    pub limit_trig_input_range: bool,
    ///Use the disk cache when one is attached to the screen.
    pub disk_cache: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            disable_compact_binding_table: false,
            debug_bt: false,
            sync_compile: false,
            precompile: true,
            compiler_threads: default_compiler_threads(),
            limit_trig_input_range: false,
            disk_cache: true,
        }
    }
}

fn default_compiler_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().min(4))
        .unwrap_or(1)
}

fn truthy(raw: &str) -> bool {
    let v = raw.trim();
    v == "1" || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes") || v.eq_ignore_ascii_case("on")
}

impl DriverConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    ///Builds the config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = DriverConfig::default();

        if let Some(v) = lookup(DISABLE_COMPACT_BINDING_TABLE_ENV) {
            config.disable_compact_binding_table = truthy(&v);
        }

        if let Some(flags) = lookup(DEBUG_ENV) {
            for flag in flags.split(',').map(str::trim).filter(|f| !f.is_empty()) {
                match flag {
                    "bt" => config.debug_bt = true,
                    "sync" => config.sync_compile = true,
                    "no-precompile" => config.precompile = false,
                    other => log::warn!("Unknown {} flag \"{}\"", DEBUG_ENV, other),
                }
            }
        }

        if let Some(v) = lookup(COMPILER_THREADS_ENV) {
            match v.trim().parse::<usize>() {
                Ok(n) if n > 0 => config.compiler_threads = n,
                _ => log::warn!("Ignoring {}={}", COMPILER_THREADS_ENV, v),
            }
        }

        config
    }
}
