//! Configuration for the shim runtime.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Raw host descriptors standing in for the three standard streams.
///
/// Whatever numbers are chosen here, the streams always occupy guest
/// descriptors 0, 1 and 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StdioFds {
    /// Raw descriptor for stdin
    pub stdin: u32,
    /// Raw descriptor for stdout
    pub stdout: u32,
    /// Raw descriptor for stderr
    pub stderr: u32,
}

impl Default for StdioFds {
    fn default() -> Self {
        Self {
            stdin: 0,
            stdout: 1,
            stderr: 2,
        }
    }
}

/// Placement of the asyncify bookkeeping in guest memory.
///
/// `data_ptr` receives two i32 values, `unwind_start` and `unwind_end`,
/// bounding the scratch region the guest saves its frames into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsyncifyConfig {
    /// Address of the `[start, end)` pair handed to `asyncify_start_*`
    pub data_ptr: u32,
    /// First byte of the scratch region
    pub unwind_start: u32,
    /// One past the last byte of the scratch region
    pub unwind_end: u32,
}

impl Default for AsyncifyConfig {
    fn default() -> Self {
        Self {
            data_ptr: 16,
            unwind_start: 24,
            unwind_end: 1024,
        }
    }
}

/// Configuration for a shim instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShimConfig {
    /// Command-line arguments, `argv[0]` included
    pub args: Vec<String>,

    /// Environment variables, in the order the guest sees them
    pub env: Vec<(String, String)>,

    /// Raw descriptors for the standard streams
    pub stdio: StdioFds,

    /// Initial descriptor table size
    pub table_size: usize,

    /// Stop the guest on `proc_exit` and report the code, instead of
    /// returning to it
    pub return_on_exit: bool,

    /// Asyncify scratch region placement
    pub asyncify: AsyncifyConfig,

    /// Maximum memory in bytes (default = 256MB)
    pub max_memory: usize,

    /// Enable fuel-based execution limiting
    pub fuel_limit: Option<u64>,

    /// Cranelift optimization level (0-2)
    pub optimization_level: u8,

    /// Define imports nobody provides as functions that trap when called
    pub trap_unknown_imports: bool,
}

impl Default for ShimConfig {
    fn default() -> Self {
        Self {
            args: Vec::new(),
            env: Vec::new(),
            stdio: StdioFds::default(),
            table_size: 3,
            return_on_exit: true,
            asyncify: AsyncifyConfig::default(),
            max_memory: 256 * 1024 * 1024, // 256 MB
            fuel_limit: None,
            optimization_level: 2,
            trap_unknown_imports: false,
        }
    }
}

impl ShimConfig {
    /// Create a minimal config for maximum isolation
    pub fn minimal() -> Self {
        Self {
            max_memory: 64 * 1024 * 1024, // 64 MB
            fuel_limit: Some(1_000_000_000),
            ..Default::default()
        }
    }

    /// Create config for development/debugging
    pub fn development() -> Self {
        Self {
            optimization_level: 0, // Faster compilation
            trap_unknown_imports: true,
            ..Default::default()
        }
    }

    /// Load a config from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Parse a config from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Builder: add command-line argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Builder: add several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Builder: add environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Builder: set raw descriptors for the standard streams
    pub fn stdio(mut self, stdin: u32, stdout: u32, stderr: u32) -> Self {
        self.stdio = StdioFds {
            stdin,
            stdout,
            stderr,
        };
        self
    }

    /// Builder: set exit behavior
    pub fn return_on_exit(mut self, enable: bool) -> Self {
        self.return_on_exit = enable;
        self
    }

    /// Builder: set asyncify scratch placement
    pub fn asyncify(mut self, asyncify: AsyncifyConfig) -> Self {
        self.asyncify = asyncify;
        self
    }

    /// Builder: set max memory
    pub fn max_memory(mut self, bytes: usize) -> Self {
        self.max_memory = bytes;
        self
    }

    /// Builder: set fuel limit
    pub fn fuel_limit(mut self, fuel: u64) -> Self {
        self.fuel_limit = Some(fuel);
        self
    }

    /// Builder: set optimization level
    pub fn optimize(mut self, level: u8) -> Self {
        self.optimization_level = level.min(2);
        self
    }

    /// Builder: trap on unknown imports instead of failing to link
    pub fn trap_unknown_imports(mut self, enable: bool) -> Self {
        self.trap_unknown_imports = enable;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = ShimConfig::default();
        assert_eq!(config.max_memory, 256 * 1024 * 1024);
        assert_eq!(config.stdio, StdioFds::default());
        assert_eq!(config.table_size, 3);
        assert!(config.return_on_exit);
        assert_eq!(config.asyncify.data_ptr, 16);
        assert_eq!(config.asyncify.unwind_start, 24);
        assert_eq!(config.asyncify.unwind_end, 1024);
    }

    #[test]
    fn test_config_minimal() {
        let config = ShimConfig::minimal();
        assert_eq!(config.max_memory, 64 * 1024 * 1024);
        assert!(config.fuel_limit.is_some());
    }

    #[test]
    fn test_config_builder_chain() {
        let config = ShimConfig::default()
            .arg("node")
            .arg("b.wasm")
            .env("NODE_ENV", "development")
            .stdio(5, 6, 7)
            .max_memory(128 * 1024 * 1024)
            .fuel_limit(500_000_000)
            .optimize(9);

        assert_eq!(config.args, vec!["node", "b.wasm"]);
        assert_eq!(config.env.len(), 1);
        assert_eq!(config.stdio.stdout, 6);
        assert_eq!(config.fuel_limit, Some(500_000_000));
        assert_eq!(config.optimization_level, 2);
    }

    #[test]
    fn test_config_from_json_partial() {
        let config = ShimConfig::from_json(
            r#"{ "args": ["prog", "-v"], "env": [["HOME", "/"]], "return_on_exit": false }"#,
        )
        .unwrap();
        assert_eq!(config.args, vec!["prog", "-v"]);
        assert_eq!(config.env, vec![("HOME".to_string(), "/".to_string())]);
        assert!(!config.return_on_exit);
        assert_eq!(config.table_size, 3);
    }

    #[test]
    fn test_config_from_json_rejects_garbage() {
        assert!(ShimConfig::from_json("{ not json").is_err());
    }
}
