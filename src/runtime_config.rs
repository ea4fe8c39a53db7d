use std::env;

/// Runtime settings read from the environment at process start.
///
/// `GANTRY_STACK_SIZE` sets the stack size for request coroutines, in bytes,
/// decimal or `0x`-prefixed hex. The default of 64 KB leaves headroom for
/// the filter chain plus a blocking backend call; tune it down only for very
/// high concurrency with shallow filter stacks.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeConfig {
    pub stack_size: usize,
}

const DEFAULT_STACK_SIZE: usize = 0x10000;

impl RuntimeConfig {
    pub fn from_env() -> Self {
        let stack_size = match env::var("GANTRY_STACK_SIZE") {
            Ok(value) => {
                if let Some(hex) = value.strip_prefix("0x") {
                    usize::from_str_radix(hex, 16).unwrap_or(DEFAULT_STACK_SIZE)
                } else {
                    value.parse().unwrap_or(DEFAULT_STACK_SIZE)
                }
            }
            Err(_) => DEFAULT_STACK_SIZE,
        };
        RuntimeConfig { stack_size }
    }

    /// Apply to the coroutine runtime; call once before the server starts.
    pub fn apply(&self) {
        may::config().set_stack_size(self.stack_size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_without_env() {
        env::remove_var("GANTRY_STACK_SIZE");
        assert_eq!(RuntimeConfig::from_env().stack_size, DEFAULT_STACK_SIZE);
    }
}
