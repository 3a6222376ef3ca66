//! Default constants shared across the tether workspace.

/// Default directories searched for target component files.
pub const DEFAULT_TARGET_BASE_PATHS: &[&str] = &["/system/lib64/hw"];

/// Default hwbinder service name for HAL driver services.
pub const DEFAULT_HWBINDER_SERVICE: &str = "default";

/// Registry name of the lazily created default shell terminal.
pub const DEFAULT_SHELL_NAME: &str = "_default";

/// Bit-width used for the default shell terminal.
pub const DEFAULT_SHELL_BITS: u32 = 32;

/// Default bit-width for HAL and shared-library driver services.
pub const DEFAULT_DRIVER_BITS: u32 = 64;
