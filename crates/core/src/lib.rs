pub mod error;
pub mod payload;
pub mod relay;
pub mod window;

pub use error::ValidationError;
pub use payload::{SmtpConfigInput, SmtpConfigPatch};
pub use relay::{SmtpConfig, cmp_selection_order};
pub use window::{RelayUsage, SendCounters, WindowUsage, hourly_window};
