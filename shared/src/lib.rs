pub mod encoding;
pub mod logger;
pub mod nts_error;
pub mod options;
pub mod safe_file;
pub mod types;
pub mod utils;

pub use encoding::*;
pub use nts_error::*;
pub use options::*;
pub use safe_file::*;
pub use types::*;
pub use utils::*;
