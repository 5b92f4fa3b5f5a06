pub mod error;
pub mod inspector;
pub mod models;
pub mod parser;
pub mod utils;

pub use error::{BugreportError, CursorError, Result};
pub use models::anr::Anr;
pub use models::bugreport::Bugreport;
pub use parser::{AnrParser, MonkeyLogParser};
pub use utils::lines::{Line, LineCursor};
