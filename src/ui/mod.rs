pub mod icons;
pub mod output;
pub mod progress;
pub mod table;
pub mod theme;

pub use icons::Icons;
pub use output::{error, header, section, status, success, warn};
pub use progress::{human_duration, Spinner};
pub use table::{entries_table, stats_table};
pub use theme::{theme, Theme};
