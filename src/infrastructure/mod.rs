pub mod session;
pub mod ad_connection;
pub mod sysvol_share;
pub mod version_sync;
pub mod gpo_sync;

pub use session::*;
pub use ad_connection::*;
pub use sysvol_share::*;
pub use version_sync::*;
pub use gpo_sync::*;
