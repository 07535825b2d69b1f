pub mod gpo;
pub mod preference;
pub mod preference_document;
pub mod extension_names;
pub mod policy_version;

pub use gpo::*;
pub use preference::*;
pub use preference_document::*;
pub use extension_names::*;
pub use policy_version::*;
