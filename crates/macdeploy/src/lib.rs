pub mod bundle;
pub mod error;
pub mod exec;
pub mod inspect;
pub mod macho;
pub mod plan;
pub mod resolve;

pub use bundle::AppBundleContext;
pub use error::Error;
pub use exec::{InstallNameTool, LoadCommandEditor, RelocationExecutor};
pub use inspect::{BinaryInspector, MachOInspector};
pub use macho::BinaryDescriptor;
pub use plan::{create_relocation_plan, RelocationAction, RelocationPlanner};

pub type Result<T> = std::result::Result<T, Error>;
